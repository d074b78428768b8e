//! Content types emitted by the context's response helpers

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_XML: &str = "application/xml";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Detect an image type from its leading magic bytes
///
/// Used when a handler emits an image without naming its content type.
pub fn sniff_image(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [0x00, 0x00, 0x01, 0x00, ..] => "image/x-icon",
        [b'B', b'M', ..] => "image/bmp",
        _ if looks_like_svg(data) => "image/svg+xml",
        _ => OCTET_STREAM,
    }
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(256)];
    String::from_utf8_lossy(head).contains("<svg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_images() {
        assert_eq!(sniff_image(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_image(b"GIF89a"), "image/gif");
        assert_eq!(sniff_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_image(b"<?xml version=\"1.0\"?><svg></svg>"), "image/svg+xml");
    }

    #[test]
    fn test_unknown_bytes() {
        assert_eq!(sniff_image(b"plain"), OCTET_STREAM);
        assert_eq!(sniff_image(&[]), OCTET_STREAM);
    }
}
