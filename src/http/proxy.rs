//! Upstream fetch for proxied responses

use std::sync::OnceLock;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, CONNECTION, LOCATION, TRANSFER_ENCODING};
use hyper::{StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::UpstreamFetchError;

type HttpClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

/// Redirect hops followed before giving up
pub const MAX_REDIRECTS: usize = 10;

static CLIENT: OnceLock<HttpClient> = OnceLock::new();

fn client() -> &'static HttpClient {
    CLIENT.get_or_init(|| {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Client::builder(TokioExecutor::new()).build(connector)
    })
}

/// Framing headers describe the upstream connection, not the payload
const CONNECTION_HEADERS: [HeaderName; 2] = [CONNECTION, TRANSFER_ENCODING];

/// A fully read upstream response
#[derive(Debug)]
pub struct Upstream {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

fn invalid_url(url: &str, reason: impl ToString) -> UpstreamFetchError {
    UpstreamFetchError::Url {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// GET `url` over http or https, following redirects, and read the whole response
pub async fn fetch(url: &str) -> Result<Upstream, UpstreamFetchError> {
    let mut uri: Uri = url.parse().map_err(|e| invalid_url(url, e))?;
    if !matches!(uri.scheme_str(), Some("http" | "https")) {
        return Err(invalid_url(url, "scheme must be http or https"));
    }

    let mut hops = 0;
    let response = loop {
        let response = client().get(uri.clone()).await?;
        let Some(location) = redirect_target(&response) else {
            break response;
        };
        hops += 1;
        if hops > MAX_REDIRECTS {
            return Err(UpstreamFetchError::TooManyRedirects(url.to_string()));
        }
        uri = resolve_location(&uri, &location)
            .ok_or_else(|| invalid_url(&location, "unusable redirect location"))?;
        tracing::debug!(from = url, to = %uri, "following upstream redirect");
    };

    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();

    let mut headers = parts.headers;
    for name in &CONNECTION_HEADERS {
        headers.remove(name);
    }

    Ok(Upstream {
        status: parts.status,
        headers,
        body,
    })
}

fn redirect_target<B>(response: &hyper::Response<B>) -> Option<String> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    response
        .headers()
        .get(LOCATION)?
        .to_str()
        .ok()
        .map(str::to_string)
}

/// Resolve a `Location` value against the URI that produced it
fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    let scheme = base.scheme_str()?;
    let authority = base.authority()?.as_str();

    let absolute = if location.contains("://") {
        location.to_string()
    } else if let Some(rest) = location.strip_prefix("//") {
        format!("{scheme}://{rest}")
    } else if location.starts_with('/') {
        format!("{scheme}://{authority}{location}")
    } else {
        let dir = base.path().rsplit_once('/').map_or("", |(dir, _)| dir);
        format!("{scheme}://{authority}{dir}/{location}")
    };
    absolute.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_chain(err: &dyn std::error::Error) -> String {
        let mut out = err.to_string();
        let mut source = err.source();
        while let Some(e) = source {
            out.push_str(": ");
            out.push_str(&e.to_string());
            source = e.source();
        }
        out
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = fetch("not a url").await.unwrap_err();
        assert!(matches!(err, UpstreamFetchError::Url { .. }));

        let err = fetch("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, UpstreamFetchError::Url { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        // Port 9 (discard) on loopback is closed in test environments
        let err = fetch("http://127.0.0.1:9/image.png").await.unwrap_err();
        assert!(matches!(err, UpstreamFetchError::Request(_)));
    }

    #[tokio::test]
    async fn test_https_scheme_is_dialed() {
        let err = fetch("https://127.0.0.1:9/logo.png").await.unwrap_err();
        assert!(matches!(err, UpstreamFetchError::Request(_)));
        let chain = error_chain(&err);
        assert!(!chain.contains("scheme is not http"), "{chain}");
    }

    #[test]
    fn test_resolve_location() {
        let base: Uri = "https://cdn.example.com/media/a/logo.png".parse().unwrap();
        assert_eq!(
            resolve_location(&base, "http://other.example.com/x.png").unwrap(),
            "http://other.example.com/x.png"
        );
        assert_eq!(
            resolve_location(&base, "/static/x.png").unwrap(),
            "https://cdn.example.com/static/x.png"
        );
        assert_eq!(
            resolve_location(&base, "//mirror.example.com/x.png").unwrap(),
            "https://mirror.example.com/x.png"
        );
        assert_eq!(
            resolve_location(&base, "b.png").unwrap(),
            "https://cdn.example.com/media/a/b.png"
        );
    }
}
