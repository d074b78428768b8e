//! Response sink and router-owned responses
//!
//! [`ResponseWriter`] buffers what a handler emits and follows the usual writer
//! contract: headers are mutable until the status line is written, after which
//! header changes are ignored and logged.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use crate::logger;

/// Buffered response for one request
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the status line has been written
    pub const fn header_written(&self) -> bool {
        self.status.is_some()
    }

    /// Status written so far; 200 if only the body was written
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace header `key`; returns false if the header was rejected
    pub fn set_header(&mut self, key: &str, value: &str) -> bool {
        self.put_header(key, value, false)
    }

    /// Append a value for header `key`; returns false if the header was rejected
    pub fn add_header(&mut self, key: &str, value: &str) -> bool {
        self.put_header(key, value, true)
    }

    fn put_header(&mut self, key: &str, value: &str, append: bool) -> bool {
        if self.header_written() {
            logger::log_warning(&format!(
                "header {key} set after status {} was written; ignored",
                self.status()
            ));
            return false;
        }
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                logger::log_warning(&format!("invalid header name {key:?}: {e}"));
                return false;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(value) => value,
            Err(e) => {
                logger::log_warning(&format!("invalid value for header {key}: {e}"));
                return false;
            }
        };
        if append {
            self.headers.append(name, value);
        } else {
            self.headers.insert(name, value);
        }
        true
    }

    /// Write the status line; later calls are ignored
    pub fn write_header(&mut self, status: StatusCode) {
        if let Some(current) = self.status {
            logger::log_warning(&format!(
                "superfluous write_header({status}); status {current} already written"
            ));
            return;
        }
        self.status = Some(status);
    }

    /// Append to the body, writing a 200 status first if none was written
    pub fn write(&mut self, data: &[u8]) {
        if !self.header_written() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
    }

    /// Content type, status and body in the required order
    pub fn send(&mut self, status: StatusCode, content_type: &str, data: &[u8]) {
        self.set_header(CONTENT_TYPE.as_str(), content_type);
        self.write_header(status);
        self.write(data);
    }

    /// Finish the response; `head_only` drops the body but keeps its length
    pub fn into_response(self, head_only: bool) -> Response<Full<Bytes>> {
        let status = self.status();
        let content_length = self.body.len();
        let body = if head_only {
            Bytes::new()
        } else {
            Bytes::from(self.body)
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        if !response.headers().contains_key(CONTENT_LENGTH) {
            response
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        }
        response
    }
}

/// Build 404 Not Found response
pub fn build_404_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(404)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from("404 page not found")))
        .unwrap_or_else(|e| {
            log_build_error("404", &e);
            Response::new(Full::new(Bytes::from("404 page not found")))
        })
}

/// Build 405 Method Not Allowed response listing the methods the path accepts
pub fn build_405_response(allowed: &[String]) -> Response<Full<Bytes>> {
    Response::builder()
        .status(405)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header(ALLOW, allowed.join(", "))
        .body(Full::new(Bytes::from("405 Method Not Allowed")))
        .unwrap_or_else(|e| {
            log_build_error("405", &e);
            Response::new(Full::new(Bytes::from("405 Method Not Allowed")))
        })
}

/// Build 413 Payload Too Large response
pub fn build_413_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(413)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from("413 Payload Too Large")))
        .unwrap_or_else(|e| {
            log_build_error("413", &e);
            Response::new(Full::new(Bytes::from("413 Payload Too Large")))
        })
}

/// Build 400 Bad Request response for unreadable request bodies
pub fn build_400_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(400)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from("400 Bad Request")))
        .unwrap_or_else(|e| {
            log_build_error("400", &e);
            Response::new(Full::new(Bytes::from("400 Bad Request")))
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    logger::log_error(&format!("Failed to build {status} response: {error}"));
}
