//! Request dispatch
//!
//! Entry point for HTTP request processing: body size validation, route
//! resolution, context construction and handler invocation.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::CONTENT_LENGTH;
use hyper::{Method, Request, Response, StatusCode};

use crate::context::Context;
use crate::db::DriverHandle;
use crate::http::{self, ResponseWriter};
use crate::logger;
use crate::session::SessionRegistry;

use super::router::{Resolution, Router};

/// Shared, read-only request pipeline of a running server
#[derive(Debug, Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    db: Arc<DriverHandle>,
    sessions: Arc<SessionRegistry>,
    max_body_size: u64,
}

impl Dispatcher {
    pub fn new(
        router: Arc<Router>,
        db: Arc<DriverHandle>,
        sessions: Arc<SessionRegistry>,
        max_body_size: u64,
    ) -> Self {
        Self {
            router,
            db,
            sessions,
            max_body_size,
        }
    }

    pub fn db(&self) -> &Arc<DriverHandle> {
        &self.db
    }

    /// Main entry point for HTTP request handling
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // 1. Check body size
        if let Some(resp) = check_body_size(&req, self.max_body_size) {
            return Ok(resp);
        }

        // 2. Read body, enforcing the limit for bodies without a length
        let (parts, body) = req.into_parts();
        let limit = usize::try_from(self.max_body_size).unwrap_or(usize::MAX);
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                logger::log_error(&format!(
                    "Request body too large (max: {} bytes)",
                    self.max_body_size
                ));
                return Ok(http::build_413_response());
            }
            Err(e) => {
                logger::log_warning(&format!("Failed to read request body: {e}"));
                return Ok(http::build_400_response());
            }
        };

        Ok(self.dispatch(Request::from_parts(parts, body)).await)
    }

    /// Route a fully read request and run its handler chain
    pub async fn dispatch(&self, req: Request<Bytes>) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let (response, body_bytes) = match self.router.resolve(&method, &path) {
            Resolution::NotFound => (http::build_404_response(), 0),
            Resolution::MethodNotAllowed(allowed) => (http::build_405_response(&allowed), 0),
            Resolution::Matched { handler, params } => {
                let ctx = Context::new(
                    req,
                    params,
                    Arc::clone(&self.db),
                    Arc::clone(&self.sessions),
                );
                let outcome = AssertUnwindSafe(handler.call(ctx.clone()))
                    .catch_unwind()
                    .await;
                let writer = match outcome {
                    Ok(()) => ctx.take_response(),
                    Err(_) => {
                        logger::log_error(&format!("Handler panicked: {method} {path}"));
                        internal_error()
                    }
                };
                let len = writer.body().len();
                (writer.into_response(method == Method::HEAD), len)
            }
        };

        logger::log_access(
            method.as_str(),
            &path,
            response.status().as_u16(),
            body_bytes,
            started.elapsed(),
        );
        response
    }
}

fn internal_error() -> ResponseWriter {
    let mut writer = ResponseWriter::new();
    writer.send(
        StatusCode::INTERNAL_SERVER_ERROR,
        http::mime::TEXT_PLAIN,
        b"500 Internal Server Error",
    );
    writer
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size<B>(req: &Request<B>, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = req.headers().get(CONTENT_LENGTH)?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_error(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}
