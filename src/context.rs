//! Per-request context
//!
//! A [`Context`] is built by the dispatcher for every matched request and
//! handed to the middleware chain by value. Clones share the same response
//! buffer, so a middleware observes what the inner handler wrote.

use std::collections::HashMap;
use std::sync::Arc;

use hyper::body::Bytes;
use hyper::header::{HeaderMap, CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::{Method, Request, StatusCode, Uri};
use parking_lot::Mutex;
use serde::Serialize;

use crate::crypto;
use crate::db::{DriverHandle, DriverKind, ExecSummary, Rows, SingleRow, SqlValue};
use crate::error::{CookieError, CryptoError, DbError};
use crate::http::cookie::{find_cookie, Cookie};
use crate::http::{mime, proxy, ResponseWriter};
use crate::logger;
use crate::session::{Session, SessionRegistry, SessionStore};

#[derive(Clone)]
pub struct Context {
    request: Arc<Request<Bytes>>,
    params: Arc<HashMap<String, String>>,
    response: Arc<Mutex<ResponseWriter>>,
    db: Arc<DriverHandle>,
    sessions: Arc<SessionRegistry>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("params", &self.params)
            .field("driver", &self.db.kind())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        request: Request<Bytes>,
        params: HashMap<String, String>,
        db: Arc<DriverHandle>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            request: Arc::new(request),
            params: Arc::new(params),
            response: Arc::new(Mutex::new(ResponseWriter::new())),
            db,
            sessions,
        }
    }

    // ---- request ----

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// The fully read request body
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Path variables extracted by the route pattern
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// First value of query parameter `name`, percent-decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.uri().query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key) == name).then(|| decode_component(value))
        })
    }

    // ---- database ----

    pub fn db(&self) -> &DriverHandle {
        &self.db
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.db.kind()
    }

    pub async fn exec(&self, query: &str, args: &[SqlValue]) -> Result<ExecSummary, DbError> {
        self.db.exec(query, args).await
    }

    pub async fn exec_no_result(&self, query: &str, args: &[SqlValue]) -> Result<(), DbError> {
        self.db.exec_no_result(query, args).await
    }

    pub async fn query(&self, query: &str, args: &[SqlValue]) -> Result<Rows, DbError> {
        self.db.query(query, args).await
    }

    /// See [`DriverHandle::query_row`]; errors are deferred to the row
    pub async fn query_row(&self, query: &str, args: &[SqlValue]) -> SingleRow {
        self.db.query_row(query, args).await
    }

    // ---- sessions ----

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Session store registered under `name`
    pub fn get_session(&self, name: &str) -> Option<Arc<dyn SessionStore>> {
        self.sessions.store(name).cloned()
    }

    /// Load session `name` from the store registered as `store`
    pub fn load_session(&self, store: &str, name: &str) -> Result<Session, CookieError> {
        let store = self
            .get_session(store)
            .ok_or_else(|| CookieError::UnknownStore(store.to_string()))?;
        store.load(self.headers(), name)
    }

    /// Persist `session` through `store` and queue its cookie
    pub fn save_session(&self, store: &str, session: &Session) -> Result<(), CookieError> {
        let store = self
            .get_session(store)
            .ok_or_else(|| CookieError::UnknownStore(store.to_string()))?;
        let cookie = store.save(session)?;
        self.set_cookie(&cookie);
        Ok(())
    }

    // ---- cookies ----

    pub fn set_cookie(&self, cookie: &Cookie) {
        self.response
            .lock()
            .add_header(SET_COOKIE.as_str(), &cookie.to_header_value());
    }

    pub fn get_cookie(&self, name: &str) -> Result<Cookie, CookieError> {
        find_cookie(self.headers(), name).ok_or_else(|| CookieError::Missing(name.to_string()))
    }

    pub fn delete_cookie(&self, name: &str) {
        self.set_cookie(&Cookie::removal(name));
    }

    // ---- response ----

    /// Run `f` against the response buffer
    pub fn with_response<R>(&self, f: impl FnOnce(&mut ResponseWriter) -> R) -> R {
        f(&mut self.response.lock())
    }

    pub fn set_header(&self, key: &str, value: &str) {
        self.response.lock().set_header(key, value);
    }

    /// Write the status line without a body
    pub fn status(&self, code: StatusCode) {
        self.response.lock().write_header(code);
    }

    pub fn redirect(&self, code: StatusCode, url: &str) {
        let mut response = self.response.lock();
        response.set_header(LOCATION.as_str(), url);
        response.write_header(code);
    }

    pub fn json<T: Serialize + ?Sized>(&self, code: StatusCode, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => self.send(code, mime::APPLICATION_JSON, &body),
            Err(e) => {
                logger::log_error(&format!("Error encoding JSON response: {e}"));
                self.send(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    mime::TEXT_PLAIN,
                    b"500 Internal Server Error",
                );
            }
        }
    }

    pub fn html(&self, code: StatusCode, html: &str) {
        self.send(code, mime::TEXT_HTML, html.as_bytes());
    }

    pub fn string(&self, code: StatusCode, text: &str) {
        self.send(code, mime::TEXT_PLAIN, text.as_bytes());
    }

    /// Emit an already encoded XML document
    pub fn xml(&self, code: StatusCode, document: &str) {
        self.send(code, mime::APPLICATION_XML, document.as_bytes());
    }

    /// Raw bytes; keeps a content type set earlier through [`Self::set_header`]
    pub fn data(&self, code: StatusCode, data: &[u8]) {
        let mut response = self.response.lock();
        if !response.headers().contains_key(CONTENT_TYPE) {
            response.set_header(CONTENT_TYPE.as_str(), mime::OCTET_STREAM);
        }
        response.write_header(code);
        response.write(data);
    }

    /// Image bytes; an empty `content_type` is detected from the data
    pub fn image(&self, code: StatusCode, content_type: &str, data: &[u8]) {
        let content_type = if content_type.is_empty() {
            mime::sniff_image(data)
        } else {
            content_type
        };
        self.send(code, content_type, data);
    }

    fn send(&self, code: StatusCode, content_type: &str, body: &[u8]) {
        self.response.lock().send(code, content_type, body);
    }

    /// Fetch `url` and relay its status, headers and body
    ///
    /// A failed fetch becomes a local 500.
    pub async fn proxy_media(&self, url: &str) {
        match proxy::fetch(url).await {
            Ok(upstream) => {
                let mut response = self.response.lock();
                for (name, value) in &upstream.headers {
                    if let Ok(value) = value.to_str() {
                        response.add_header(name.as_str(), value);
                    }
                }
                response.write_header(upstream.status);
                response.write(&upstream.body);
            }
            Err(e) => {
                logger::log_error(&format!("Failed to fetch media {url}: {e}"));
                self.send(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    mime::TEXT_PLAIN,
                    b"Failed to fetch media",
                );
            }
        }
    }

    /// Take the buffered response, leaving an empty one behind
    pub(crate) fn take_response(&self) -> ResponseWriter {
        std::mem::take(&mut *self.response.lock())
    }

    // ---- crypto ----

    pub fn hash_string_to_string(&self, value: &str) -> String {
        crypto::hash_string_to_string(value)
    }

    pub fn hash_string(&self, value: &str) -> [u8; 32] {
        crypto::hash_string(value)
    }

    pub fn hash_bytes(&self, value: &[u8]) -> [u8; 32] {
        crypto::hash_bytes(value)
    }

    pub fn encrypt(&self, data: &[u8], passphrase: &str) -> Result<String, CryptoError> {
        crypto::encrypt(data, passphrase)
    }

    pub fn decrypt(&self, encrypted: &str, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
        crypto::decrypt(encrypted, passphrase)
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |s| s.into_owned())
}

/// Context for a bare `GET /` with no driver and no sessions
#[cfg(test)]
pub(crate) fn test_context() -> Context {
    test_context_for(Request::new(Bytes::new()))
}

#[cfg(test)]
pub(crate) fn test_context_for(request: Request<Bytes>) -> Context {
    Context::new(
        request,
        HashMap::new(),
        Arc::new(DriverHandle::new()),
        Arc::new(SessionRegistry::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, COOKIE};
    use pretty_assertions::assert_eq;

    fn content_types(ctx: &Context) -> Vec<String> {
        ctx.with_response(|w| {
            w.headers()
                .get_all(CONTENT_TYPE)
                .iter()
                .map(|v| v.to_str().unwrap().to_string())
                .collect()
        })
    }

    #[test]
    fn test_payload_writers_set_one_content_type() {
        let cases: Vec<(Box<dyn Fn(&Context)>, &str)> = vec![
            (Box::new(|c: &Context| c.json(StatusCode::OK, &serde_json::json!({"ok": true}))), mime::APPLICATION_JSON),
            (Box::new(|c: &Context| c.html(StatusCode::OK, "<p>hi</p>")), mime::TEXT_HTML),
            (Box::new(|c: &Context| c.string(StatusCode::OK, "hi")), mime::TEXT_PLAIN),
            (Box::new(|c: &Context| c.xml(StatusCode::OK, "<a/>")), mime::APPLICATION_XML),
            (Box::new(|c: &Context| c.data(StatusCode::OK, b"\x00\x01")), mime::OCTET_STREAM),
            (Box::new(|c: &Context| c.image(StatusCode::OK, "", b"GIF89a")), "image/gif"),
        ];
        for (write, expected) in cases {
            let ctx = test_context();
            ctx.set_header("Content-Type", "stale/type");
            write(&ctx);
            let types = content_types(&ctx);
            assert_eq!(types.len(), 1);
            if expected != mime::OCTET_STREAM {
                assert_eq!(types[0], expected);
            }
        }
    }

    #[test]
    fn test_json_body_and_status() {
        let ctx = test_context();
        ctx.json(StatusCode::CREATED, &vec![1, 2, 3]);
        let w = ctx.take_response();
        assert_eq!(w.status(), StatusCode::CREATED);
        assert_eq!(w.body(), b"[1,2,3]");
    }

    #[test]
    fn test_header_after_status_ignored() {
        let ctx = test_context();
        ctx.status(StatusCode::NO_CONTENT);
        ctx.set_header("X-Late", "1");
        ctx.with_response(|w| {
            assert_eq!(w.status(), StatusCode::NO_CONTENT);
            assert!(!w.headers().contains_key("x-late"));
        });
    }

    #[test]
    fn test_redirect() {
        let ctx = test_context();
        ctx.redirect(StatusCode::FOUND, "/login");
        ctx.with_response(|w| {
            assert_eq!(w.status(), StatusCode::FOUND);
            assert_eq!(w.headers()[LOCATION], "/login");
        });
    }

    #[test]
    fn test_cookies() {
        let mut request = Request::new(Bytes::new());
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_static("theme=dark"));
        let ctx = test_context_for(request);

        assert_eq!(ctx.get_cookie("theme").unwrap().value, "dark");
        assert!(matches!(ctx.get_cookie("lang"), Err(CookieError::Missing(_))));

        ctx.set_cookie(&Cookie::new("lang", "en").with_path("/"));
        ctx.delete_cookie("theme");
        let set: Vec<String> = ctx.with_response(|w| {
            w.headers()
                .get_all(SET_COOKIE)
                .iter()
                .map(|v| v.to_str().unwrap().to_string())
                .collect()
        });
        assert_eq!(set, vec!["lang=en; Path=/", "theme=; Max-Age=0"]);
    }

    #[test]
    fn test_query_param_decoding() {
        let request = Request::builder()
            .uri("/search?q=hello+world&tag=a%2Fb&empty")
            .body(Bytes::new())
            .unwrap();
        let ctx = test_context_for(request);
        assert_eq!(ctx.query_param("q").as_deref(), Some("hello world"));
        assert_eq!(ctx.query_param("tag").as_deref(), Some("a/b"));
        assert_eq!(ctx.query_param("empty").as_deref(), Some(""));
        assert_eq!(ctx.query_param("missing"), None);
    }

    #[tokio::test]
    async fn test_queries_without_driver_fail() {
        let ctx = test_context();
        assert_eq!(ctx.driver_kind(), DriverKind::None);
        assert!(matches!(ctx.exec("SELECT 1", &[]).await, Err(DbError::Uninitialized)));
        assert!(matches!(
            ctx.query_row("SELECT 1", &[]).await.row(),
            Err(DbError::Uninitialized)
        ));
    }

    #[test]
    fn test_session_store_lookup() {
        let ctx = test_context();
        assert!(ctx.get_session("default").is_none());
        assert!(matches!(
            ctx.load_session("default", "app"),
            Err(CookieError::UnknownStore(_))
        ));
    }

    #[test]
    fn test_crypto_helpers() {
        let ctx = test_context();
        let key = "0123456789abcdef0123456789abcdef";
        let sealed = ctx.encrypt(b"secret", key).unwrap();
        assert_eq!(ctx.decrypt(&sealed, key).unwrap(), b"secret");
        assert_eq!(ctx.hash_string("abc"), ctx.hash_bytes(b"abc"));
    }

    #[tokio::test]
    async fn test_proxy_failure_is_local_500() {
        let ctx = test_context();
        ctx.proxy_media("http://127.0.0.1:9/missing.png").await;
        let w = ctx.take_response();
        assert_eq!(w.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(w.body(), b"Failed to fetch media");
    }

    /// Serve one connection that answers every request with a chunked 404
    async fn spawn_upstream() -> std::net::SocketAddr {
        use http_body_util::Full;
        use hyper::header::TRANSFER_ENCODING;
        use hyper::service::service_fn;
        use hyper_util::rt::TokioIo;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let service = service_fn(|_req| async {
                let resp = hyper::Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .header("x-upstream", "media-1")
                    .header(CONTENT_TYPE, "image/png")
                    .header(TRANSFER_ENCODING, "chunked")
                    .body(Full::new(Bytes::from_static(b"no such image")))
                    .unwrap();
                Ok::<_, std::convert::Infallible>(resp)
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });
        addr
    }

    #[tokio::test]
    async fn test_proxy_relays_upstream_response() {
        use hyper::header::TRANSFER_ENCODING;

        let addr = spawn_upstream().await;
        let ctx = test_context();
        ctx.proxy_media(&format!("http://{addr}/media/logo.png")).await;

        let w = ctx.take_response();
        assert_eq!(w.status(), StatusCode::NOT_FOUND);
        assert_eq!(w.headers()["x-upstream"], "media-1");
        assert_eq!(w.headers()[CONTENT_TYPE], "image/png");
        assert!(!w.headers().contains_key(TRANSFER_ENCODING));
        assert_eq!(w.body(), b"no such image");
    }
}
