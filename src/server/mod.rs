// Server module entry point
// Route registration on the unstarted server, startup, and shutdown

pub mod connection;
pub mod listener;
pub mod signal;

// `loop` is a keyword, so the module is exposed as server_loop
#[path = "loop.rs"]
pub mod server_loop;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::Method;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;

pub use connection::{ConnectionSettings, StopSignals};
pub use listener::create_listener;
pub use server_loop::start_server_loop;

use crate::config::{Config, ServerConfig};
use crate::context::Context;
use crate::db::DriverHandle;
use crate::error::{ConfigError, RouteError, ServerError};
use crate::handler::{HandlerFunc, Middleware};
use crate::logger;
use crate::routing::{Dispatcher, Router};
use crate::session::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running(SocketAddr),
    Stopped,
}

/// State shared between the server and its handles
///
/// The lock covers listener acquisition and the stop transitions only; it is
/// never held while requests run.
#[derive(Debug)]
struct Lifecycle {
    phase: RwLock<Phase>,
    signals: StopSignals,
    tracker: TaskTracker,
}

/// An unstarted server
///
/// Routes, middleware, the database handle and the session registry can only be
/// changed here. Starting the server consumes it and freezes all of them.
pub struct Way {
    router: Router,
    db: DriverHandle,
    sessions: SessionRegistry,
    settings: ServerConfig,
    lifecycle: Arc<Lifecycle>,
}

impl Default for Way {
    fn default() -> Self {
        Self::with_parts(ServerConfig::default(), SessionRegistry::new())
    }
}

impl std::fmt::Debug for Way {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Way")
            .field("router", &self.router)
            .field("db", &self.db)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl Way {
    /// Unstarted server with an empty router and no database
    ///
    /// Sessions are seeded from configured secrets; malformed or incomplete
    /// keys fail here rather than on the first request.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let sessions = SessionRegistry::from_config(&config.session)?;
        Ok(Self::with_parts(config.server.clone(), sessions))
    }

    fn with_parts(settings: ServerConfig, sessions: SessionRegistry) -> Self {
        Self {
            router: Router::new(),
            db: DriverHandle::new(),
            sessions,
            settings,
            lifecycle: Arc::new(Lifecycle {
                phase: RwLock::new(Phase::Idle),
                signals: StopSignals::default(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub const fn db(&self) -> &DriverHandle {
        &self.db
    }

    /// Database handle, for opening or installing a driver before start
    pub fn db_mut(&mut self) -> &mut DriverHandle {
        &mut self.db
    }

    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionRegistry {
        &mut self.sessions
    }

    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Register `handler` for `method` on `path`
    pub fn handle<F, Fut>(&mut self, method: Method, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.router.route(Some(method), path, HandlerFunc::new(handler))?;
        Ok(self)
    }

    /// Register `handler` on `path` for every method
    pub fn handle_func<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.router.route(None, path, HandlerFunc::new(handler))?;
        Ok(self)
    }

    pub fn get<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::GET, path, handler)
    }

    pub fn post<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::POST, path, handler)
    }

    pub fn put<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::PUT, path, handler)
    }

    pub fn patch<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::PATCH, path, handler)
    }

    pub fn delete<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::DELETE, path, handler)
    }

    pub fn options<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::OPTIONS, path, handler)
    }

    pub fn head<F, Fut>(&mut self, path: &str, handler: F) -> Result<&mut Self, RouteError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(Method::HEAD, path, handler)
    }

    /// Wrap every route, registered or not yet registered, in `middleware`
    ///
    /// Middleware added first runs outermost.
    pub fn use_middleware(&mut self, middleware: impl IntoIterator<Item = Middleware>) -> &mut Self {
        self.router.use_middleware(middleware);
        self
    }

    /// Handle for stopping the server once it runs
    pub fn server_handle(&self) -> ServerHandle {
        ServerHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Bind the listener without serving yet
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(self, addr: SocketAddr) -> Result<BoundServer, ServerError> {
        let (listener, local_addr) = {
            let mut phase = self.lifecycle.phase.write();
            if *phase == Phase::Stopped {
                return Err(ServerError::Closed);
            }
            let bind_err = |source: std::io::Error| ServerError::Bind {
                addr: addr.to_string(),
                source,
            };
            let listener = create_listener(addr).map_err(bind_err)?;
            let local_addr = listener.local_addr().map_err(bind_err)?;
            *phase = Phase::Running(local_addr);
            (listener, local_addr)
        };

        let settings = ConnectionSettings {
            keep_alive: self.settings.keep_alive,
            request_timeout: Duration::from_secs(self.settings.request_timeout),
        };
        let dispatcher = Dispatcher::new(
            Arc::new(self.router),
            Arc::new(self.db),
            Arc::new(self.sessions),
            self.settings.max_body_size,
        );

        Ok(BoundServer {
            listener,
            local_addr,
            dispatcher,
            settings,
            lifecycle: self.lifecycle,
        })
    }

    /// Bind `addr` and serve until the server is closed or shut down
    pub async fn start(self, addr: SocketAddr) -> Result<(), ServerError> {
        self.bind(addr)?.serve().await
    }
}

/// A server whose listener is bound
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    lifecycle: Arc<Lifecycle>,
}

impl BoundServer {
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve connections until stopped
    ///
    /// Returns after every connection has finished; the database connection
    /// is released last.
    pub async fn serve(self) -> Result<(), ServerError> {
        let Self {
            listener,
            local_addr,
            dispatcher,
            settings,
            lifecycle,
        } = self;

        logger::log_server_start(&local_addr, dispatcher.db().driver_name());

        start_server_loop(
            listener,
            dispatcher.clone(),
            settings,
            lifecycle.signals.clone(),
            lifecycle.tracker.clone(),
        )
        .await;

        lifecycle.tracker.close();
        lifecycle.tracker.wait().await;
        dispatcher.db().release().await;

        *lifecycle.phase.write() = Phase::Stopped;
        logger::log_server_stopped(!lifecycle.signals.hard.is_cancelled());
        Ok(())
    }
}

/// Stops a server from outside its serving task
#[derive(Debug, Clone)]
pub struct ServerHandle {
    lifecycle: Arc<Lifecycle>,
}

impl ServerHandle {
    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.lifecycle.phase.read() {
            Phase::Running(addr) => Some(addr),
            Phase::Idle | Phase::Stopped => None,
        }
    }

    /// Stop accepting, let in-flight requests finish within `deadline`, then
    /// drop whatever is left
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        self.stop(false);
        if tokio::time::timeout(deadline, self.lifecycle.tracker.wait())
            .await
            .is_err()
        {
            self.lifecycle.signals.hard.cancel();
            return Err(ServerError::ShutdownTimeout(deadline));
        }
        Ok(())
    }

    /// Stop immediately; in-flight requests are dropped without a response
    pub fn close(&self) {
        self.stop(true);
    }

    fn stop(&self, hard: bool) {
        let mut phase = self.lifecycle.phase.write();
        if *phase == Phase::Idle {
            *phase = Phase::Stopped;
        }
        self.lifecycle.signals.graceful.cancel();
        if hard {
            self.lifecycle.signals.hard.cancel();
        }
        self.lifecycle.tracker.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::Notify;

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        // A reset connection reads as an empty response
        let _ = stream.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn slow_server(started: &Arc<Notify>, delay: Duration) -> Way {
        let mut way = Way::default();
        let started = Arc::clone(started);
        way.get("/slow", move |ctx| {
            let started = Arc::clone(&started);
            async move {
                started.notify_one();
                tokio::time::sleep(delay).await;
                ctx.string(StatusCode::OK, "done");
            }
        })
        .unwrap();
        way
    }

    #[tokio::test]
    async fn test_serves_routes() {
        let mut way = Way::default();
        way.get("/", |ctx| async move { ctx.string(StatusCode::OK, "hello") })
            .unwrap();
        let handle = way.server_handle();
        let server = way.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr();
        assert_eq!(handle.local_addr(), Some(addr));
        let serving = tokio::spawn(server.serve());

        let ok = raw_get(addr, "/").await;
        assert!(ok.starts_with("HTTP/1.1 200 OK"), "{ok}");
        assert!(ok.ends_with("hello"));
        let missing = raw_get(addr, "/missing").await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        serving.await.unwrap().unwrap();
        assert_eq!(handle.local_addr(), None);
    }

    #[tokio::test]
    async fn test_shutdown_lets_handler_finish() {
        let started = Arc::new(Notify::new());
        let way = slow_server(&started, Duration::from_millis(300));
        let handle = way.server_handle();
        let server = way.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr();
        let serving = tokio::spawn(server.serve());

        let client = tokio::spawn(async move { raw_get(addr, "/slow").await });
        started.notified().await;
        handle.shutdown(Duration::from_secs(5)).await.unwrap();

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("done"));
        serving.await.unwrap().unwrap();

        // No new connections after shutdown
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_close_drops_in_flight_request() {
        let started = Arc::new(Notify::new());
        let way = slow_server(&started, Duration::from_secs(30));
        let handle = way.server_handle();
        let server = way.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr();
        let serving = tokio::spawn(server.serve());

        let client = tokio::spawn(async move { raw_get(addr, "/slow").await });
        started.notified().await;
        handle.close();

        let response = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();
        assert!(!response.contains("done"));
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_deadline_exceeded() {
        let started = Arc::new(Notify::new());
        let way = slow_server(&started, Duration::from_secs(30));
        let handle = way.server_handle();
        let server = way.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr();
        let serving = tokio::spawn(server.serve());

        let _client = tokio::spawn(async move { raw_get(addr, "/slow").await });
        started.notified().await;
        let err = handle.shutdown(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ServerError::ShutdownTimeout(_)));
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_before_start() {
        let way = Way::default();
        way.server_handle().close();
        assert!(matches!(
            way.bind("127.0.0.1:0".parse().unwrap()),
            Err(ServerError::Closed)
        ));
    }

    #[test]
    fn test_new_rejects_partial_cookie_keys() {
        let mut config = Config::default();
        config.session.cookie_hash_key = Some("00".repeat(32));
        assert!(matches!(Way::new(&config), Err(ConfigError::IncompleteKeys(_))));
    }

    #[test]
    fn test_invalid_route_pattern() {
        let mut way = Way::default();
        assert!(way.get("/users/{id", |_ctx| async {}).is_err());
    }
}
