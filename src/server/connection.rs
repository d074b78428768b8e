// Connection handling module
// Serves one accepted TCP connection until it ends or the server stops

use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio_util::sync::CancellationToken;

use crate::logger;
use crate::routing::Dispatcher;

/// Per-connection HTTP settings
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub keep_alive: bool,
    /// Time allowed to receive a request's headers, including idle keep-alive time
    pub request_timeout: Duration,
}

/// Stop signals shared by every connection of one server
#[derive(Debug, Clone, Default)]
pub struct StopSignals {
    /// Finish the in-flight request, then close
    pub graceful: CancellationToken,
    /// Drop the connection immediately
    pub hard: CancellationToken,
}

/// Handle a single connection.
///
/// This function:
/// 1. Wraps the TCP stream in `TokioIo`
/// 2. Configures HTTP/1.1 connection settings (keep-alive, header timeout)
/// 3. Serves the connection with the dispatcher
/// 4. Reacts to graceful and hard stop signals
pub async fn serve_connection(
    stream: tokio::net::TcpStream,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    signals: StopSignals,
) {
    let io = TokioIo::new(stream);

    let mut builder = http1::Builder::new();
    builder.keep_alive(settings.keep_alive);
    if !settings.request_timeout.is_zero() {
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(settings.request_timeout);
    }

    let conn = builder.serve_connection(
        io,
        service_fn(move |req| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.handle(req).await }
        }),
    );
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        () = signals.hard.cancelled() => return,
        () = signals.graceful.cancelled() => {
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                res = conn.as_mut() => res,
                () = signals.hard.cancelled() => return,
            }
        }
    };

    if let Err(err) = result {
        if err.is_timeout() {
            logger::log_warning(&format!(
                "Connection timeout after {} seconds",
                settings.request_timeout.as_secs()
            ));
        } else if !err.is_incomplete_message() {
            logger::log_connection_error(&err);
        }
    }
}
