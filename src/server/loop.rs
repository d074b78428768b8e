// Server loop module
// Accepts connections until the server is told to stop

use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;

use super::connection::{serve_connection, ConnectionSettings, StopSignals};
use crate::logger;
use crate::routing::Dispatcher;

/// Accept loop; returns once a stop signal fires, dropping the listener
///
/// Each connection runs on its own task registered with `tracker`, so the
/// caller can wait for in-flight connections after the loop exits.
pub async fn start_server_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    signals: StopSignals,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            biased;

            () = signals.graceful.cancelled() => break,
            () = signals.hard.cancelled() => break,

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("[Connection] Accepted from: {peer_addr}");
                        tracker.spawn(serve_connection(
                            stream,
                            dispatcher.clone(),
                            settings,
                            signals.clone(),
                        ));
                    }
                    Err(e) => {
                        logger::log_error(&format!("Failed to accept connection: {e}"));
                    }
                }
            }
        }
    }
}
