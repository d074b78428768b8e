// Signal handling module
//
// Supported signals:
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use std::time::Duration;

use super::ServerHandle;
use crate::logger;

/// Wait for SIGINT or SIGTERM and return the signal's name
#[cfg(unix)]
pub async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            logger::log_warning(&format!("Failed to register SIGTERM handler: {e}"));
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        name = wait_for_ctrl_c() => name,
    }
}

/// Windows fallback - only handles Ctrl+C
#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        logger::log_error(&format!("Failed to listen for Ctrl+C: {e}"));
        // Without a signal source the server only stops through its handle
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

/// Shut `handle` down gracefully when a signal arrives
///
/// Spawns a background task; in-flight requests get `deadline` to finish.
pub fn shutdown_on_signal(handle: ServerHandle, deadline: Duration) {
    tokio::spawn(async move {
        let signal = wait_for_shutdown().await;
        logger::log_shutdown_signal(signal);
        if let Err(e) = handle.shutdown(deadline).await {
            logger::log_warning(&e.to_string());
        }
    });
}
