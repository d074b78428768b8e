//! Logger module
//!
//! Installs the `tracing` subscriber and provides the named logging helpers
//! used across the server:
//! - Server lifecycle logging
//! - Access logging, one line per request
//! - Error and warning logging

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static ACCESS_LOG: AtomicBool = AtomicBool::new(true);

/// Initialize the logger with configuration
///
/// Should be called once at application startup. `RUST_LOG` takes precedence
/// over `logging.level` when set. Returns false if a subscriber was
/// already installed.
pub fn init(config: &LoggingConfig) -> bool {
    ACCESS_LOG.store(config.access_log, Ordering::Relaxed);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

pub fn log_server_start(addr: &SocketAddr, driver: &str) {
    tracing::info!("======================================");
    tracing::info!("Server started successfully");
    tracing::info!("Listening on: http://{addr}");
    if driver.is_empty() {
        tracing::info!("Database: not configured");
    } else {
        tracing::info!("Database driver: {driver}");
    }
    tracing::info!("======================================");
}

pub fn log_server_stopped(graceful: bool) {
    if graceful {
        tracing::info!("[Shutdown] All connections drained");
    } else {
        tracing::info!("[Shutdown] Listener closed, connections dropped");
    }
}

pub fn log_shutdown_signal(signal: &str) {
    tracing::info!("[Shutdown] Received {signal}, shutting down gracefully");
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    tracing::error!("[ERROR] Failed to serve connection: {err:?}");
}

pub fn log_error(message: &str) {
    tracing::error!("[ERROR] {message}");
}

pub fn log_warning(message: &str) {
    tracing::warn!("[WARN] {message}");
}

/// Log one access line if the access log is enabled
pub fn log_access(method: &str, path: &str, status: u16, body_bytes: usize, elapsed: Duration) {
    if !ACCESS_LOG.load(Ordering::Relaxed) {
        return;
    }
    tracing::info!(
        "{method} {path} {status} {body_bytes}B {:.3}ms",
        elapsed.as_secs_f64() * 1000.0
    );
}
