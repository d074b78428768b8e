// Configuration module entry point
// Builds the server configuration once at startup from file, defaults and environment

mod types;

use std::net::SocketAddr;

pub use types::{Config, DatabaseConfig, LoggingConfig, ServerConfig, SessionConfig};

use crate::error::ConfigError;

/// Default config file looked up when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "way";

/// Environment variables mapped onto configuration keys
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("WAY_HOST", "server.host"),
    ("WAY_PORT", "server.port"),
    ("WAY_LOG_LEVEL", "logging.level"),
    ("WAY_DB_TYPE", "database.driver"),
    ("WAY_DB_USER", "database.user"),
    ("WAY_DB_PASSWORD", "database.password"),
    ("WAY_DB_HOST", "database.host"),
    ("WAY_DB_PORT", "database.port"),
    ("WAY_DB_NAME", "database.name"),
    ("WAY_SESSION_KEY", "session.store_key"),
    ("WAY_COOKIE_HASH_KEY", "session.cookie_hash_key"),
    ("WAY_COOKIE_BLOCK_KEY", "session.cookie_block_key"),
];

impl Config {
    /// Load configuration from `way.toml` (optional) and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified file path (without extension)
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Load configuration with an explicit environment lookup
    ///
    /// Empty variables count as unset, so the documented defaults apply.
    pub fn load_with_env<F>(config_path: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.keep_alive", true)?
            .set_default("server.request_timeout", 60)?
            .set_default("server.max_body_size", 10_485_760)? // 10MB
            .set_default("server.shutdown_timeout", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("database.driver", "mysql")?
            .set_default("database.user", "")?
            .set_default("database.password", "")?
            .set_default("database.host", "")?
            .set_default("database.name", "")?
            .set_default("database.max_connections", 10)?
            .set_default("session.cookie_max_age", 86_400 * 30)?;

        for (var, key) in ENV_OVERRIDES {
            match env(var).filter(|v| !v.is_empty()) {
                Some(value) => builder = builder.set_override(*key, value)?,
                None => tracing::debug!(var, "environment variable not set"),
            }
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Address {
            reason: e.to_string(),
            addr,
        })
    }
}
