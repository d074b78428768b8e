// Configuration types module
// Defines all configuration-related data structures

use serde::{Deserialize, Serialize};

use crate::db::DriverKind;
use crate::error::DbError;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: bool,
    /// Time allowed to receive request headers, idle keep-alive included, in seconds
    pub request_timeout: u64,
    pub max_body_size: u64,
    /// Deadline used by the binary for graceful shutdown, in seconds
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: true,
            request_timeout: 60,
            max_body_size: 10_485_760, // 10MB
            shutdown_timeout: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            access_log: true,
        }
    }
}

/// Database connection configuration
///
/// Values are collaborators for [`crate::db::DriverHandle::open`]; nothing in the
/// query path reads them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: Option<u16>,
    pub name: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "mysql".to_string(),
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: None,
            name: String::new(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    /// Parse the configured driver name
    pub fn driver_kind(&self) -> Result<DriverKind, DbError> {
        self.driver.parse()
    }

    /// Configured port, or the driver's well-known port when unset
    pub fn effective_port(&self, kind: DriverKind) -> u16 {
        self.port.unwrap_or_else(|| kind.default_port())
    }

    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }
}

/// Session and cookie secrets, hex encoded 32-byte keys
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub store_key: Option<String>,
    pub cookie_hash_key: Option<String>,
    pub cookie_block_key: Option<String>,
    /// Lifetime accepted by the codecs, in seconds
    pub cookie_max_age: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_key: None,
            cookie_hash_key: None,
            cookie_block_key: None,
            cookie_max_age: 86_400 * 30,
        }
    }
}
