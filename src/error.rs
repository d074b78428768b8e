//! Error types
//!
//! Each concern owns its error enum; [`Error`] aggregates them for callers that
//! only need to bubble failures up (the binary, startup code).

use thiserror::Error;

use crate::db::DriverKind;

/// Errors raised by the driver handle and the query facade
#[derive(Debug, Error)]
pub enum DbError {
    /// Dial, authentication or liveness probe failed while opening a connection
    #[error("failed to connect to {driver} database: {source}")]
    Connection {
        driver: DriverKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A query was issued before any driver was installed
    #[error("database connection is not initialized")]
    Uninitialized,

    /// The requested driver is not one this handle can dispatch to
    #[error("unsupported database driver: {0}")]
    DriverDispatch(String),

    #[error("no rows in result set")]
    NoRows,

    #[error("column {0} not found in row")]
    ColumnNotFound(String),

    #[error("cannot decode column {column}: {reason}")]
    Decode { column: String, reason: String },

    #[error("mysql: {0}")]
    MySql(#[from] sqlx::Error),

    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

impl DbError {
    pub(crate) fn connection(
        driver: DriverKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Connection {
            driver,
            source: source.into(),
        }
    }
}

/// Errors raised while encoding, decoding or reading cookies
#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie {0} not present in request")]
    Missing(String),

    #[error("cookie {name} failed verification: {reason}")]
    Decode { name: String, reason: String },

    #[error("cookie {0} has expired")]
    Expired(String),

    #[error("no cookie codec registered under {0}")]
    UnknownCodec(String),

    #[error("no session store registered under {0}")]
    UnknownStore(String),

    #[error("cannot encode cookie {name}: {reason}")]
    Encode { name: String, reason: String },
}

impl CookieError {
    /// Whether the error means the cookie could not be trusted or found
    pub const fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Missing(_) | Self::Decode { .. } | Self::Expired(_)
        )
    }
}

/// Errors from the context's symmetric crypto helpers
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: {0} bytes")]
    InvalidKey(usize),

    #[error("ciphertext is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("ciphertext is too short")]
    Truncated,

    #[error("encryption failed")]
    Seal,

    #[error("decryption failed: message was tampered with or the key is wrong")]
    Open,
}

/// Failure fetching a remote resource for a proxied response
#[derive(Debug, Error)]
pub enum UpstreamFetchError {
    #[error("invalid upstream url {url}: {reason}")]
    Url { url: String, reason: String },

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("reading upstream body failed: {0}")]
    Body(#[from] hyper::Error),

    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),
}

/// Errors detected while building configuration or seeding defaults
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid key in {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("{0} is set but its counterpart is missing")]
    IncompleteKeys(&'static str),

    #[error("invalid listen address {addr}: {reason}")]
    Address { addr: String, reason: String },
}

/// Errors detected while registering routes
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Errors from the server lifecycle
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server has been shut down")]
    Closed,

    #[error("graceful shutdown did not finish within {0:?}; remaining connections aborted")]
    ShutdownTimeout(std::time::Duration),
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Cookie(#[from] CookieError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
