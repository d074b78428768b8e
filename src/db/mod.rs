//! Database layer
//!
//! A [`DriverHandle`] owns at most one live connection, either MySQL or Postgres,
//! and exposes one driver-agnostic query surface over it (see [`facade`]).
//!
//! The handle is configured on the unstarted server and frozen once the listener
//! starts, so opening or switching drivers while requests are in flight cannot
//! happen. Query execution itself is not synchronized; both drivers' handles are
//! safe for concurrent use.

mod backend;
mod facade;
pub mod mysql;
pub mod postgres;
mod value;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use backend::{Backend, ExecSummary, Rows, SingleRow};
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use value::{FromSqlValue, Row, RowIndex, SqlValue};

use crate::config::DatabaseConfig;
use crate::error::DbError;

/// Which relational backend a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverKind {
    #[default]
    None,
    MySql,
    Postgres,
}

impl DriverKind {
    /// Name reported by [`DriverHandle::driver_name`]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Self::MySql | Self::None => 3306,
            Self::Postgres => 5432,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl FromStr for DriverKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pgx" => Ok(Self::Postgres),
            other => Err(DbError::DriverDispatch(other.to_string())),
        }
    }
}

/// The active connection, tagged by driver
#[derive(Clone, Default)]
enum Driver {
    #[default]
    None,
    MySql(Arc<dyn Backend>),
    Postgres(Arc<dyn Backend>),
}

/// Server-wide database handle
#[derive(Clone, Default)]
pub struct DriverHandle {
    driver: Driver,
}

impl DriverHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn kind(&self) -> DriverKind {
        match self.driver {
            Driver::None => DriverKind::None,
            Driver::MySql(_) => DriverKind::MySql,
            Driver::Postgres(_) => DriverKind::Postgres,
        }
    }

    /// `"mysql"`, `"postgres"`, or empty when no driver is installed
    pub const fn driver_name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub const fn is_open(&self) -> bool {
        !matches!(self.driver, Driver::None)
    }

    /// Install an already-connected backend, replacing any previous driver
    ///
    /// The previous connection is dropped, not closed; call [`Self::close`]
    /// first to release it explicitly.
    pub fn set_driver(&mut self, kind: DriverKind, backend: Arc<dyn Backend>) -> Result<(), DbError> {
        self.driver = match kind {
            DriverKind::MySql => Driver::MySql(backend),
            DriverKind::Postgres => Driver::Postgres(backend),
            DriverKind::None => {
                return Err(DbError::DriverDispatch(
                    "cannot install a connection without a driver kind".to_string(),
                ))
            }
        };
        tracing::debug!(driver = %kind, "database driver installed");
        Ok(())
    }

    /// Install a MySQL pool
    pub fn set_mysql(&mut self, pool: sqlx::MySqlPool) {
        self.driver = Driver::MySql(Arc::new(MySqlBackend::new(pool)));
    }

    /// Install a Postgres client whose connection task is driven by the caller
    pub fn set_postgres(&mut self, client: tokio_postgres::Client) {
        self.driver = Driver::Postgres(Arc::new(PostgresBackend::new(client)));
    }

    /// Connect to the configured database and install the connection
    ///
    /// Must be called before the server starts.
    pub async fn open(&mut self, kind: DriverKind, config: &DatabaseConfig) -> Result<(), DbError> {
        let backend: Arc<dyn Backend> = match kind {
            DriverKind::MySql => Arc::new(MySqlBackend::connect(config).await?),
            DriverKind::Postgres => Arc::new(PostgresBackend::connect(config).await?),
            DriverKind::None => return Err(DbError::DriverDispatch(kind.to_string())),
        };
        self.set_driver(kind, backend)?;
        tracing::info!(driver = %kind, host = %config.host, db = %config.name, "database connection opened");
        Ok(())
    }

    /// Release the active connection; a no-op when none is installed
    pub async fn close(&mut self) {
        let kind = self.kind();
        match std::mem::take(&mut self.driver) {
            Driver::None => {}
            Driver::MySql(backend) | Driver::Postgres(backend) => {
                backend.close().await;
                tracing::info!(driver = %kind, "database connection closed");
            }
        }
    }
}

impl DriverHandle {
    /// Close the active connection through a shared handle
    ///
    /// Used once the handle is frozen behind the running server. The kind is
    /// left unchanged, so later calls fail with the driver's closed error.
    pub async fn release(&self) {
        match &self.driver {
            Driver::None => {}
            Driver::MySql(backend) | Driver::Postgres(backend) => {
                backend.close().await;
                tracing::info!(driver = %self.kind(), "database connection released");
            }
        }
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("kind", &self.kind())
            .finish()
    }
}
