//! HTTP request dispatch over a dual-driver database layer
//!
//! A [`Way`] server binds routes to handlers, runs them through a middleware
//! chain with a per-request [`Context`], and gives every handler the same
//! query surface whether the database behind it is MySQL or Postgres.

pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handler;
pub mod http;
pub mod logger;
pub mod routing;
pub mod server;
pub mod session;

pub use config::Config;
pub use context::Context;
pub use db::{DriverHandle, DriverKind, ExecSummary, Row, Rows, SingleRow, SqlValue};
pub use error::{Error, Result};
pub use handler::{compose, middleware, middleware_fn, HandlerFunc, Middleware};
pub use http::Cookie;
pub use server::{BoundServer, ServerHandle, Way};
pub use session::{SessionRegistry, SessionValues};
