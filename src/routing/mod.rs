//! Routing module
//!
//! Provides request routing capabilities including:
//! - Path patterns with `{name}` and `{name:regex}` variables
//! - Method-aware route tables with router-owned 404 and 405 responses
//! - The dispatcher that runs a matched route's middleware chain

mod dispatcher;
mod matcher;
mod router;

pub use dispatcher::Dispatcher;
pub use matcher::PathPattern;
pub use router::{Resolution, Router};
