//! Request handler module
//!
//! Handler and middleware types plus middleware composition. A handler
//! receives the request's [`Context`] by value; a middleware wraps one handler
//! into another.

mod chain;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use chain::{compose, middleware, middleware_fn};

use crate::context::Context;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Type-erased request handler
#[derive(Clone)]
pub struct HandlerFunc(Arc<dyn Fn(Context) -> BoxFuture + Send + Sync>);

impl HandlerFunc {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn call(&self, ctx: Context) -> BoxFuture {
        (self.0)(ctx)
    }
}

impl std::fmt::Debug for HandlerFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HandlerFunc")
    }
}

/// Wraps a handler into another handler
pub type Middleware = Arc<dyn Fn(HandlerFunc) -> HandlerFunc + Send + Sync>;
