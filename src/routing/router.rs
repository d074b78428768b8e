//! Route table
//!
//! Routes are matched in registration order. Every route's handler is kept
//! pre-composed with the router's middleware, so dispatch does no composition
//! work; adding middleware recomposes all routes.

use std::collections::HashMap;

use hyper::Method;

use crate::error::RouteError;
use crate::handler::{compose, HandlerFunc, Middleware};

use super::matcher::PathPattern;

struct Route {
    pattern: PathPattern,
    /// `None` accepts any method
    method: Option<Method>,
    terminal: HandlerFunc,
    handler: HandlerFunc,
}

/// Outcome of resolving a request against the route table
#[derive(Debug)]
pub enum Resolution<'a> {
    Matched {
        handler: &'a HandlerFunc,
        params: HashMap<String, String>,
    },
    /// The path exists under other methods only
    MethodNotAllowed(Vec<String>),
    NotFound,
}

#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<Middleware>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: Vec<_> = self
            .routes
            .iter()
            .map(|r| {
                let method = r.method.as_ref().map_or("*", Method::as_str);
                format!("{method} {}", r.pattern.as_str())
            })
            .collect();
        f.debug_struct("Router")
            .field("routes", &routes)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` (or any method) on `pattern`
    pub fn route(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        handler: HandlerFunc,
    ) -> Result<(), RouteError> {
        let pattern = PathPattern::parse(pattern)?;
        self.routes.push(Route {
            handler: compose(&self.middleware, handler.clone()),
            pattern,
            method,
            terminal: handler,
        });
        Ok(())
    }

    /// Append middleware; it wraps every route, including ones added later
    pub fn use_middleware(&mut self, middleware: impl IntoIterator<Item = Middleware>) {
        self.middleware.extend(middleware);
        for route in &mut self.routes {
            route.handler = compose(&self.middleware, route.terminal.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the handler for `method` and `path`
    ///
    /// `HEAD` falls back to a `GET` route on the same path when no explicit
    /// `HEAD` route matches.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_> {
        if let Some(found) = self.find(method, path) {
            return found;
        }
        if method == Method::HEAD {
            if let Some(found) = self.find(&Method::GET, path) {
                return found;
            }
        }

        let mut allowed: Vec<String> = Vec::new();
        for route in &self.routes {
            if let Some(m) = &route.method {
                if route.pattern.is_match(path) && !allowed.iter().any(|a| a == m.as_str()) {
                    allowed.push(m.as_str().to_string());
                }
            }
        }
        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::MethodNotAllowed(allowed)
        }
    }

    fn find(&self, method: &Method, path: &str) -> Option<Resolution<'_>> {
        self.routes
            .iter()
            .filter(|r| r.method.as_ref().map_or(true, |m| m == method))
            .find_map(|r| {
                r.pattern.captures(path).map(|params| Resolution::Matched {
                    handler: &r.handler,
                    params,
                })
            })
    }
}
