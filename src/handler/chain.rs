//! Middleware composition
//!
//! `compose(&[a, b], h)` yields `a(b(h))`: index 0 is the outermost layer,
//! so for a request the order is `a-enter, b-enter, h, b-exit, a-exit`.

use std::future::Future;
use std::sync::Arc;

use super::{HandlerFunc, Middleware};
use crate::context::Context;

/// Fold `middleware` right to left around `terminal`
pub fn compose(middleware: &[Middleware], terminal: HandlerFunc) -> HandlerFunc {
    middleware
        .iter()
        .rev()
        .fold(terminal, |next, mw| mw(next))
}

/// Box a handler transform as [`Middleware`]
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(HandlerFunc) -> HandlerFunc + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Middleware written as an async function of the context and the next handler
///
/// Not awaiting `next` short-circuits everything inside this layer.
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, HandlerFunc) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: HandlerFunc| {
        let f = Arc::clone(&f);
        HandlerFunc::new(move |ctx| f(ctx, next.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn tracing_layer(name: &'static str, trace: &Trace) -> Middleware {
        let trace = Arc::clone(trace);
        middleware_fn(move |ctx, next| {
            let trace = Arc::clone(&trace);
            async move {
                trace.lock().push(format!("{name}-enter"));
                next.call(ctx).await;
                trace.lock().push(format!("{name}-exit"));
            }
        })
    }

    fn recording_handler(trace: &Trace) -> HandlerFunc {
        let trace = Arc::clone(trace);
        HandlerFunc::new(move |_ctx| {
            let trace = Arc::clone(&trace);
            async move { trace.lock().push("H".to_string()) }
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let trace = Trace::default();
        let chain = compose(
            &[tracing_layer("A", &trace), tracing_layer("B", &trace)],
            recording_handler(&trace),
        );
        chain.call(test_context()).await;
        assert_eq!(
            *trace.lock(),
            vec!["A-enter", "B-enter", "H", "B-exit", "A-exit"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let trace = Trace::default();
        let blocker = {
            let trace = Arc::clone(&trace);
            middleware_fn(move |_ctx, _next| {
                let trace = Arc::clone(&trace);
                async move { trace.lock().push("deny".to_string()) }
            })
        };
        let chain = compose(
            &[blocker, tracing_layer("B", &trace)],
            recording_handler(&trace),
        );
        chain.call(test_context()).await;
        assert_eq!(*trace.lock(), vec!["deny"]);
    }

    #[tokio::test]
    async fn test_empty_chain_is_terminal() {
        let trace = Trace::default();
        compose(&[], recording_handler(&trace))
            .call(test_context())
            .await;
        assert_eq!(*trace.lock(), vec!["H"]);
    }

    #[tokio::test]
    async fn test_sync_transform() {
        let trace = Trace::default();
        let wrap = {
            let trace = Arc::clone(&trace);
            middleware(move |next| {
                let trace = Arc::clone(&trace);
                trace.lock().push("composed".to_string());
                next
            })
        };
        let chain = compose(&[wrap], recording_handler(&trace));
        chain.call(test_context()).await;
        assert_eq!(*trace.lock(), vec!["composed", "H"]);
    }
}
