//! Middleware pipeline — composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit errors, and reply decoration without coupling handlers to
//! infrastructure concerns. The innermost layer is always the route's handler.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] — converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`LoggerMiddleware`] — built-in request logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::context::Context;
use crate::http::HandlerResult;
use crate::router::Handler;

/// Boxed future every middleware layer resolves to.
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation. Once every middleware has run, the
/// endpoint handler is invoked.
///
/// # Examples
///
/// ```rust,no_run
/// use switchyard::context::Context;
/// use switchyard::middleware::{Middleware, MiddlewareFuture, Next};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
    endpoint: Handler,
}

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use switchyard::context::Context;
/// use switchyard::middleware::{MiddlewareFuture, MiddlewareHandler, Next};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| -> MiddlewareFuture {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> MiddlewareFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use switchyard::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(Arc::new(LoggerMiddleware));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a cursor at the start of `middlewares`, ending in `endpoint`.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>, endpoint: Handler) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next middleware in the chain, or the endpoint handler when
    /// the chain is exhausted.
    pub async fn run(mut self, ctx: Context) -> HandlerResult {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return an error or reply directly without calling `next`.
/// - **Decorate** — call `next.run(ctx).await` and adjust what comes back.
///
/// Implementations are shared across connection tasks, hence `Send + Sync`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture;
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` event after the downstream handler completes.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method();
            let path = ctx.request().path().to_owned();

            let result = next.run(ctx).await;

            let status = match &result {
                Ok(reply) => reply.status(),
                Err(err) => err.status,
            };
            tracing::info!(
                %method,
                %path,
                status = status.as_u16(),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Parameters;
    use crate::http::{HttpError, Reply, Request};
    use std::sync::Mutex;

    fn context() -> Context {
        let request = Request::from_head(b"GET /items HTTP/1.1\r\n").unwrap();
        Context::new(request, Parameters::new())
    }

    fn endpoint() -> Handler {
        Arc::new(|_ctx: Context| -> MiddlewareFuture {
            Box::pin(async { Ok(Reply::from("endpoint")) })
        })
    }

    fn recording(label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> MiddlewareHandler {
        Arc::new(move |ctx: Context, next: Next| -> MiddlewareFuture {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(label);
                next.run(ctx).await
            })
        })
    }

    #[tokio::test]
    async fn empty_chain_calls_endpoint() {
        let result = Next::new(Vec::<MiddlewareHandler>::new(), endpoint()).run(context()).await;
        assert!(matches!(result, Ok(Reply::Text(t)) if t == "endpoint"));
    }

    #[tokio::test]
    async fn middlewares_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            recording("first", Arc::clone(&log)),
            recording("second", Arc::clone(&log)),
        ];

        let result = Next::new(chain, endpoint()).run(context()).await;
        assert!(result.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let deny: MiddlewareHandler = Arc::new(|_ctx: Context, _next: Next| -> MiddlewareFuture {
            Box::pin(async { Err(HttpError::new(crate::StatusCode::Forbidden)) })
        });

        let result = Next::new(vec![deny], endpoint()).run(context()).await;
        assert!(matches!(result, Err(e) if e.status == crate::StatusCode::Forbidden));
    }

    #[tokio::test]
    async fn logger_passes_result_through() {
        let chain = vec![from_middleware(Arc::new(LoggerMiddleware))];
        let result = Next::new(chain, endpoint()).run(context()).await;
        assert!(matches!(result, Ok(Reply::Text(_))));
    }
}
