//! Composable request interceptors.
//!
//! A [`Middleware`] receives the request context and the next handler in the
//! chain. [`Pipeline::wrap`] nests the registered middlewares around a
//! terminal handler so that the first one registered is the outermost: its
//! pre-logic runs first and its post-logic runs last.

pub mod auth;
pub mod logging;
pub mod rate_limit;
pub mod redaction;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::concurrency::{CancellationToken, ConnectionId};
use crate::protocol::{RequestId, RpcError};

pub use auth::AuthMiddleware;
pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use redaction::{RedactionMiddleware, Redactor};

/// Outcome of a handler.
pub type HandlerResult = Result<Value, RpcError>;

/// Future produced by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Terminal or composed request handler.
pub type Handler = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

/// Everything a handler knows about the request it serves.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Method name.
    pub method: String,
    /// Parameters; an empty object when the client sent none.
    pub params: Value,
    /// Client id, `None` for notifications and `"id": null` requests.
    pub request_id: Option<RequestId>,
    /// Connection the message arrived on.
    pub connection: ConnectionId,
    /// Cancellation flag for this request.
    pub token: CancellationToken,
    /// Set for notifications, whose outcome is never sent back.
    pub notification: bool,
}

impl RequestContext {
    /// Context for a call not tied to any transport, e.g. from tests.
    #[must_use]
    pub fn detached(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            request_id: None,
            connection: ConnectionId(0),
            token: CancellationToken::detached(),
            notification: false,
        }
    }
}

/// Request interceptor.
pub trait Middleware: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Run around `next`. Errors from `next` must be passed through unchanged.
    fn handle(&self, ctx: RequestContext, next: Handler) -> HandlerFuture;
}

/// Box an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Ordered list of middlewares.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|m| m.name()))
            .finish()
    }
}

impl Pipeline {
    /// Empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `middleware` as the innermost layer so far.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    /// Builder form of [`Pipeline::push`].
    #[must_use]
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    /// Names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Compose every layer around `terminal`.
    ///
    /// Folds right to left; each wrapper owns its own `next`.
    #[must_use]
    pub fn wrap(&self, terminal: Handler) -> Handler {
        self.layers.iter().rev().fold(terminal, |next, layer| {
            let layer = Arc::clone(layer);
            Arc::new(move |ctx: RequestContext| layer.handle(ctx, Arc::clone(&next)))
        })
    }
}
