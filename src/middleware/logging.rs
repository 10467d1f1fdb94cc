//! Request logging middleware.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::{Handler, HandlerFuture, Middleware, Redactor, RequestContext};

/// Logs method, parameter size, duration and outcome of every call.
///
/// Error messages pass through the [`Redactor`] before they are logged.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    redactor: Arc<Redactor>,
}

impl LoggingMiddleware {
    /// Log failures through `redactor`.
    #[must_use]
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn handle(&self, ctx: RequestContext, next: Handler) -> HandlerFuture {
        let method = ctx.method.clone();
        let request_id = ctx
            .request_id
            .as_ref()
            .map_or_else(|| "-".to_owned(), ToString::to_string);
        let param_bytes = serde_json::to_vec(&ctx.params).map_or(0, |b| b.len());
        let notification = ctx.notification;
        let redactor = Arc::clone(&self.redactor);

        Box::pin(async move {
            let started = Instant::now();
            let outcome = next(ctx).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &outcome {
                Ok(_) => info!(
                    method,
                    request_id,
                    param_bytes,
                    duration_ms,
                    notification,
                    "request succeeded"
                ),
                Err(err) => warn!(
                    method,
                    request_id,
                    param_bytes,
                    duration_ms,
                    notification,
                    code = err.code,
                    error = %redactor.redact_str(&err.message),
                    "request failed"
                ),
            }
            outcome
        })
    }
}
