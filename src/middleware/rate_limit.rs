//! Per-method rate limiting middleware.

use std::sync::Arc;

use tracing::warn;

use super::{Handler, HandlerFuture, Middleware, RequestContext};
use crate::concurrency::RateLimiterRegistry;
use crate::protocol::RpcError;

/// Rejects a call when its method's token bucket is empty.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiters: Arc<RateLimiterRegistry>,
}

impl RateLimitMiddleware {
    /// Enforce the buckets in `limiters`.
    #[must_use]
    pub fn new(limiters: Arc<RateLimiterRegistry>) -> Self {
        Self { limiters }
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn handle(&self, ctx: RequestContext, next: Handler) -> HandlerFuture {
        let limiters = Arc::clone(&self.limiters);
        Box::pin(async move {
            if !limiters.acquire(&ctx.method).await {
                warn!(method = %ctx.method, "rate limit exceeded");
                return Err(RpcError::rate_limited(&ctx.method));
            }
            next(ctx).await
        })
    }
}
