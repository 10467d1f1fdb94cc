//! Shared-token authentication middleware.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::{Handler, HandlerFuture, Middleware, RequestContext};
use crate::protocol::RpcError;

/// Requires `params.auth_token` (or `params._meta.authToken`) to be in the
/// allow-list.
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    tokens: Arc<HashSet<String>>,
}

impl AuthMiddleware {
    /// Accept only the given tokens.
    #[must_use]
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: Arc::new(tokens.into_iter().collect()),
        }
    }
}

/// Token carried by `params`, if any.
#[must_use]
pub fn presented_token(params: &Value) -> Option<&str> {
    params
        .get("auth_token")
        .or_else(|| params.get("_meta").and_then(|meta| meta.get("authToken")))
        .and_then(Value::as_str)
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn handle(&self, ctx: RequestContext, next: Handler) -> HandlerFuture {
        let allowed = presented_token(&ctx.params).is_some_and(|t| self.tokens.contains(t));
        if !allowed {
            warn!(method = %ctx.method, connection = %ctx.connection, "rejected unauthenticated request");
            return Box::pin(async { Err(RpcError::unauthorized()) });
        }
        next(ctx)
    }
}
