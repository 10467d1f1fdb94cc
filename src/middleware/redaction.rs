//! Secret redaction for logged params and results.
//!
//! The middleware logs a redacted copy at debug level. The request passed
//! downstream and the result returned upstream are never modified.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{Handler, HandlerFuture, Middleware, RequestContext};
use crate::{AppError, Result};

/// Replacement for every redacted value.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// `key=value`, `key: value` and `"key": "value"` fragments inside strings.
const INLINE_SECRET_PATTERN: &str =
    r#"(?i)((?:api[_-]?key|[a-z_]*token|password|passwd|secret)"?\s*[:=]\s*"?)([^\s"&,;]+)"#;

/// Redacts secret-looking keys and inline secrets in JSON values.
#[derive(Debug, Clone)]
pub struct Redactor {
    inline: Regex,
}

impl Redactor {
    /// Build a redactor with the built-in patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the inline pattern fails to compile.
    pub fn new() -> Result<Self> {
        let inline = Regex::new(INLINE_SECRET_PATTERN)
            .map_err(|err| AppError::Config(format!("redaction pattern: {err}")))?;
        Ok(Self { inline })
    }

    /// Copy of `value` with secrets replaced by [`REDACTION_MARKER`].
    #[must_use]
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| {
                        if is_sensitive_key(key) {
                            (key.clone(), Value::String(REDACTION_MARKER.into()))
                        } else {
                            (key.clone(), self.redact(item))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::String(text) => Value::String(self.redact_str(text)),
            _ => value.clone(),
        }
    }

    /// `text` with inline secrets replaced.
    #[must_use]
    pub fn redact_str(&self, text: &str) -> String {
        self.inline
            .replace_all(text, format!("${{1}}{REDACTION_MARKER}"))
            .into_owned()
    }
}

/// Whether `key` names a secret (case-insensitive, compound names included).
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "apikey" | "api-key" | "authorization")
        || normalized.contains("api_key")
        || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
}

/// Logs redacted params before the call and the redacted result after it.
#[derive(Debug, Clone)]
pub struct RedactionMiddleware {
    redactor: Arc<Redactor>,
}

impl RedactionMiddleware {
    /// Log through `redactor`.
    #[must_use]
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl Middleware for RedactionMiddleware {
    fn name(&self) -> &'static str {
        "redaction"
    }

    fn handle(&self, ctx: RequestContext, next: Handler) -> HandlerFuture {
        let redactor = Arc::clone(&self.redactor);
        Box::pin(async move {
            let method = ctx.method.clone();
            if tracing::enabled!(tracing::Level::DEBUG) {
                debug!(method, params = %redactor.redact(&ctx.params), "request params");
            }
            let outcome = next(ctx).await;
            if tracing::enabled!(tracing::Level::DEBUG) {
                match &outcome {
                    Ok(result) => debug!(method, result = %redactor.redact(result), "request result"),
                    Err(err) => debug!(
                        method,
                        error = %redactor.redact_str(&err.message),
                        "request error"
                    ),
                }
            }
            outcome
        })
    }
}
