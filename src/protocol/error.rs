//! Wire-level JSON-RPC error taxonomy.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Closed set of error codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Input was not a JSON object.
    ParseError,
    /// Envelope failed validation.
    InvalidRequest,
    /// No handler is registered under the method name.
    MethodNotFound,
    /// Parameters did not satisfy the handler's contract.
    InvalidParams,
    /// Unexpected failure inside the server.
    InternalError,
    /// Admission refused: capacity, rate limit, queue, or auth.
    ServerError,
    /// The client asked for a capability this server does not offer.
    CapabilityNotSupported,
    /// No resource pattern matches the requested URI.
    ResourceNotFound,
    /// A tool ran and failed.
    ToolExecutionFailed,
    /// The handler exceeded its deadline.
    Timeout,
    /// The request was cancelled before completing.
    Cancelled,
}

impl ErrorCode {
    /// Numeric code carried on the wire.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError => -32000,
            Self::CapabilityNotSupported => -32001,
            Self::ResourceNotFound => -32002,
            Self::ToolExecutionFailed => -32003,
            Self::Timeout => -32004,
            Self::Cancelled => -32005,
        }
    }

    /// Reverse lookup of [`ErrorCode::code`].
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ServerError,
            -32001 => Self::CapabilityNotSupported,
            -32002 => Self::ResourceNotFound,
            -32003 => Self::ToolExecutionFailed,
            -32004 => Self::Timeout,
            -32005 => Self::Cancelled,
            _ => return None,
        })
    }
}

/// JSON-RPC error object: `{code, message, data?}`.
///
/// `code` is kept as a raw integer so that error responses received from a
/// peer with codes outside [`ErrorCode`] still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable summary.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error from a taxonomy code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Taxonomy entry for this error, if the code is one the server knows.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    /// The input was not a JSON object.
    #[must_use]
    pub fn parse_error(detail: impl Display) -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
            .with_data(json!({ "detail": detail.to_string() }))
    }

    /// The envelope is structurally wrong.
    #[must_use]
    pub fn invalid_request(detail: impl Display) -> Self {
        Self::new(ErrorCode::InvalidRequest, format!("Invalid request: {detail}"))
    }

    /// No handler for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
        .with_data(json!({ "method": method }))
    }

    /// Parameters violate the handler's input contract.
    #[must_use]
    pub fn invalid_params(detail: impl Display) -> Self {
        Self::new(ErrorCode::InvalidParams, format!("Invalid params: {detail}"))
    }

    /// Unexpected server-side failure.
    #[must_use]
    pub fn internal(detail: impl Display) -> Self {
        Self::new(ErrorCode::InternalError, format!("Internal error: {detail}"))
    }

    /// The request tracker has no free slot.
    #[must_use]
    pub fn at_capacity(active: usize, max: usize) -> Self {
        Self::new(ErrorCode::ServerError, "Server at capacity").with_data(json!({
            "reason": "at_capacity",
            "activeRequests": active,
            "maxConcurrent": max,
        }))
    }

    /// The bounded admission queue stayed full past its timeout.
    #[must_use]
    pub fn queue_full(queued: usize, capacity: usize) -> Self {
        Self::new(ErrorCode::ServerError, "Server at capacity").with_data(json!({
            "reason": "queue_full",
            "queued": queued,
            "maxQueueSize": capacity,
        }))
    }

    /// The method's token bucket is empty.
    #[must_use]
    pub fn rate_limited(method: &str) -> Self {
        Self::new(ErrorCode::ServerError, "Rate limit exceeded").with_data(json!({
            "reason": "rate_limited",
            "method": method,
        }))
    }

    /// Missing or unknown auth token.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::ServerError, "Unauthorized")
            .with_data(json!({ "reason": "unauthorized" }))
    }

    /// The client requested something this server does not implement.
    #[must_use]
    pub fn capability_not_supported(capability: &str) -> Self {
        Self::new(
            ErrorCode::CapabilityNotSupported,
            format!("Capability not supported: {capability}"),
        )
    }

    /// No resource pattern matches `uri`.
    #[must_use]
    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("Resource not found: {uri}"),
        )
        .with_data(json!({ "uri": uri }))
    }

    /// A tool ran and reported failure.
    #[must_use]
    pub fn tool_execution_failed(tool: &str, detail: impl Display) -> Self {
        Self::new(
            ErrorCode::ToolExecutionFailed,
            format!("Tool execution failed: {detail}"),
        )
        .with_data(json!({ "tool": tool }))
    }

    /// The handler for `method` did not finish within `after`.
    #[must_use]
    pub fn timeout(method: &str, after: Duration) -> Self {
        Self::new(ErrorCode::Timeout, "Request timed out").with_data(json!({
            "method": method,
            "timeoutMs": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }))
    }

    /// The request was cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Request cancelled")
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}
