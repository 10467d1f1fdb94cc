//! Shared construction helpers for router- and transport-level tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use mcp_capability_server::builtin;
use mcp_capability_server::concurrency::{CancellationToken, ConnectionId};
use mcp_capability_server::config::GlobalConfig;
use mcp_capability_server::protocol::{Request, RequestId, Response, RpcError};
use mcp_capability_server::registry::{CapabilityRegistry, FnTool, ToolDefinition};
use mcp_capability_server::router::Router;
use mcp_capability_server::server::Server;

/// Default configuration with a given concurrency limit and an optional
/// `tools/call` deadline.
pub fn test_config(max_concurrent: usize, call_timeout: Option<Duration>) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.concurrency.max_concurrent = max_concurrent;
    if let Some(after) = call_timeout {
        let mut overrides = HashMap::new();
        overrides.insert(
            "tools/call".to_owned(),
            u64::try_from(after.as_millis()).expect("fits"),
        );
        config.concurrency.method_timeouts_ms = overrides;
    }
    config
}

/// Built-ins plus `stubborn_sleep` (ignores cancellation) and `explode`
/// (panics).
pub fn test_registry(config: &GlobalConfig) -> CapabilityRegistry {
    let mut registry = builtin::registry(config).expect("built-ins");
    registry
        .register_tool(Arc::new(FnTool::new(
            ToolDefinition {
                name: "stubborn_sleep".into(),
                description: "Sleep for `ms` without checking cancellation.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "ms": { "type": "integer" } },
                    "required": ["ms"],
                }),
            },
            stubborn_sleep,
        )))
        .expect("stubborn_sleep");
    registry
        .register_tool(Arc::new(FnTool::new(
            ToolDefinition {
                name: "explode".into(),
                description: "Panic.".into(),
                input_schema: json!({ "type": "object" }),
            },
            explode,
        )))
        .expect("explode");
    registry
}

async fn stubborn_sleep(arguments: Value, _token: CancellationToken) -> Result<Value, RpcError> {
    let ms = arguments["ms"].as_u64().unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(json!({ "sleptMs": ms }))
}

async fn explode(_arguments: Value, _token: CancellationToken) -> Result<Value, RpcError> {
    panic!("tool exploded");
}

/// Server over [`test_registry`] with the default middleware stack.
pub fn test_server(config: GlobalConfig) -> Server {
    let registry = test_registry(&config);
    Server::new(config, registry).expect("server builds")
}

/// Router of [`test_server`].
pub fn test_router(config: GlobalConfig) -> Router {
    test_server(config).router().clone()
}

/// `tools/call` request for `name` with `arguments`.
pub fn call_tool(id: i64, name: &str, arguments: Value) -> Request {
    Request::new(
        id,
        "tools/call",
        Some(json!({ "name": name, "arguments": arguments })),
    )
}

/// Send `request` on `connection` and return the response.
pub async fn send(router: &Router, connection: ConnectionId, request: Request) -> Response {
    router.handle_request(connection, request).await
}

/// Error code of `response`, panicking on success.
pub fn error_code(response: &Response) -> i64 {
    response
        .error_value()
        .unwrap_or_else(|| panic!("expected error, got {response:?}"))
        .code
}

/// Poll `condition` until it holds or a second passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

/// Request id helper.
pub fn id(n: i64) -> Option<RequestId> {
    Some(RequestId::Number(n))
}
