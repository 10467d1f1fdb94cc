//! Unit tests for `AppError` and the wire error constructors.

use std::time::Duration;

use serde_json::json;

use mcp_capability_server::protocol::{ErrorCode, RpcError};
use mcp_capability_server::AppError;

#[test]
fn app_error_display_is_prefixed_by_kind() {
    assert_eq!(
        AppError::Config("bad port".into()).to_string(),
        "config: bad port"
    );
    assert_eq!(
        AppError::Registry("duplicate tool: echo".into()).to_string(),
        "registry: duplicate tool: echo"
    );
    assert_eq!(
        AppError::Transport("bind failed".into()).to_string(),
        "transport: bind failed"
    );
}

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse: Result<toml::Value, _> = toml::from_str("not = [valid");
    let err: AppError = parse.expect_err("invalid toml").into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn method_not_found_names_the_method() {
    let err = RpcError::method_not_found("foo/bar");
    assert_eq!(err.code, -32601);
    assert_eq!(err.message, "Method not found: foo/bar");
    assert_eq!(err.data, Some(json!({ "method": "foo/bar" })));
}

#[test]
fn busy_errors_share_server_error_code_and_differ_by_reason() {
    let capacity = RpcError::at_capacity(10, 10);
    let queue = RpcError::queue_full(5, 5);
    let limited = RpcError::rate_limited("tools/call");
    let denied = RpcError::unauthorized();

    for (err, reason) in [
        (&capacity, "at_capacity"),
        (&queue, "queue_full"),
        (&limited, "rate_limited"),
        (&denied, "unauthorized"),
    ] {
        assert_eq!(err.code, ErrorCode::ServerError.code());
        assert_eq!(err.data.as_ref().and_then(|d| d.get("reason")), Some(&json!(reason)));
    }
    assert_eq!(capacity.data.as_ref().and_then(|d| d.get("maxConcurrent")), Some(&json!(10)));
}

#[test]
fn timeout_reports_method_and_milliseconds() {
    let err = RpcError::timeout("tools/call", Duration::from_millis(1500));
    assert_eq!(err.code, -32004);
    assert_eq!(
        err.data,
        Some(json!({ "method": "tools/call", "timeoutMs": 1500 }))
    );
}

#[test]
fn resource_not_found_carries_uri() {
    let err = RpcError::resource_not_found("file:///missing");
    assert_eq!(err.code, -32002);
    assert_eq!(err.kind(), Some(ErrorCode::ResourceNotFound));
    assert_eq!(err.data, Some(json!({ "uri": "file:///missing" })));
}

#[test]
fn rpc_error_display_includes_code() {
    assert_eq!(RpcError::cancelled().to_string(), "Request cancelled (-32005)");
}
