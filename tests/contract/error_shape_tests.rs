//! Every error response carries `jsonrpc`, `id` and exactly one of
//! `result` / `error`, with the documented codes.

use serde_json::{json, Value};

use mcp_capability_server::builtin;
use mcp_capability_server::protocol::ErrorCode;
use mcp_capability_server::{GlobalConfig, Server};

async fn frame(raw: &str) -> Value {
    let config = GlobalConfig::default();
    let registry = builtin::registry(&config).expect("built-ins");
    let server = Server::new(config, registry).expect("server");
    let router = server.router();
    let conn = router.open_connection();
    let response = router.handle_frame(conn, raw).await.expect("answered");
    serde_json::to_value(&response).expect("serialize")
}

fn assert_envelope(value: &Value) {
    assert_eq!(value["jsonrpc"], json!("2.0"));
    assert!(value.get("id").is_some(), "id is always present: {value}");
    assert!(
        value.get("result").is_some() ^ value.get("error").is_some(),
        "exactly one of result/error: {value}"
    );
}

#[test]
fn documented_codes_are_stable() {
    assert_eq!(ErrorCode::ParseError.code(), -32700);
    assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
    assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
    assert_eq!(ErrorCode::InvalidParams.code(), -32602);
    assert_eq!(ErrorCode::InternalError.code(), -32603);
    assert_eq!(ErrorCode::ServerError.code(), -32000);
    assert_eq!(ErrorCode::CapabilityNotSupported.code(), -32001);
    assert_eq!(ErrorCode::ResourceNotFound.code(), -32002);
    assert_eq!(ErrorCode::ToolExecutionFailed.code(), -32003);
    assert_eq!(ErrorCode::Timeout.code(), -32004);
    assert_eq!(ErrorCode::Cancelled.code(), -32005);
}

#[tokio::test]
async fn error_responses_follow_the_envelope() {
    let cases = [
        ("{not json", -32700),
        (r#"{"jsonrpc":"2.0","id":1}"#, -32600),
        (r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":"x"}"#, -32600),
        (r#"{"jsonrpc":"2.0","id":1,"method":"nope"}"#, -32601),
        (r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#, -32602),
        (r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"x://y"}}"#, -32002),
    ];
    for (raw, code) in cases {
        let value = frame(raw).await;
        assert_envelope(&value);
        assert_eq!(value["error"]["code"], json!(code), "{raw}");
        assert!(value["error"]["message"].is_string());
    }
}

#[tokio::test]
async fn success_responses_follow_the_envelope() {
    for raw in [
        r#"{"jsonrpc":"2.0","id":"s","method":"ping"}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"prompts/list"}"#,
    ] {
        let value = frame(raw).await;
        assert_envelope(&value);
        assert!(value.get("error").is_none(), "{raw}");
    }
}
