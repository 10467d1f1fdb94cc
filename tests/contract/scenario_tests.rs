//! Wire-exact request/response contracts for the core scenarios.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Value};

use mcp_capability_server::builtin;
use mcp_capability_server::router::Router;
use mcp_capability_server::{GlobalConfig, Server};

fn server(config: GlobalConfig) -> Server {
    let registry = builtin::registry(&config).expect("built-ins");
    Server::new(config, registry).expect("server")
}

async fn exchange(router: &Router, frame: &str) -> Value {
    let conn = router.open_connection();
    let response = router.handle_frame(conn, frame).await.expect("a response");
    serde_json::to_value(&response).expect("serialize")
}

#[tokio::test]
async fn tools_list_returns_every_registered_tool() {
    let server = server(GlobalConfig::default());

    let value = exchange(
        server.router(),
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#,
    )
    .await;

    assert_eq!(value["jsonrpc"], json!("2.0"));
    assert_eq!(value["id"], json!(1));
    assert!(value.get("error").is_none());
    let tools = value["result"]["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), server.registry().tool_count());
    for tool in tools {
        assert!(tool["name"].is_string());
        assert!(tool["description"].is_string());
        assert!(tool["inputSchema"].is_object());
    }
}

#[tokio::test]
async fn unknown_method_is_answered_exactly() {
    let server = server(GlobalConfig::default());

    let value = exchange(server.router(), r#"{"jsonrpc":"2.0","id":2,"method":"foo/bar"}"#).await;

    assert_eq!(
        value,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {
                "code": -32601,
                "message": "Method not found: foo/bar",
                "data": { "method": "foo/bar" },
            },
        })
    );
}

#[tokio::test]
async fn malformed_frame_then_valid_frame() {
    let server = server(GlobalConfig::default());
    let router = server.router();
    let conn = router.open_connection();

    let bad = router
        .handle_frame(conn, "{not json")
        .await
        .expect("parse error response");
    let bad = serde_json::to_value(&bad).expect("serialize");
    assert_eq!(bad["id"], Value::Null);
    assert_eq!(bad["error"]["code"], json!(-32700));
    assert_eq!(bad["error"]["message"], json!("Parse error"));

    let good = router
        .handle_frame(conn, r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#)
        .await
        .expect("ping response");
    assert_eq!(
        serde_json::to_value(&good).expect("serialize"),
        json!({ "jsonrpc": "2.0", "id": 3, "result": {} })
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_reports_timeout_and_releases_slot() {
    let mut config = GlobalConfig::default();
    config.concurrency.max_concurrent = 2;
    config.concurrency.method_timeouts_ms = HashMap::from([("tools/call".to_owned(), 100)]);
    let server = server(config);
    let router = server.router();

    let value = exchange(
        router,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"delay","arguments":{"ms":5000}}}"#,
    )
    .await;
    assert_eq!(value["id"], json!(4));
    assert_eq!(value["error"]["code"], json!(-32004));
    assert_eq!(router.active_count(), 0);

    let follow_ups = (5..7).map(|id| {
        let frame = format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"tools/call","params":{{"name":"delay","arguments":{{"ms":10}}}}}}"#
        );
        async move { exchange(router, &frame).await }
    });
    for value in join_all(follow_ups).await {
        assert!(value.get("result").is_some(), "admitted after timeout: {value}");
    }

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(router.active_count(), 0);
}
