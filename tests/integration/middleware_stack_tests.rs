//! The default middleware stack as configured through `GlobalConfig`.

use std::sync::{Arc, Mutex};

use serde_json::json;

use mcp_capability_server::config::BucketConfig;
use mcp_capability_server::middleware::{
    handler, Handler, HandlerFuture, Middleware, RequestContext,
};
use mcp_capability_server::protocol::Request;
use mcp_capability_server::router::RouterBuilder;
use mcp_capability_server::server::Server;

use super::test_helpers::{error_code, test_config, test_registry, test_router};

#[tokio::test(start_paused = true)]
async fn per_method_rate_limit_refuses_excess_calls() {
    let mut config = test_config(4, None);
    config.rate_limit.methods.insert(
        "ping".to_owned(),
        BucketConfig {
            rate: 1.0,
            capacity: 1.0,
        },
    );
    let router = test_router(config);
    let conn = router.open_connection();

    let first = router.handle_request(conn, Request::new(1_i64, "ping", None)).await;
    assert!(first.result().is_some());

    let second = router.handle_request(conn, Request::new(2_i64, "ping", None)).await;
    assert_eq!(error_code(&second), -32000);
    assert_eq!(
        second.error_value().and_then(|e| e.data.clone()),
        Some(json!({ "reason": "rate_limited", "method": "ping" }))
    );

    let other = router.handle_request(conn, Request::new(3_i64, "tools/list", None)).await;
    assert!(other.result().is_some(), "other methods have their own bucket");

    tokio::time::advance(std::time::Duration::from_secs(1)).await;
    let refilled = router.handle_request(conn, Request::new(4_i64, "ping", None)).await;
    assert!(refilled.result().is_some());
}

#[tokio::test]
async fn disabled_rate_limit_never_refuses() {
    let mut config = test_config(4, None);
    config.rate_limit.enabled = false;
    config.rate_limit.methods.insert(
        "ping".to_owned(),
        BucketConfig {
            rate: 1.0,
            capacity: 1.0,
        },
    );
    let router = test_router(config);
    let conn = router.open_connection();

    for n in 0..5_i64 {
        let response = router.handle_request(conn, Request::new(n, "ping", None)).await;
        assert!(response.result().is_some());
    }
}

#[tokio::test]
async fn auth_rejects_requests_without_a_valid_token() {
    let mut config = test_config(4, None);
    config.auth.enabled = true;
    config.auth.tokens = vec!["letmein".to_owned()];
    let router = test_router(config);
    let conn = router.open_connection();

    let denied = router.handle_request(conn, Request::new(1_i64, "ping", None)).await;
    assert_eq!(error_code(&denied), -32000);

    let allowed = router
        .handle_request(
            conn,
            Request::new(2_i64, "ping", Some(json!({ "auth_token": "letmein" }))),
        )
        .await;
    assert!(allowed.result().is_some());

    let via_meta = router
        .handle_request(
            conn,
            Request::new(
                3_i64,
                "tools/call",
                Some(json!({
                    "name": "echo",
                    "arguments": { "message": "x" },
                    "_meta": { "authToken": "letmein" },
                })),
            ),
        )
        .await;
    assert!(via_meta.result().is_some(), "{via_meta:?}");
}

struct Tagging {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Tagging {
    fn name(&self) -> &'static str {
        "tagging"
    }

    fn handle(&self, ctx: RequestContext, next: Handler) -> HandlerFuture {
        self.seen.lock().unwrap().push(ctx.method.clone());
        next(ctx)
    }
}

#[tokio::test]
async fn custom_middleware_and_methods_compose_with_protocol_methods() {
    let config = test_config(4, None);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let builder = RouterBuilder::new(&config)
        .middleware(Arc::new(Tagging {
            seen: Arc::clone(&seen),
        }))
        .method(
            "custom/hello",
            handler(|ctx: RequestContext| async move { Ok(json!({ "hello": ctx.params })) }),
        );
    let registry = test_registry(&config);
    let server = Server::with_builder(config, registry, builder);
    let router = server.router();
    let conn = router.open_connection();

    let custom = router
        .handle_request(conn, Request::new(1_i64, "custom/hello", Some(json!(["x"]))))
        .await;
    assert_eq!(custom.result(), Some(&json!({ "hello": ["x"] })));

    let ping = router.handle_request(conn, Request::new(2_i64, "ping", None)).await;
    assert!(ping.result().is_some());

    assert!(router
        .handle_frame(conn, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .is_none());

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["custom/hello", "ping", "notifications/initialized"]
    );
}
