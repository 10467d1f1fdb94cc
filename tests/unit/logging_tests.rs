//! Unit tests for the request logging middleware.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

use mcp_capability_server::middleware::{
    handler, LoggingMiddleware, Middleware, Redactor, RequestContext,
};
use mcp_capability_server::protocol::RpcError;

/// In-memory log sink.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("utf-8 logs")
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn middleware() -> LoggingMiddleware {
    LoggingMiddleware::new(Arc::new(Redactor::new().expect("patterns compile")))
}

#[tokio::test]
async fn failure_message_is_redacted_before_logging() {
    let logs = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let failing = handler(|_ctx: RequestContext| async {
        Err::<serde_json::Value, _>(RpcError::tool_execution_failed(
            "upstream",
            "upstream rejected password=hunter2",
        ))
    });
    let err = middleware()
        .handle(RequestContext::detached("tools/call", json!({})), failing)
        .await
        .expect_err("handler fails");

    // The client still sees the original message.
    assert!(err.message.contains("hunter2"));

    let logged = logs.contents();
    assert!(logged.contains("request failed"), "{logged}");
    assert!(logged.contains("password=[REDACTED]"), "{logged}");
    assert!(!logged.contains("hunter2"), "{logged}");
}

#[tokio::test]
async fn success_is_passed_through() {
    let echo = handler(|ctx: RequestContext| async move { Ok(ctx.params) });

    let result = middleware()
        .handle(RequestContext::detached("ping", json!({ "a": 1 })), echo)
        .await
        .expect("ok");

    assert_eq!(result, json!({ "a": 1 }));
}
