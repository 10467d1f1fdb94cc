//! Unit tests for per-request cancellation tokens.

use std::time::Duration;

use mcp_capability_server::concurrency::CancellationToken;
use mcp_capability_server::protocol::RequestId;

#[test]
fn fresh_token_is_not_cancelled() {
    let token = CancellationToken::new(Some(RequestId::Number(1)));
    assert!(!token.is_cancelled());
    assert!(token.cancelled_at().is_none());
    assert!(token.check().is_ok());
    assert_eq!(token.request_id(), Some(&RequestId::Number(1)));
}

#[test]
fn cancel_reports_only_the_first_call() {
    let token = CancellationToken::detached();
    assert!(token.cancel(), "first cancel transitions the token");
    let first_at = token.cancelled_at().expect("timestamp recorded");

    assert!(!token.cancel(), "second cancel is a no-op");
    assert_eq!(token.cancelled_at(), Some(first_at), "timestamp is kept");
}

#[test]
fn check_returns_cancelled_error_after_cancel() {
    let token = CancellationToken::detached();
    token.cancel();

    let err = token.check().expect_err("cancelled token fails check");
    assert_eq!(err.code, -32005);
}

#[test]
fn clones_share_state() {
    let token = CancellationToken::detached();
    let clone = token.clone();
    clone.cancel();
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn cancelled_future_wakes_waiter() {
    let token = CancellationToken::detached();
    let waiter = token.clone();
    let handle = tokio::spawn(async move { waiter.cancelled().await });

    tokio::task::yield_now().await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("waiter must wake")
        .expect("task must not panic");
}
