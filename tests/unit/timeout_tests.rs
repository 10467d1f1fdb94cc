//! Unit tests for deadline enforcement.

use std::collections::HashMap;
use std::time::Duration;

use mcp_capability_server::concurrency::TimeoutManager;

fn manager() -> TimeoutManager {
    let mut overrides = HashMap::new();
    overrides.insert("tools/call".to_owned(), Duration::from_millis(50));
    TimeoutManager::new(Duration::from_secs(30)).with_overrides(overrides)
}

#[test]
fn override_wins_over_default() {
    let timeouts = manager();
    assert_eq!(timeouts.timeout_for("tools/call"), Duration::from_millis(50));
    assert_eq!(timeouts.timeout_for("ping"), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn work_finishing_in_time_returns_its_output() {
    let out = manager()
        .run(Duration::from_secs(1), async { 42 })
        .await
        .expect("completes");
    assert_eq!(out, 42);
}

#[tokio::test(start_paused = true)]
async fn slow_work_times_out_with_the_deadline() {
    let err = manager()
        .run_for("tools/call", tokio::time::sleep(Duration::from_secs(5)))
        .await
        .expect_err("must time out");
    assert_eq!(err.after, Duration::from_millis(50));
    assert_eq!(err.to_string(), "timed out after 50ms");
}
