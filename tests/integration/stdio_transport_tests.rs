//! NDJSON transport driven over in-memory pipes.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mcp_capability_server::router::Router;
use mcp_capability_server::transport::codec::MAX_LINE_BYTES;
use mcp_capability_server::transport::serve;
use mcp_capability_server::transport::stdio::StdioTransport;
use mcp_capability_server::Result;

use super::test_helpers::{test_config, test_router};

struct Client {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    server: JoinHandle<Result<()>>,
    shutdown: CancellationToken,
}

impl Client {
    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("newline");
        self.writer.flush().await.expect("flush");
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("response within timeout")
            .expect("read")
            .expect("line before EOF");
        serde_json::from_str(&line).expect("response is JSON")
    }

    async fn finish(mut self) -> Option<String> {
        self.writer.shutdown().await.expect("shutdown write side");
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server exits at EOF")
            .expect("task")
            .expect("serve ok");
        self.lines.next_line().await.expect("read")
    }
}

fn start(router: Router, max_line_bytes: usize) -> Client {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let (client_read, client_write) = tokio::io::split(client_io);

    let transport = StdioTransport::new(
        server_read,
        server_write,
        Duration::from_secs(60),
        max_line_bytes,
    );
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(router, transport, shutdown.clone()));

    Client {
        lines: BufReader::new(client_read).lines(),
        writer: client_write,
        server,
        shutdown,
    }
}

#[tokio::test]
async fn request_line_gets_response_line() {
    let mut client = start(test_router(test_config(4, None)), MAX_LINE_BYTES);

    client
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .await;
    assert_eq!(
        client.recv().await,
        json!({ "jsonrpc": "2.0", "id": 1, "result": {} })
    );

    assert!(client.finish().await.is_none());
}

#[tokio::test]
async fn malformed_line_does_not_stop_the_server() {
    let mut client = start(test_router(test_config(4, None)), MAX_LINE_BYTES);

    client.send("{not json").await;
    let parse_error = client.recv().await;
    assert_eq!(parse_error["id"], Value::Null);
    assert_eq!(parse_error["error"]["code"], json!(-32700));

    client
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
        .await;
    let listed = client.recv().await;
    assert_eq!(listed["id"], json!(2));
    assert!(listed["result"]["tools"].is_array());

    client.finish().await;
}

#[tokio::test]
async fn oversized_line_is_skipped_without_reply() {
    let mut client = start(test_router(test_config(4, None)), 64);

    client.send(&format!(r#"{{"jsonrpc":"2.0","id":1,"method":"{}"}}"#, "x".repeat(200))).await;
    client
        .send(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#)
        .await;

    let next = client.recv().await;
    assert_eq!(next["id"], json!(7), "first reply belongs to the line after the oversized one");

    client.finish().await;
}

#[tokio::test]
async fn blank_lines_and_notifications_produce_no_output() {
    let mut client = start(test_router(test_config(4, None)), MAX_LINE_BYTES);

    client.send("").await;
    client.send("   ").await;
    client
        .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    client
        .send(r#"{"jsonrpc":"2.0","id":"last","method":"ping"}"#)
        .await;

    assert_eq!(client.recv().await["id"], json!("last"));
    client.finish().await;
}

#[tokio::test]
async fn in_flight_responses_are_written_before_exit() {
    let mut client = start(test_router(test_config(4, None)), MAX_LINE_BYTES);

    client
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"delay","arguments":{"ms":50}}}"#)
        .await;

    let Client {
        mut lines,
        mut writer,
        server,
        ..
    } = client;
    writer.shutdown().await.expect("close input");

    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("response before EOF")
        .expect("read")
        .expect("a line");
    let response: Value = serde_json::from_str(&line).expect("json");
    assert_eq!(response["id"], json!(1));
    assert!(response["result"].is_object(), "{response}");

    server.await.expect("task").expect("serve ok");
}

#[tokio::test]
async fn shutdown_cancels_in_flight_requests() {
    let mut client = start(test_router(test_config(4, None)), MAX_LINE_BYTES);

    client
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"delay","arguments":{"ms":60000}}}"#)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.shutdown.cancel();
    let response = client.recv().await;
    assert_eq!(response["error"]["code"], json!(-32005));

    tokio::time::timeout(Duration::from_secs(5), client.server)
        .await
        .expect("server exits")
        .expect("task")
        .expect("serve ok");
}
