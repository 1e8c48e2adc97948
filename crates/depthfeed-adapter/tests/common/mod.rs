/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for depthfeed-adapter tests

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::MockServer;

pub type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Depth snapshot body as the exchange returns it
pub fn depth_snapshot_body(last_update_id: u64) -> serde_json::Value {
    serde_json::json!({
        "lastUpdateId": last_update_id,
        "bids": [["100.00", "1.5"], ["99.50", "2.0"]],
        "asks": [["100.50", "0.7"]],
    })
}

/// Combined-stream depth update text frame
pub fn depth_update_text(first: u64, last: u64) -> String {
    serde_json::json!({
        "stream": "btcusdt@depth",
        "data": {
            "e": "depthUpdate",
            "E": 1_700_000_000_000_i64,
            "s": "BTCUSDT",
            "U": first,
            "u": last,
            "b": [["100.00", "1.0"]],
            "a": [],
        }
    })
    .to_string()
}

/// Bind a local WebSocket server that runs `handler` for exactly one client.
pub async fn spawn_ws_server<F, Fut>(handler: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = accept_async(stream).await.expect("ws handshake");
        handler(ws).await;
    });

    format!("ws://{addr}")
}

/// Read the next text frame and decode it as JSON.
pub async fn next_json(ws: &mut ServerSocket) -> serde_json::Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
            Some(Ok(_)) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Answer the next SUBSCRIBE request with an ack.
pub async fn ack_subscription(ws: &mut ServerSocket) -> serde_json::Value {
    let request = next_json(ws).await;
    let id = request["id"].as_u64().expect("request id");
    let reply = serde_json::json!({ "result": null, "id": id }).to_string();
    ws.send(Message::Text(reply.into())).await.expect("send ack");
    request
}
