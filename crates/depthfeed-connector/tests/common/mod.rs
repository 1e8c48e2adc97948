/*
[INPUT]:  Test scenarios needing a local exchange stand-in
[OUTPUT]: WebSocket server fixtures, frame builders and fast pipeline configs
[POS]:    Test infrastructure - shared across connector integration tests
[UPDATE]: When adding new test patterns or fixtures
*/

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use depthfeed_connector::{ConnectorConfig, SymbolConfig};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Local WebSocket server accepting any number of clients.
pub struct WsServer {
    pub url: String,
    accepted: Arc<Mutex<Vec<Instant>>>,
    connections: Arc<AtomicUsize>,
}

impl WsServer {
    /// Each accepted client runs `handler(index, socket)` on its own task.
    pub async fn start<F, Fut>(handler: F) -> WsServer
    where
        F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted_clone = accepted.clone();
        let connections_clone = connections.clone();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accepted_clone.lock().await.push(Instant::now());
                let index = connections_clone.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        handler(index, ws).await;
                    }
                });
            }
        });

        WsServer {
            url: format!("ws://{addr}"),
            accepted,
            connections,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn accept_times(&self) -> Vec<Instant> {
        self.accepted.lock().await.clone()
    }
}

/// Read the next text frame and decode it as JSON. `None` once the client is gone.
pub async fn next_json(ws: &mut ServerSocket) -> Option<serde_json::Value> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"));
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Answer the next SUBSCRIBE request with an ack.
pub async fn ack_subscription(ws: &mut ServerSocket) {
    let request = next_json(ws).await.expect("subscribe request");
    assert_eq!(request["method"], "SUBSCRIBE");
    let id = request["id"].as_u64().expect("request id");
    let reply = serde_json::json!({ "result": null, "id": id }).to_string();
    ws.send(Message::Text(reply.into())).await.expect("send ack");
}

/// Answer the next SUBSCRIBE request with an error reply.
pub async fn reject_subscription(ws: &mut ServerSocket) {
    let Some(request) = next_json(ws).await else {
        return;
    };
    let id = request["id"].as_u64().expect("request id");
    let reply = serde_json::json!({ "error": { "code": 2, "msg": "Invalid request" }, "id": id }).to_string();
    let _ = ws.send(Message::Text(reply.into())).await;
    // let the client hang up first
    let _ = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
}

/// Keep the socket open, discarding client frames, until the client leaves.
pub async fn hold_open(ws: &mut ServerSocket) {
    while let Some(Ok(message)) = ws.next().await {
        if message.is_close() {
            break;
        }
    }
}

pub async fn send_depth_update(ws: &mut ServerSocket, first: u64, last: u64) {
    ws.send(Message::Text(depth_update_text(first, last).into()))
        .await
        .expect("send depth update");
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

/// Depth snapshot body as the exchange returns it
pub fn depth_snapshot_body(last_update_id: u64) -> serde_json::Value {
    serde_json::json!({
        "lastUpdateId": last_update_id,
        "bids": [["100.00", "1.5"]],
        "asks": [["100.50", "0.7"]],
    })
}

pub fn symbol_config() -> Arc<SymbolConfig> {
    Arc::new(SymbolConfig {
        symbol: "BTCUSDT".to_string(),
        snapshot_interval: Duration::from_millis(200),
        snapshot_depth_limit: 100,
        max_payload_size: 64 * 1024,
    })
}

/// Config with millisecond-scale timings against local servers.
pub fn fast_config(ws_url: &str, rest_url: &str) -> ConnectorConfig {
    let mut config = ConnectorConfig::for_symbol("BTCUSDT");
    config.ws_url = ws_url.to_string();
    config.rest_url = rest_url.to_string();
    config.queue_capacity = 64;
    config.snapshot.interval_secs = 1;
    config.snapshot.initial_delay_ms = 50;
    config.snapshot.depth_limit = 100;
    config.snapshot.enqueue_timeout_ms = 200;
    config.snapshot.request_timeout_ms = 1_000;
    config.stream.handshake_timeout_ms = 1_000;
    config.stream.pong_timeout_ms = 500;
    config.stream.idle_timeout_secs = 30;
    config.stream.initial_backoff_ms = 50;
    config.stream.max_backoff_ms = 500;
    config.forwarder.poll_interval_ms = 50;
    config.forwarder.send_timeout_ms = 200;
    config.forwarder.max_send_attempts = 2;
    config.forwarder.retry_delay_ms = 10;
    config.shutdown_grace_ms = 2_000;
    config
}
