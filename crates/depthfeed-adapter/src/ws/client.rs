/*
[INPUT]:  Market stream base URL, stream names, handshake timeout
[OUTPUT]: A subscribed WebSocket connection yielding raw inbound frames
[POS]:    WebSocket layer - real-time data stream handling
[UPDATE]: When adding new channels or changing connection logic
[UPDATE]: 2026-10-02 Single-owner connection with explicit subscribe ack and pong replies
*/

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::http::{DepthfeedError, Result};
use crate::types::StreamRequest;
use crate::ws::message::{StreamMessage, parse_stream_text, truncate_for_log};

/// Default market stream host (spot testnet)
pub const DEFAULT_STREAM_BASE_URL: &str = "wss://testnet.binance.vision";
const SUBSCRIPTION_LOG_LIMIT: usize = 10;
const RAW_LOG_MAX_BYTES: usize = 1024;

static SUBSCRIBE_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frame, stripped of transport details
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Ping(Vec<u8>),
    Pong,
    Close(Option<String>),
    /// Binary frame that is not UTF-8 text; the connection itself is fine
    Undecodable { bytes: usize },
}

/// Combined-stream URL for a base host, e.g. `wss://host/stream`.
pub fn combined_stream_url(base_url: &str) -> Result<url::Url> {
    let trimmed = base_url.trim_end_matches('/');
    let url = if trimmed.ends_with("/stream") {
        url::Url::parse(trimmed)?
    } else {
        url::Url::parse(&format!("{trimmed}/stream"))?
    };
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(DepthfeedError::Config(format!(
            "stream URL must use ws or wss, got {other}"
        ))),
    }
}

/// One market stream connection.
///
/// Owned by a single task: reads, pong replies and subscription requests all
/// go through `&mut self`, so there is no shared writer.
pub struct DepthStreamConnection {
    stream: WsStream,
    url: url::Url,
    next_request_id: u64,
}

impl std::fmt::Debug for DepthStreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthStreamConnection")
            .field("url", &self.url.as_str())
            .field("next_request_id", &self.next_request_id)
            .finish()
    }
}

impl DepthStreamConnection {
    /// Open the transport. No subscription is sent yet.
    pub async fn connect(base_url: &str) -> Result<Self> {
        let url = combined_stream_url(base_url)?;
        let (stream, _response) = connect_async(url.as_str()).await?;
        debug!(url = %url, "ws transport connected");
        Ok(Self {
            stream,
            url,
            next_request_id: 1,
        })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Send a SUBSCRIBE request and wait for its acknowledgement.
    ///
    /// Pings arriving before the ack are answered; any other frame is discarded.
    pub async fn subscribe(&mut self, streams: Vec<String>, ack_timeout: Duration) -> Result<u64> {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let request = StreamRequest::subscribe(streams, id);
        let text = serde_json::to_string(&request)?;
        self.stream.send(WsMessage::Text(text.clone().into())).await?;
        log_subscription_sent(&request, &text);

        let deadline = Instant::now() + ack_timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.recv()).await {
                Err(_) => return Err(DepthfeedError::timeout(ack_timeout)),
                Ok(None) => {
                    return Err(DepthfeedError::Closed(
                        "stream ended before subscription ack".to_string(),
                    ));
                }
                Ok(Some(frame)) => frame?,
            };

            match frame {
                InboundFrame::Text(text) => match parse_stream_text(&text) {
                    Ok(StreamMessage::Reply(reply)) if reply.id == id => {
                        if let Some(error) = reply.error {
                            return Err(DepthfeedError::SubscriptionRejected {
                                code: error.code,
                                message: error.msg,
                            });
                        }
                        return Ok(id);
                    }
                    _ => {
                        debug!(bytes = text.len(), "frame before subscription ack discarded");
                    }
                },
                InboundFrame::Ping(payload) => self.pong(payload).await?,
                InboundFrame::Pong => {}
                InboundFrame::Undecodable { bytes } => {
                    debug!(bytes, "undecodable frame before subscription ack discarded");
                }
                InboundFrame::Close(reason) => {
                    return Err(DepthfeedError::Closed(
                        reason.unwrap_or_else(|| "close frame during subscribe".to_string()),
                    ));
                }
            }
        }
    }

    /// Next inbound frame; `None` once the transport has ended.
    pub async fn recv(&mut self) -> Option<Result<InboundFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };

            let frame = match message {
                WsMessage::Text(text) => InboundFrame::Text(text.to_string()),
                WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => InboundFrame::Text(text),
                    Err(_) => InboundFrame::Undecodable { bytes: bytes.len() },
                },
                WsMessage::Ping(payload) => InboundFrame::Ping(payload.to_vec()),
                WsMessage::Pong(_) => InboundFrame::Pong,
                WsMessage::Close(frame) => {
                    InboundFrame::Close(frame.map(|frame| frame.reason.as_str().to_string()))
                }
                WsMessage::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    /// Reply to a liveness probe with the same payload.
    pub async fn pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.stream.send(WsMessage::Pong(payload.into())).await?;
        Ok(())
    }

    /// Best-effort close handshake.
    pub async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "ws close failed");
        }
    }
}

fn log_subscription_sent(request: &StreamRequest, raw: &str) {
    let count = SUBSCRIBE_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= SUBSCRIPTION_LOG_LIMIT {
        return;
    }

    info!(
        sample_index = count + 1,
        sample_limit = SUBSCRIPTION_LOG_LIMIT,
        id = request.id,
        streams = ?request.params,
        "ws subscription sent"
    );
    debug!(message = %truncate_for_log(raw, RAW_LOG_MAX_BYTES), "ws subscription payload");
}
