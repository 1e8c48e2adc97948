/*
[INPUT]:  Stream base URL, SymbolConfig, EventQueue, CancellationToken
[OUTPUT]: IncrementalUpdate events (non-blocking enqueue) + published ConnectionState
[POS]:    Producer - persistent diff-depth stream with reconnect/backoff and liveness checks
[UPDATE]: When changing subscription handshake, reconnection backoff, or shutdown semantics
*/

use std::sync::Arc;
use std::time::Duration;

use depthfeed_adapter::{DepthSpeed, DepthStreamConnection, DepthfeedError, InboundFrame, StreamMessage, parse_stream_text};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SymbolConfig;
use crate::event::Event;
use crate::metrics::FeedMetrics;
use crate::queue::EventQueue;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;
const DROP_LOG_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("stream transport error: {0}")]
    Transport(#[source] DepthfeedError),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("subscription rejected (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("pong not sent within {0:?}")]
    PongTimeout(Duration),

    #[error("no frames received for {0:?}")]
    Idle(Duration),

    #[error("gave up after {attempts} consecutive failed connection attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ConnectionError>,
    },
}

impl From<DepthfeedError> for ConnectionError {
    fn from(err: DepthfeedError) -> Self {
        match err {
            DepthfeedError::SubscriptionRejected { code, message } => ConnectionError::Rejected { code, message },
            DepthfeedError::Timeout { duration_ms } => {
                ConnectionError::HandshakeTimeout(Duration::from_millis(duration_ms))
            }
            DepthfeedError::Closed(reason) => ConnectionError::Closed(reason),
            other => ConnectionError::Transport(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub ws_url: String,
    pub depth_speed: DepthSpeed,
    pub handshake_timeout: Duration,
    pub pong_timeout: Duration,
    pub idle_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed handshakes tolerated; `None` retries forever
    pub max_connect_attempts: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ws_url: depthfeed_adapter::DEFAULT_STREAM_BASE_URL.to_string(),
            depth_speed: DepthSpeed::default(),
            handshake_timeout: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_connect_attempts: None,
        }
    }
}

enum SessionExit {
    Shutdown,
    Lost(ConnectionError),
}

/// Owns the market stream connection and its state.
#[derive(Debug)]
pub struct StreamClient {
    settings: StreamSettings,
    symbol: Arc<SymbolConfig>,
    queue: EventQueue,
    metrics: Arc<FeedMetrics>,
    shutdown: CancellationToken,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl StreamClient {
    pub fn new(
        settings: StreamSettings,
        symbol: Arc<SymbolConfig>,
        queue: EventQueue,
        metrics: Arc<FeedMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            settings,
            symbol,
            queue,
            metrics,
            shutdown,
            state,
            transitions,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Current state, updated in place.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Every transition, in order. Only transitions after this call are seen.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Open the transport and complete the subscribe handshake.
    ///
    /// Moves `Disconnected -> Connecting -> Open`, or back to `Disconnected` on failure.
    pub async fn connect(&self) -> Result<DepthStreamConnection, ConnectionError> {
        self.set_state(ConnectionState::Connecting);

        let stream_name = self.settings.depth_speed.stream_name(&self.symbol.symbol);
        let timeout = self.settings.handshake_timeout;
        let handshake = async {
            let mut conn = DepthStreamConnection::connect(&self.settings.ws_url).await?;
            conn.subscribe(vec![stream_name], timeout).await?;
            Ok::<_, DepthfeedError>(conn)
        };

        let result = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => Err(ConnectionError::from(err)),
            Err(_) => Err(ConnectionError::HandshakeTimeout(timeout)),
        };

        match result {
            Ok(_) => self.set_state(ConnectionState::Open),
            Err(_) => self.set_state(ConnectionState::Disconnected),
        }
        result
    }

    /// Connect, stream and reconnect until shutdown.
    ///
    /// Returns `Ok(())` once shutdown is observed, or `RetriesExhausted` when the
    /// retry ceiling is hit.
    pub async fn run(self) -> Result<(), ConnectionError> {
        let mut failures: u32 = 0;
        let mut retry_count: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let session = Uuid::new_v4();
            info!(%session, url = %self.settings.ws_url, symbol = %self.symbol.symbol, "connecting market stream");

            let attempt = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok(mut conn) => {
                    failures = 0;
                    info!(%session, url = %conn.url(), "market stream open");

                    let exit = self.read_loop(&mut conn, session).await;

                    self.set_state(ConnectionState::Closing);
                    if tokio::time::timeout(self.settings.pong_timeout, conn.close()).await.is_err() {
                        debug!(%session, "close handshake timed out");
                    }
                    self.set_state(ConnectionState::Disconnected);

                    match exit {
                        SessionExit::Shutdown => {
                            info!(%session, "market stream closed on shutdown");
                            break;
                        }
                        SessionExit::Lost(err) => {
                            self.metrics.record_reconnect();
                            retry_count = 1;
                            warn!(%session, error = %err, "market stream lost, reconnecting");
                        }
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    retry_count = retry_count.saturating_add(1);
                    self.metrics.record_handshake_failure();

                    if self.settings.max_connect_attempts.is_some_and(|max| failures >= max) {
                        error!(%session, failures, error = %err, "market stream gave up reconnecting");
                        self.set_state(ConnectionState::Disconnected);
                        return Err(ConnectionError::RetriesExhausted {
                            attempts: failures,
                            last: Box::new(err),
                        });
                    }
                    warn!(%session, failures, error = %err, "market stream connect failed");
                }
            }

            let backoff = backoff_duration(retry_count, self.settings.initial_backoff, self.settings.max_backoff);
            debug!(retry_count, backoff_ms = backoff.as_millis() as u64, "waiting before reconnect");
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn read_loop(&self, conn: &mut DepthStreamConnection, session: Uuid) -> SessionExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return SessionExit::Shutdown,
                next = tokio::time::timeout(self.settings.idle_timeout, conn.recv()) => next,
            };

            let frame = match next {
                Err(_) => return SessionExit::Lost(ConnectionError::Idle(self.settings.idle_timeout)),
                Ok(None) => return SessionExit::Lost(ConnectionError::Closed("stream ended".to_string())),
                Ok(Some(Err(err))) => return SessionExit::Lost(err.into()),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                InboundFrame::Text(text) => self.handle_text(&text),
                InboundFrame::Ping(payload) => {
                    match tokio::time::timeout(self.settings.pong_timeout, conn.pong(payload)).await {
                        Ok(Ok(())) => self.metrics.record_ping_answered(),
                        Ok(Err(err)) => return SessionExit::Lost(err.into()),
                        Err(_) => return SessionExit::Lost(ConnectionError::PongTimeout(self.settings.pong_timeout)),
                    }
                }
                InboundFrame::Pong => {}
                InboundFrame::Undecodable { bytes } => {
                    self.metrics.record_frame(bytes);
                    self.skip_unparseable(bytes);
                }
                InboundFrame::Close(reason) => {
                    let reason = reason.unwrap_or_else(|| "close frame".to_string());
                    debug!(%session, %reason, "server closed market stream");
                    return SessionExit::Lost(ConnectionError::Closed(reason));
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        self.metrics.record_frame(text.len());

        if text.len() > self.symbol.max_payload_size {
            self.metrics.record_oversize_drop();
            warn!(bytes = text.len(), limit = self.symbol.max_payload_size, "oversized frame skipped");
            return;
        }

        let frame = match parse_stream_text(text) {
            Ok(StreamMessage::Depth(frame)) => frame,
            Ok(StreamMessage::Reply(_)) | Ok(StreamMessage::Other(_)) => {
                self.metrics.record_ignored_frame();
                return;
            }
            Err(_) => {
                self.skip_unparseable(text.len());
                return;
            }
        };

        self.metrics.record_incremental();
        self.admit(Event::incremental(frame.first_update_id, frame.final_update_id, frame.body));
    }

    fn skip_unparseable(&self, bytes: usize) {
        let count = self.metrics.record_parse_error();
        if count == 1 || count % DROP_LOG_EVERY == 0 {
            warn!(parse_errors = count, bytes, "unparseable stream frame skipped");
        }
    }

    fn admit(&self, event: Event) {
        if self.state() != ConnectionState::Open {
            self.metrics.record_not_open_drop();
            return;
        }

        let final_update_id = event.sequence().latest_update_id();
        if self.queue.try_enqueue(event) {
            self.metrics.record_incremental_enqueued();
            return;
        }

        if self.queue.is_closed() {
            debug!(final_update_id, "queue closed, incremental dropped");
            return;
        }
        let dropped = self.metrics.record_queue_saturation();
        if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
            warn!(dropped, final_update_id, capacity = self.queue.capacity(), "queue saturated, incremental dropped");
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            let _ = self.transitions.send(next);
            debug!(from = ?previous, to = ?next, "connection state changed");
        }
    }
}

/// `initial * 2^(retry_count - 1)`, capped at `max`.
fn backoff_duration(retry_count: u32, initial: Duration, max: Duration) -> Duration {
    let exp = retry_count.saturating_sub(1).min(31);
    initial.saturating_mul(1u32 << exp).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn symbol_config(max_payload_size: usize) -> Arc<SymbolConfig> {
        Arc::new(SymbolConfig {
            symbol: "BTCUSDT".to_string(),
            snapshot_interval: Duration::from_secs(60),
            snapshot_depth_limit: 100,
            max_payload_size,
        })
    }

    fn client_with_queue(capacity: usize, max_payload_size: usize) -> (StreamClient, crate::queue::EventConsumer, Arc<FeedMetrics>) {
        let (queue, consumer) = EventQueue::bounded(capacity);
        let metrics = Arc::new(FeedMetrics::new());
        let client = StreamClient::new(
            StreamSettings::default(),
            symbol_config(max_payload_size),
            queue,
            metrics.clone(),
            CancellationToken::new(),
        );
        (client, consumer, metrics)
    }

    fn depth_text(first: u64, last: u64) -> String {
        json!({
            "stream": "btcusdt@depth",
            "data": {"e": "depthUpdate", "E": 1, "s": "BTCUSDT", "U": first, "u": last, "b": [], "a": []}
        })
        .to_string()
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_duration(1, initial, max), Duration::from_secs(1));
        assert_eq!(backoff_duration(2, initial, max), Duration::from_secs(2));
        assert_eq!(backoff_duration(3, initial, max), Duration::from_secs(4));
        assert_eq!(backoff_duration(4, initial, max), Duration::from_secs(8));
        assert_eq!(backoff_duration(5, initial, max), Duration::from_secs(16));
        assert_eq!(backoff_duration(6, initial, max), Duration::from_secs(30));
        assert_eq!(backoff_duration(200, initial, max), Duration::from_secs(30));
    }

    #[test]
    fn frames_are_not_admitted_unless_open() {
        let (client, mut consumer, metrics) = client_with_queue(8, 4096);

        client.handle_text(&depth_text(1, 2));
        assert!(consumer.try_dequeue().is_none());
        assert_eq!(metrics.snapshot().not_open_drops, 1);

        client.set_state(ConnectionState::Open);
        client.handle_text(&depth_text(3, 4));
        let event = consumer.try_dequeue().expect("admitted");
        assert_eq!(event.sequence().latest_update_id(), 4);
        assert_eq!(event.payload()["stream"], "btcusdt@depth");
    }

    #[test]
    fn saturation_drops_without_blocking() {
        let (client, mut consumer, metrics) = client_with_queue(2, 4096);
        client.set_state(ConnectionState::Open);

        for n in 0..5 {
            client.handle_text(&depth_text(n * 10, n * 10 + 9));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.incrementals_received, 5);
        assert_eq!(snapshot.incrementals_enqueued, 2);
        assert_eq!(snapshot.queue_saturation_drops, 3);
        assert_eq!(consumer.try_dequeue().map(|e| e.sequence().latest_update_id()), Some(9));
        assert_eq!(consumer.try_dequeue().map(|e| e.sequence().latest_update_id()), Some(19));
        assert!(consumer.try_dequeue().is_none());
    }

    #[test]
    fn oversize_unparseable_and_control_frames_are_counted_and_skipped() {
        let (client, mut consumer, metrics) = client_with_queue(8, 64);
        client.set_state(ConnectionState::Open);

        client.handle_text(&"x".repeat(65));
        client.handle_text("{not json");
        client.handle_text(r#"{"result":null,"id":1}"#);
        client.handle_text(r#"{"e":"trade","s":"BTCUSDT"}"#);

        assert!(consumer.try_dequeue().is_none());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 4);
        assert_eq!(snapshot.oversize_drops, 1);
        assert_eq!(snapshot.parse_errors, 1);
        assert_eq!(snapshot.ignored_frames, 2);
        assert_eq!(snapshot.incrementals_received, 0);
    }

    #[tokio::test]
    async fn state_transitions_are_broadcast_once_each() {
        let (client, _consumer, _metrics) = client_with_queue(2, 4096);
        let mut transitions = client.subscribe_transitions();
        let watcher = client.subscribe_state();

        client.set_state(ConnectionState::Connecting);
        client.set_state(ConnectionState::Connecting);
        client.set_state(ConnectionState::Open);

        assert_eq!(transitions.recv().await.expect("first"), ConnectionState::Connecting);
        assert_eq!(transitions.recv().await.expect("second"), ConnectionState::Open);
        assert!(transitions.try_recv().is_err());
        assert_eq!(*watcher.borrow(), ConnectionState::Open);
    }
}
