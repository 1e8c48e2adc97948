/*
[INPUT]:  EventConsumer (single consumer), EventSink, CancellationToken
[OUTPUT]: Every dequeued event transmitted in order, or an explicit failure carrying it back
[POS]:    Delivery layer - queue drain loop with bounded per-event retry
[UPDATE]: When changing retry, drain or failure hand-off semantics
*/

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::metrics::FeedMetrics;
use crate::queue::EventConsumer;
use crate::sink::{EventSink, SinkWriteError};

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    /// Written into the `connector` field of every frame
    pub connector_name: String,
    pub poll_interval: Duration,
    pub send_timeout: Duration,
    pub max_send_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            connector_name: "Binance".to_string(),
            poll_interval: Duration::from_millis(250),
            send_timeout: Duration::from_secs(1),
            max_send_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderReport {
    pub forwarded: u64,
}

/// Fatal delivery failure. Hands back the forwarder and the event it could not deliver.
#[derive(Debug)]
pub struct ForwarderFailure {
    pub forwarder: Forwarder,
    pub undelivered: Event,
    pub error: SinkWriteError,
}

#[derive(Debug)]
pub struct Forwarder {
    consumer: EventConsumer,
    sink: Box<dyn EventSink>,
    settings: ForwarderSettings,
    metrics: Arc<FeedMetrics>,
    pending: Option<Event>,
}

impl Forwarder {
    pub fn new(
        consumer: EventConsumer,
        sink: Box<dyn EventSink>,
        settings: ForwarderSettings,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        Self {
            consumer,
            sink,
            settings,
            metrics,
            pending: None,
        }
    }

    /// Deliver `event` before anything still queued on the next run.
    pub fn retransmit_first(&mut self, event: Event) {
        self.pending = Some(event);
    }

    /// Drain the queue until shutdown is observed with the queue empty, or producers are gone.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ForwarderReport, Box<ForwarderFailure>> {
        let mut report = ForwarderReport::default();

        if let Some(event) = self.pending.take() {
            info!(kind = event.kind().as_str(), "retransmitting undelivered event");
            if let Err(error) = self.deliver(&event).await {
                return Err(self.fail(event, error));
            }
            report.forwarded += 1;
        }

        loop {
            match self.consumer.dequeue(self.settings.poll_interval).await {
                Some(event) => {
                    if let Err(error) = self.deliver(&event).await {
                        return Err(self.fail(event, error));
                    }
                    report.forwarded += 1;
                }
                None => {
                    if self.consumer.is_empty() && self.consumer.is_closed() {
                        info!(forwarded = report.forwarded, "queue closed, forwarder exiting");
                        break;
                    }
                }
            }

            if shutdown.is_cancelled() && self.consumer.is_empty() {
                info!(forwarded = report.forwarded, "forwarder drained, exiting");
                break;
            }
        }

        Ok(report)
    }

    async fn deliver(&mut self, event: &Event) -> Result<(), SinkWriteError> {
        let frame = Bytes::from(event.encode(&self.settings.connector_name)?);
        let max_attempts = self.settings.max_send_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.settings.send_timeout, self.sink.send_frame(frame.clone())).await {
                Ok(result) => result,
                Err(_) => Err(SinkWriteError::Timeout(self.settings.send_timeout)),
            };

            match result {
                Ok(()) => {
                    self.metrics.record_forwarded(event.kind());
                    debug!(kind = event.kind().as_str(), bytes = frame.len(), "event forwarded");
                    return Ok(());
                }
                Err(err) if attempt < max_attempts => {
                    self.metrics.record_sink_retry();
                    warn!(attempt, max_attempts, error = %err, "sink write failed, retrying");
                    self.sink.reset().await;
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(err) => {
                    self.metrics.record_sink_failure();
                    self.sink.reset().await;
                    return Err(SinkWriteError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
            }
        }
    }

    fn fail(self, undelivered: Event, error: SinkWriteError) -> Box<ForwarderFailure> {
        warn!(kind = undelivered.kind().as_str(), error = %error, "forwarder giving up on event");
        Box::new(ForwarderFailure {
            forwarder: self,
            undelivered,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EventQueue;
    use crate::sink::ChannelSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings() -> ForwarderSettings {
        ForwarderSettings {
            poll_interval: Duration::from_millis(20),
            send_timeout: Duration::from_millis(100),
            max_send_attempts: 3,
            retry_delay: Duration::from_millis(5),
            ..ForwarderSettings::default()
        }
    }

    /// Fails the first `failures` sends, then forwards to a channel.
    #[derive(Debug)]
    struct FlakySink {
        failures: Arc<AtomicU32>,
        inner: ChannelSink,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkWriteError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkWriteError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
            }
            self.inner.send_frame(frame).await
        }
    }

    fn decode(frame: &Bytes) -> serde_json::Value {
        serde_json::from_slice(frame).expect("frame json")
    }

    #[tokio::test]
    async fn forwards_in_arrival_order_and_exits_on_shutdown() {
        let (queue, consumer) = EventQueue::bounded(10);
        assert!(queue.try_enqueue(Event::incremental(1, 1, json!({"u": 1}))));
        assert!(queue.try_enqueue(Event::incremental(2, 2, json!({"u": 2}))));
        assert!(queue.try_enqueue(Event::incremental(3, 3, json!({"u": 3}))));
        assert!(queue.try_enqueue(Event::snapshot(3, json!({"lastUpdateId": 3}))));

        let (sink, mut rx) = ChannelSink::channel();
        let metrics = Arc::new(FeedMetrics::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let forwarder = Forwarder::new(consumer, Box::new(sink), fast_settings(), metrics.clone());
        let report = forwarder.run(shutdown).await.expect("clean exit");
        assert_eq!(report.forwarded, 4);

        let types: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| decode(&frame)["type"].as_u64().expect("type"))
            .collect();
        assert_eq!(types, vec![2, 2, 2, 1]);
        assert_eq!(metrics.snapshot().events_forwarded(), 4);
        drop(queue);
    }

    #[tokio::test]
    async fn retries_transient_sink_errors() {
        let (queue, consumer) = EventQueue::bounded(4);
        assert!(queue.try_enqueue(Event::incremental(5, 6, json!({"u": 6}))));

        let (inner, mut rx) = ChannelSink::channel();
        let sink = FlakySink {
            failures: Arc::new(AtomicU32::new(2)),
            inner,
        };
        let metrics = Arc::new(FeedMetrics::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = Forwarder::new(consumer, Box::new(sink), fast_settings(), metrics.clone())
            .run(shutdown)
            .await
            .expect("delivered on third attempt");

        assert_eq!(report.forwarded, 1);
        assert_eq!(decode(&rx.recv().await.expect("frame"))["data"]["u"], 6);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sink_retries, 2);
        assert_eq!(snapshot.sink_failures, 0);
        drop(queue);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_undelivered_event() {
        let (queue, consumer) = EventQueue::bounded(4);
        assert!(queue.try_enqueue(Event::incremental(1, 1, json!({"u": 1}))));
        assert!(queue.try_enqueue(Event::incremental(2, 2, json!({"u": 2}))));

        let failures = Arc::new(AtomicU32::new(3));
        let (inner, mut rx) = ChannelSink::channel();
        let sink = FlakySink {
            failures: failures.clone(),
            inner,
        };
        let metrics = Arc::new(FeedMetrics::new());
        let shutdown = CancellationToken::new();

        let failure = Forwarder::new(consumer, Box::new(sink), fast_settings(), metrics.clone())
            .run(shutdown.clone())
            .await
            .expect_err("sink keeps failing");

        assert!(matches!(failure.error, SinkWriteError::Exhausted { attempts: 3, .. }));
        assert_eq!(failure.undelivered.sequence(), Event::incremental(1, 1, json!({})).sequence());
        assert_eq!(metrics.snapshot().sink_failures, 1);

        // restart: the undelivered event goes first, then the rest of the queue
        let ForwarderFailure {
            mut forwarder,
            undelivered,
            ..
        } = *failure;
        forwarder.retransmit_first(undelivered);
        shutdown.cancel();
        let report = forwarder.run(shutdown).await.expect("sink recovered");
        assert_eq!(report.forwarded, 2);

        assert_eq!(decode(&rx.recv().await.expect("first"))["data"]["u"], 1);
        assert_eq!(decode(&rx.recv().await.expect("second"))["data"]["u"], 2);
        drop(queue);
    }

    #[tokio::test]
    async fn shutdown_during_idle_dequeue_exits_within_one_window() {
        let (queue, consumer) = EventQueue::bounded(4);
        let (sink, _rx) = ChannelSink::channel();
        let settings = ForwarderSettings {
            poll_interval: Duration::from_millis(250),
            ..fast_settings()
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            Forwarder::new(consumer, Box::new(sink), settings, Arc::new(FeedMetrics::new())).run(shutdown.clone()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled_at = std::time::Instant::now();
        shutdown.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("exit in time")
            .expect("join")
            .expect("clean exit");
        assert_eq!(report.forwarded, 0);
        assert!(cancelled_at.elapsed() <= Duration::from_millis(500));
        drop(queue);
    }

    #[tokio::test]
    async fn exits_when_every_producer_is_gone() {
        let (queue, consumer) = EventQueue::bounded(4);
        assert!(queue.try_enqueue(Event::snapshot(1, json!({}))));
        drop(queue);

        let (sink, mut rx) = ChannelSink::channel();
        let report = Forwarder::new(consumer, Box::new(sink), fast_settings(), Arc::new(FeedMetrics::new()))
            .run(CancellationToken::new())
            .await
            .expect("clean exit");

        assert_eq!(report.forwarded, 1);
        assert!(rx.recv().await.is_some());
    }
}
