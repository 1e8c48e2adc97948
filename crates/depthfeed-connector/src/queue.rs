/*
[INPUT]:  Events from the stream client (non-blocking) and snapshot fetcher (bounded wait)
[OUTPUT]: Arrival-ordered events for the single forwarder
[POS]:    Core buffer - the only bounded shared resource between components
[UPDATE]: When changing capacity semantics or enqueue/dequeue contracts
*/

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::Event;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue full, enqueue timed out after {0:?}")]
    Timeout(Duration),
    #[error("queue closed")]
    Closed,
}

/// Producer side of the bounded event queue. Cheap to clone.
///
/// Accepted events are never dropped by the queue: they stay buffered until the
/// consumer takes them.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
}

/// Consumer side of the bounded event queue. Exactly one exists per queue.
#[derive(Debug)]
pub struct EventConsumer {
    rx: mpsc::Receiver<Event>,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (minimum 1).
    pub fn bounded(capacity: usize) -> (EventQueue, EventConsumer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EventQueue { tx }, EventConsumer { rx })
    }

    /// Enqueue without waiting. Returns `false` when the queue is full or closed.
    pub fn try_enqueue(&self, event: Event) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Enqueue, waiting up to `timeout` for free capacity.
    pub async fn enqueue_blocking(&self, event: Event, timeout: Duration) -> Result<(), EnqueueError> {
        match tokio::time::timeout(timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(event);
                Ok(())
            }
            Ok(Err(_)) => Err(EnqueueError::Closed),
            Err(_) => Err(EnqueueError::Timeout(timeout)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the consumer is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventConsumer {
    /// Wait up to `timeout` for the next event.
    ///
    /// `None` on timeout, or immediately once every producer is gone and the buffer is drained.
    pub async fn dequeue(&mut self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    pub fn try_dequeue(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True when every producer has been dropped. Buffered events may remain.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(n: u64) -> Event {
        Event::incremental(n, n, json!({ "u": n }))
    }

    #[tokio::test]
    async fn single_producer_order_is_preserved() {
        let (queue, mut consumer) = EventQueue::bounded(16);
        for n in 1..=10 {
            assert!(queue.try_enqueue(update(n)));
        }

        let mut seen = Vec::new();
        while let Some(event) = consumer.dequeue(Duration::from_millis(10)).await {
            seen.push(event.sequence());
            if seen.len() == 10 {
                break;
            }
        }

        let expected: Vec<_> = (1..=10).map(|n| update(n).sequence()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn try_enqueue_on_full_queue_fails_without_blocking() {
        let (queue, mut consumer) = EventQueue::bounded(2);

        let accepted: Vec<bool> = (1..=5).map(|n| queue.try_enqueue(update(n))).collect();
        assert_eq!(accepted, vec![true, true, false, false, false]);
        assert_eq!(queue.len(), 2);
        assert_eq!(consumer.len(), 2);

        // state intact: the two accepted events come out in order and capacity frees up
        assert_eq!(consumer.try_dequeue().map(|e| e.sequence()), Some(update(1).sequence()));
        assert!(queue.try_enqueue(update(6)));
        assert_eq!(consumer.try_dequeue().map(|e| e.sequence()), Some(update(2).sequence()));
        assert_eq!(consumer.try_dequeue().map(|e| e.sequence()), Some(update(6).sequence()));
        assert!(consumer.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn enqueue_blocking_times_out_when_full() {
        let (queue, _consumer) = EventQueue::bounded(1);
        assert!(queue.try_enqueue(update(1)));

        let started = std::time::Instant::now();
        let result = queue
            .enqueue_blocking(Event::snapshot(7, json!({})), Duration::from_millis(50))
            .await;

        assert_eq!(result, Err(EnqueueError::Timeout(Duration::from_millis(50))));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_blocking_succeeds_once_consumer_drains() {
        let (queue, mut consumer) = EventQueue::bounded(1);
        assert!(queue.try_enqueue(update(1)));

        let producer = queue.clone();
        let waiter = tokio::spawn(async move {
            producer
                .enqueue_blocking(Event::snapshot(7, json!({})), Duration::from_secs(2))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(consumer.dequeue(Duration::from_millis(100)).await.is_some());
        assert_eq!(waiter.await.expect("join"), Ok(()));

        let snapshot = consumer.dequeue(Duration::from_millis(100)).await.expect("snapshot");
        assert_eq!(snapshot.sequence(), crate::event::SequenceInfo::Snapshot { last_update_id: 7 });
    }

    #[tokio::test]
    async fn enqueue_blocking_reports_closed_consumer() {
        let (queue, consumer) = EventQueue::bounded(4);
        drop(consumer);
        assert!(queue.is_closed());
        assert_eq!(
            queue.enqueue_blocking(update(1), Duration::from_millis(10)).await,
            Err(EnqueueError::Closed)
        );
        assert!(!queue.try_enqueue(update(2)));
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_timeout() {
        let (_queue, mut consumer) = EventQueue::bounded(4);
        let started = std::time::Instant::now();
        assert!(consumer.dequeue(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn consumer_sees_closed_after_producers_drop() {
        let (queue, mut consumer) = EventQueue::bounded(4);
        assert!(queue.try_enqueue(update(1)));
        drop(queue);

        assert!(consumer.is_closed());
        assert!(consumer.dequeue(Duration::from_millis(10)).await.is_some());
        assert!(consumer.is_empty());
        assert!(consumer.dequeue(Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_producers_keep_per_producer_order() {
        let (queue, mut consumer) = EventQueue::bounded(256);
        let a = queue.clone();
        let b = queue.clone();

        let ta = tokio::spawn(async move {
            for n in 0..100u64 {
                a.enqueue_blocking(Event::incremental(n, n, json!({"p": "a"})), Duration::from_secs(1))
                    .await
                    .expect("enqueue a");
            }
        });
        let tb = tokio::spawn(async move {
            for n in 0..100u64 {
                b.enqueue_blocking(Event::snapshot(n, json!({"p": "b"})), Duration::from_secs(1))
                    .await
                    .expect("enqueue b");
            }
        });
        ta.await.expect("join a");
        tb.await.expect("join b");
        drop(queue);

        let mut last_a = None;
        let mut last_b = None;
        let mut total = 0;
        while let Some(event) = consumer.dequeue(Duration::from_millis(50)).await {
            total += 1;
            match event.sequence() {
                crate::event::SequenceInfo::Incremental { first_update_id, .. } => {
                    assert!(last_a.map_or(true, |prev| prev < first_update_id));
                    last_a = Some(first_update_id);
                }
                crate::event::SequenceInfo::Snapshot { last_update_id } => {
                    assert!(last_b.map_or(true, |prev| prev < last_update_id));
                    last_b = Some(last_update_id);
                }
            }
        }
        assert_eq!(total, 200);
    }
}
