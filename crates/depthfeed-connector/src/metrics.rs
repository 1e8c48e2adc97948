/*
[INPUT]:  Counter bumps from stream client, snapshot scheduler and forwarder
[OUTPUT]: Point-in-time FeedMetricsSnapshot for logging and tests
[POS]:    Shared runtime metrics between the pipeline tasks
[UPDATE]: When adding/removing pipeline-level runtime signals
*/

use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::EventKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedMetricsSnapshot {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub incrementals_received: u64,
    pub incrementals_enqueued: u64,
    pub queue_saturation_drops: u64,
    pub not_open_drops: u64,
    pub parse_errors: u64,
    pub oversize_drops: u64,
    pub ignored_frames: u64,
    pub pings_answered: u64,
    pub reconnects: u64,
    pub handshake_failures: u64,
    pub snapshots_fetched: u64,
    pub snapshots_failed: u64,
    pub snapshots_skipped: u64,
    pub snapshot_enqueue_timeouts: u64,
    pub snapshots_enqueued: u64,
    pub snapshots_forwarded: u64,
    pub incrementals_forwarded: u64,
    pub sink_retries: u64,
    pub sink_failures: u64,
}

impl FeedMetricsSnapshot {
    pub fn events_forwarded(&self) -> u64 {
        self.snapshots_forwarded + self.incrementals_forwarded
    }
}

/// Lock-free counters shared through `Arc`.
#[derive(Debug, Default)]
pub struct FeedMetrics {
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    incrementals_received: AtomicU64,
    incrementals_enqueued: AtomicU64,
    queue_saturation_drops: AtomicU64,
    not_open_drops: AtomicU64,
    parse_errors: AtomicU64,
    oversize_drops: AtomicU64,
    ignored_frames: AtomicU64,
    pings_answered: AtomicU64,
    reconnects: AtomicU64,
    handshake_failures: AtomicU64,
    snapshots_fetched: AtomicU64,
    snapshots_failed: AtomicU64,
    snapshots_skipped: AtomicU64,
    snapshot_enqueue_timeouts: AtomicU64,
    snapshots_enqueued: AtomicU64,
    snapshots_forwarded: AtomicU64,
    incrementals_forwarded: AtomicU64,
    sink_retries: AtomicU64,
    sink_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FeedMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FeedMetricsSnapshot {
            frames_received: load(&self.frames_received),
            bytes_received: load(&self.bytes_received),
            incrementals_received: load(&self.incrementals_received),
            incrementals_enqueued: load(&self.incrementals_enqueued),
            queue_saturation_drops: load(&self.queue_saturation_drops),
            not_open_drops: load(&self.not_open_drops),
            parse_errors: load(&self.parse_errors),
            oversize_drops: load(&self.oversize_drops),
            ignored_frames: load(&self.ignored_frames),
            pings_answered: load(&self.pings_answered),
            reconnects: load(&self.reconnects),
            handshake_failures: load(&self.handshake_failures),
            snapshots_fetched: load(&self.snapshots_fetched),
            snapshots_failed: load(&self.snapshots_failed),
            snapshots_skipped: load(&self.snapshots_skipped),
            snapshot_enqueue_timeouts: load(&self.snapshot_enqueue_timeouts),
            snapshots_enqueued: load(&self.snapshots_enqueued),
            snapshots_forwarded: load(&self.snapshots_forwarded),
            incrementals_forwarded: load(&self.incrementals_forwarded),
            sink_retries: load(&self.sink_retries),
            sink_failures: load(&self.sink_failures),
        }
    }

    pub fn record_frame(&self, bytes: usize) {
        bump(&self.frames_received);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_incremental(&self) {
        bump(&self.incrementals_received);
    }

    pub fn record_incremental_enqueued(&self) {
        bump(&self.incrementals_enqueued);
    }

    /// Returns the running drop count.
    pub fn record_queue_saturation(&self) -> u64 {
        bump(&self.queue_saturation_drops)
    }

    pub fn record_not_open_drop(&self) {
        bump(&self.not_open_drops);
    }

    /// Returns the running error count.
    pub fn record_parse_error(&self) -> u64 {
        bump(&self.parse_errors)
    }

    pub fn record_oversize_drop(&self) {
        bump(&self.oversize_drops);
    }

    pub fn record_ignored_frame(&self) {
        bump(&self.ignored_frames);
    }

    pub fn record_ping_answered(&self) {
        bump(&self.pings_answered);
    }

    pub fn record_reconnect(&self) {
        bump(&self.reconnects);
    }

    pub fn record_handshake_failure(&self) {
        bump(&self.handshake_failures);
    }

    pub fn record_snapshot_fetched(&self) {
        bump(&self.snapshots_fetched);
    }

    pub fn record_snapshot_failed(&self) {
        bump(&self.snapshots_failed);
    }

    pub fn record_snapshot_skipped(&self) -> u64 {
        bump(&self.snapshots_skipped)
    }

    pub fn record_snapshot_enqueue_timeout(&self) {
        bump(&self.snapshot_enqueue_timeouts);
    }

    pub fn record_snapshot_enqueued(&self) {
        bump(&self.snapshots_enqueued);
    }

    pub fn record_forwarded(&self, kind: EventKind) {
        match kind {
            EventKind::Snapshot => bump(&self.snapshots_forwarded),
            EventKind::IncrementalUpdate => bump(&self.incrementals_forwarded),
        };
    }

    pub fn record_sink_retry(&self) {
        bump(&self.sink_retries);
    }

    pub fn record_sink_failure(&self) {
        bump(&self.sink_failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = FeedMetrics::new();
        metrics.record_frame(120);
        metrics.record_frame(80);
        assert_eq!(metrics.record_queue_saturation(), 1);
        assert_eq!(metrics.record_queue_saturation(), 2);
        metrics.record_forwarded(EventKind::Snapshot);
        metrics.record_forwarded(EventKind::IncrementalUpdate);
        metrics.record_forwarded(EventKind::IncrementalUpdate);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.bytes_received, 200);
        assert_eq!(snapshot.queue_saturation_drops, 2);
        assert_eq!(snapshot.snapshots_forwarded, 1);
        assert_eq!(snapshot.incrementals_forwarded, 2);
        assert_eq!(snapshot.events_forwarded(), 3);
        assert_eq!(snapshot.reconnects, 0);
    }
}
