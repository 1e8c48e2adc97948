/*
[INPUT]:  BinanceClient (REST), SymbolConfig, EventQueue, CancellationToken
[OUTPUT]: Periodic Snapshot events enqueued with a bounded wait
[POS]:    Producer - full order-book snapshots on a fixed schedule
[UPDATE]: When changing fetch, scheduling or enqueue semantics
*/

use std::sync::Arc;
use std::time::Duration;

use depthfeed_adapter::{BinanceClient, Credentials, DepthfeedError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SymbolConfig;
use crate::event::Event;
use crate::metrics::FeedMetrics;
use crate::queue::{EnqueueError, EventQueue};

/// Source of the read-scope API key.
pub trait ApiKeyProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Reads the key from an environment variable at call time.
#[derive(Debug, Clone)]
pub struct EnvApiKey {
    var: String,
}

impl EnvApiKey {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl ApiKeyProvider for EnvApiKey {
    fn api_key(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|key| !key.trim().is_empty())
    }
}

/// Fixed key, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKey(pub Option<String>);

impl ApiKeyProvider for StaticApiKey {
    fn api_key(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Error)]
pub enum SnapshotFetchError {
    #[error("snapshot request failed: {0}")]
    Request(#[source] DepthfeedError),

    #[error("snapshot rejected (code {code}): {message}")]
    Status { code: i32, message: String },

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("snapshot request timed out after {0:?}")]
    Timeout(Duration),
}

impl SnapshotFetchError {
    /// Whether the next tick is likely to succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            SnapshotFetchError::Request(err) => err.is_retryable(),
            SnapshotFetchError::Status { code, .. } => *code == 429 || *code >= 500,
            SnapshotFetchError::Malformed(_) => false,
            SnapshotFetchError::Timeout(_) => true,
        }
    }
}

impl From<DepthfeedError> for SnapshotFetchError {
    fn from(err: DepthfeedError) -> Self {
        match err {
            DepthfeedError::Api { code, message } => SnapshotFetchError::Status { code, message },
            DepthfeedError::RateLimit { retry_after } => SnapshotFetchError::Status {
                code: 429,
                message: format!("rate limited, retry after {retry_after}s"),
            },
            DepthfeedError::InvalidResponse(message) => SnapshotFetchError::Malformed(message),
            DepthfeedError::Serialization(err) => SnapshotFetchError::Malformed(err.to_string()),
            other => SnapshotFetchError::Request(other),
        }
    }
}

/// One-shot depth snapshot request.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    client: BinanceClient,
    request_timeout: Duration,
}

impl SnapshotFetcher {
    pub fn new(client: BinanceClient, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    /// Attach the provider's key, if it has one.
    pub fn with_api_key(mut self, provider: &dyn ApiKeyProvider) -> Self {
        match provider.api_key() {
            Some(api_key) => self.client.set_credentials(Credentials { api_key }),
            None => debug!("no API key configured, snapshot requests are unauthenticated"),
        }
        self
    }

    pub async fn fetch(&self, symbol: &str, depth_limit: u32) -> Result<Event, SnapshotFetchError> {
        let response = tokio::time::timeout(self.request_timeout, self.client.get_depth(symbol, depth_limit))
            .await
            .map_err(|_| SnapshotFetchError::Timeout(self.request_timeout))??;

        debug!(
            symbol,
            last_update_id = response.last_update_id,
            bids = response.bid_levels,
            asks = response.ask_levels,
            "snapshot fetched"
        );
        Ok(Event::snapshot(response.last_update_id, response.body))
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub initial_delay: Duration,
    pub enqueue_timeout: Duration,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            enqueue_timeout: Duration::from_secs(2),
        }
    }
}

/// Drives the fetcher on a fixed interval with at most one fetch in flight.
#[derive(Debug)]
pub struct SnapshotScheduler {
    fetcher: Arc<SnapshotFetcher>,
    symbol: Arc<SymbolConfig>,
    settings: SnapshotSettings,
    queue: EventQueue,
    metrics: Arc<FeedMetrics>,
    shutdown: CancellationToken,
}

impl SnapshotScheduler {
    pub fn new(
        fetcher: SnapshotFetcher,
        symbol: Arc<SymbolConfig>,
        settings: SnapshotSettings,
        queue: EventQueue,
        metrics: Arc<FeedMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            symbol,
            settings,
            queue,
            metrics,
            shutdown,
        }
    }

    pub async fn run(self) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            _ = tokio::time::sleep(self.settings.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.symbol.snapshot_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!(
            symbol = %self.symbol.symbol,
            interval_ms = self.symbol.snapshot_interval.as_millis() as u64,
            depth_limit = self.symbol.snapshot_depth_limit,
            "snapshot schedule started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                let skipped = self.metrics.record_snapshot_skipped();
                debug!(skipped, "previous snapshot still in flight, tick skipped");
                continue;
            }

            in_flight = Some(tokio::spawn(fetch_and_enqueue(
                self.fetcher.clone(),
                self.symbol.clone(),
                self.settings.enqueue_timeout,
                self.queue.clone(),
                self.metrics.clone(),
                self.shutdown.clone(),
            )));
        }

        // the fetch task observes the same token, so this wait is short
        if let Some(handle) = in_flight {
            if let Err(err) = handle.await {
                warn!(error = %err, "snapshot task ended abnormally");
            }
        }
        debug!("snapshot schedule stopped");
    }
}

async fn fetch_and_enqueue(
    fetcher: Arc<SnapshotFetcher>,
    symbol: Arc<SymbolConfig>,
    enqueue_timeout: Duration,
    queue: EventQueue,
    metrics: Arc<FeedMetrics>,
    shutdown: CancellationToken,
) {
    let result = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        result = fetcher.fetch(&symbol.symbol, symbol.snapshot_depth_limit) => result,
    };

    let event = match result {
        Ok(event) => event,
        Err(err) => {
            metrics.record_snapshot_failed();
            warn!(
                symbol = %symbol.symbol,
                transient = err.is_transient(),
                error = %err,
                "snapshot fetch failed, waiting for next tick"
            );
            return;
        }
    };
    metrics.record_snapshot_fetched();

    let last_update_id = event.sequence().latest_update_id();

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            debug!(last_update_id, "shutdown while enqueueing snapshot, dropped");
        }
        result = queue.enqueue_blocking(event, enqueue_timeout) => match result {
            Ok(()) => {
                metrics.record_snapshot_enqueued();
                info!(symbol = %symbol.symbol, last_update_id, "snapshot enqueued");
            }
            Err(EnqueueError::Timeout(waited)) => {
                metrics.record_snapshot_enqueue_timeout();
                warn!(
                    symbol = %symbol.symbol,
                    last_update_id,
                    waited_ms = waited.as_millis() as u64,
                    "queue full, snapshot dropped"
                );
            }
            Err(EnqueueError::Closed) => {
                debug!(last_update_id, "queue closed, snapshot dropped");
            }
        },
    }
}
