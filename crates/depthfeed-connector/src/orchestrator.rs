/*
[INPUT]:  SymbolConfig + component settings, SnapshotFetcher, EventSink, CancellationToken
[OUTPUT]: Supervised pipeline tasks (stream -> queue <- snapshots, queue -> forwarder -> sink)
[POS]:    Execution layer - wiring, supervision, restart policy and bounded shutdown
[UPDATE]: When changing startup/shutdown guarantees or supervision semantics
*/

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConnectorConfig, SymbolConfig};
use crate::forwarder::{Forwarder, ForwarderFailure, ForwarderReport, ForwarderSettings};
use crate::metrics::{FeedMetrics, FeedMetricsSnapshot};
use crate::queue::{DEFAULT_QUEUE_CAPACITY, EventQueue};
use crate::sink::{EventSink, SinkWriteError};
use crate::snapshot::{SnapshotFetcher, SnapshotScheduler, SnapshotSettings};
use crate::stream::{ConnectionError, ConnectionState, StreamClient, StreamSettings};

/// Pipeline component, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Stream,
    Snapshot,
    Forwarder,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Stream => "stream client",
            Component::Snapshot => "snapshot scheduler",
            Component::Forwarder => "forwarder",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("forwarder failed after {restarts} restart(s): {source}")]
    Forwarder {
        restarts: u32,
        #[source]
        source: SinkWriteError,
    },

    #[error("stream client failed: {0}")]
    Stream(#[source] ConnectionError),

    #[error("{component} task panicked: {message}")]
    Panicked { component: Component, message: String },

    #[error("{component} did not stop within {grace:?} and was aborted")]
    ShutdownTimedOut { component: Component, grace: Duration },
}

impl ConnectorError {
    pub fn component(&self) -> Component {
        match self {
            ConnectorError::Forwarder { .. } => Component::Forwarder,
            ConnectorError::Stream(_) => Component::Stream,
            ConnectorError::Panicked { component, .. } => *component,
            ConnectorError::ShutdownTimedOut { component, .. } => *component,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub queue_capacity: usize,
    pub max_forwarder_restarts: u32,
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_forwarder_restarts: 1,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Outcome of a clean run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub forwarder_restarts: u32,
    pub forwarded: u64,
    pub metrics: FeedMetricsSnapshot,
}

type ForwarderResult = Result<ForwarderReport, Box<ForwarderFailure>>;

enum Supervision {
    Shutdown,
    StreamExited(Result<Result<(), ConnectionError>, JoinError>),
    SnapshotExited(Result<(), JoinError>),
    ForwarderExited(Result<ForwarderResult, JoinError>),
    StateSignal(bool),
}

/// Wires and supervises the pipeline for one symbol.
#[derive(Debug)]
pub struct Orchestrator {
    symbol: Arc<SymbolConfig>,
    settings: OrchestratorSettings,
    stream_settings: StreamSettings,
    snapshot_settings: SnapshotSettings,
    forwarder_settings: ForwarderSettings,
    metrics: Arc<FeedMetrics>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        symbol: Arc<SymbolConfig>,
        settings: OrchestratorSettings,
        stream_settings: StreamSettings,
        snapshot_settings: SnapshotSettings,
        forwarder_settings: ForwarderSettings,
    ) -> Self {
        Self {
            symbol,
            settings,
            stream_settings,
            snapshot_settings,
            forwarder_settings,
            metrics: Arc::new(FeedMetrics::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build an orchestrator from a validated configuration.
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(
            config.symbol_config(),
            config.orchestrator_settings(),
            config.stream_settings(),
            config.snapshot_settings(),
            config.forwarder_settings(),
        )
    }

    /// Setting this token stops the whole pipeline. It is never reset.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.metrics.clone()
    }

    /// Run until shutdown or an escalated failure.
    pub async fn run(self, fetcher: SnapshotFetcher, sink: Box<dyn EventSink>) -> Result<RunSummary, ConnectorError> {
        let (queue, consumer) = EventQueue::bounded(self.settings.queue_capacity);

        let stream = StreamClient::new(
            self.stream_settings.clone(),
            self.symbol.clone(),
            queue.clone(),
            self.metrics.clone(),
            self.shutdown.clone(),
        );
        let mut state_rx = stream.subscribe_state();
        let scheduler = SnapshotScheduler::new(
            fetcher,
            self.symbol.clone(),
            self.snapshot_settings.clone(),
            queue,
            self.metrics.clone(),
            self.shutdown.clone(),
        );
        let forwarder = Forwarder::new(
            consumer,
            sink,
            self.forwarder_settings.clone(),
            self.metrics.clone(),
        );

        info!(
            symbol = %self.symbol.symbol,
            queue_capacity = self.settings.queue_capacity,
            "starting pipeline"
        );

        let mut stream_handle = Some(tokio::spawn(stream.run()));
        let mut snapshot_handle = Some(tokio::spawn(scheduler.run()));
        let mut forwarder_handle = Some(tokio::spawn(forwarder.run(self.shutdown.clone())));

        let mut restarts: u32 = 0;
        let mut forwarded: u64 = 0;
        let mut failure: Option<ConnectorError> = None;
        let mut watching_state = true;

        while failure.is_none() {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Supervision::Shutdown,
                res = join_some(&mut forwarder_handle) => Supervision::ForwarderExited(res),
                res = join_some(&mut stream_handle) => Supervision::StreamExited(res),
                res = join_some(&mut snapshot_handle) => Supervision::SnapshotExited(res),
                changed = state_rx.changed(), if watching_state => Supervision::StateSignal(changed.is_ok()),
            };

            match event {
                Supervision::Shutdown => break,
                Supervision::StateSignal(true) => log_health(*state_rx.borrow_and_update()),
                Supervision::StateSignal(false) => watching_state = false,
                Supervision::StreamExited(res) => {
                    stream_handle = None;
                    match res {
                        Ok(Ok(())) => info!("stream client stopped"),
                        Ok(Err(err)) => {
                            error!(component = %Component::Stream, error = %err, "stream client failed");
                            failure = Some(ConnectorError::Stream(err));
                        }
                        Err(join_err) => failure = Some(panicked(Component::Stream, join_err)),
                    }
                }
                Supervision::SnapshotExited(res) => {
                    snapshot_handle = None;
                    if let Err(join_err) = res {
                        failure = Some(panicked(Component::Snapshot, join_err));
                    }
                }
                Supervision::ForwarderExited(res) => {
                    forwarder_handle = None;
                    match res {
                        Ok(Ok(report)) => {
                            forwarded += report.forwarded;
                            info!(forwarded = report.forwarded, "forwarder stopped");
                        }
                        Ok(Err(boxed)) => {
                            let ForwarderFailure {
                                mut forwarder,
                                undelivered,
                                error,
                            } = *boxed;
                            if restarts < self.settings.max_forwarder_restarts {
                                restarts += 1;
                                warn!(
                                    component = %Component::Forwarder,
                                    restarts,
                                    error = %error,
                                    "restarting forwarder, undelivered event goes first"
                                );
                                forwarder.retransmit_first(undelivered);
                                forwarder_handle = Some(tokio::spawn(forwarder.run(self.shutdown.clone())));
                            } else {
                                error!(component = %Component::Forwarder, restarts, error = %error, "forwarder failed");
                                failure = Some(ConnectorError::Forwarder { restarts, source: error });
                            }
                        }
                        Err(join_err) => failure = Some(panicked(Component::Forwarder, join_err)),
                    }
                }
            }

            if stream_handle.is_none() && snapshot_handle.is_none() && forwarder_handle.is_none() {
                break;
            }
        }

        self.shutdown.cancel();
        let joined = self
            .join_all_with_deadline(stream_handle, snapshot_handle, forwarder_handle, restarts)
            .await;

        let metrics = self.metrics.snapshot();
        log_summary(&metrics);

        let drained = match joined {
            Ok(drained) => drained,
            Err(err) => return Err(failure.unwrap_or(err)),
        };
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(RunSummary {
            forwarder_restarts: restarts,
            forwarded: forwarded + drained,
            metrics,
        })
    }

    /// Wait for every remaining task under one deadline; abort the rest on timeout.
    async fn join_all_with_deadline(
        &self,
        stream: Option<JoinHandle<Result<(), ConnectionError>>>,
        snapshot: Option<JoinHandle<()>>,
        forwarder: Option<JoinHandle<ForwarderResult>>,
        restarts: u32,
    ) -> Result<u64, ConnectorError> {
        let grace = self.settings.shutdown_grace;
        let deadline = Instant::now() + grace;
        let mut drained = 0;
        let mut first_error: Option<ConnectorError> = None;

        if let Some(handle) = forwarder {
            match join_until(handle, deadline).await {
                Some(Ok(Ok(report))) => drained = report.forwarded,
                Some(Ok(Err(boxed))) => {
                    let ForwarderFailure { undelivered, error, .. } = *boxed;
                    error!(
                        component = %Component::Forwarder,
                        kind = undelivered.kind().as_str(),
                        error = %error,
                        "forwarder failed while draining"
                    );
                    first_error.get_or_insert(ConnectorError::Forwarder { restarts, source: error });
                }
                Some(Err(join_err)) => {
                    first_error.get_or_insert(panicked(Component::Forwarder, join_err));
                }
                None => {
                    first_error.get_or_insert(timed_out(Component::Forwarder, grace));
                }
            }
        }

        if let Some(handle) = stream {
            match join_until(handle, deadline).await {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(err))) => {
                    first_error.get_or_insert(ConnectorError::Stream(err));
                }
                Some(Err(join_err)) => {
                    first_error.get_or_insert(panicked(Component::Stream, join_err));
                }
                None => {
                    first_error.get_or_insert(timed_out(Component::Stream, grace));
                }
            }
        }

        if let Some(handle) = snapshot {
            match join_until(handle, deadline).await {
                Some(Ok(())) => {}
                Some(Err(join_err)) => {
                    first_error.get_or_insert(panicked(Component::Snapshot, join_err));
                }
                None => {
                    first_error.get_or_insert(timed_out(Component::Snapshot, grace));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(drained),
        }
    }
}

/// Resolves when the task finishes; pends forever once the slot is empty.
async fn join_some<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match slot.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// `None` if the deadline passed first; the task is aborted in that case.
async fn join_until<T>(mut handle: JoinHandle<T>, deadline: Instant) -> Option<Result<T, JoinError>> {
    tokio::select! {
        res = &mut handle => Some(res),
        _ = tokio::time::sleep_until(deadline) => {
            handle.abort();
            None
        }
    }
}

fn panicked(component: Component, join_err: JoinError) -> ConnectorError {
    error!(%component, error = %join_err, "task ended abnormally");
    ConnectorError::Panicked {
        component,
        message: join_err.to_string(),
    }
}

fn timed_out(component: Component, grace: Duration) -> ConnectorError {
    warn!(%component, grace_ms = grace.as_millis() as u64, "task aborted after shutdown grace");
    ConnectorError::ShutdownTimedOut { component, grace }
}

fn log_health(state: ConnectionState) {
    match state {
        ConnectionState::Open => info!(?state, "market stream healthy"),
        ConnectionState::Connecting => info!(?state, "market stream connecting"),
        ConnectionState::Closing | ConnectionState::Disconnected => warn!(?state, "market stream not available"),
    }
}

fn log_summary(metrics: &FeedMetricsSnapshot) {
    info!(
        incrementals_received = metrics.incrementals_received,
        incrementals_enqueued = metrics.incrementals_enqueued,
        queue_saturation_drops = metrics.queue_saturation_drops,
        parse_errors = metrics.parse_errors,
        oversize_drops = metrics.oversize_drops,
        reconnects = metrics.reconnects,
        handshake_failures = metrics.handshake_failures,
        snapshots_fetched = metrics.snapshots_fetched,
        snapshots_failed = metrics.snapshots_failed,
        snapshots_skipped = metrics.snapshots_skipped,
        snapshot_enqueue_timeouts = metrics.snapshot_enqueue_timeouts,
        events_forwarded = metrics.events_forwarded(),
        sink_retries = metrics.sink_retries,
        sink_failures = metrics.sink_failures,
        "pipeline stopped"
    );
}
