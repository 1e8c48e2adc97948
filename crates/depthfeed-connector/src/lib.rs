/*
[INPUT]:  Public API exports for depthfeed-connector crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod event;
pub mod forwarder;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod sink;
pub mod snapshot;
pub mod stream;

// Re-export main types for convenience
pub use config::{ConfigError, ConnectorConfig, SymbolConfig};
pub use event::{Event, EventKind, SequenceInfo, SnapshotPosition};
pub use forwarder::{Forwarder, ForwarderFailure, ForwarderReport, ForwarderSettings};
pub use metrics::{FeedMetrics, FeedMetricsSnapshot};
pub use orchestrator::{Component, ConnectorError, Orchestrator, OrchestratorSettings, RunSummary};
pub use queue::{EnqueueError, EventConsumer, EventQueue};
#[cfg(unix)]
pub use sink::UnixSocketSink;
pub use sink::{ChannelSink, EventSink, SinkWriteError};
pub use snapshot::{ApiKeyProvider, EnvApiKey, SnapshotFetchError, SnapshotFetcher, SnapshotScheduler, SnapshotSettings, StaticApiKey};
pub use stream::{ConnectionError, ConnectionState, StreamClient, StreamSettings};
