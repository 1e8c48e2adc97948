/*
[INPUT]:  YAML configuration file
[OUTPUT]: Validated connector configuration + per-component settings
[POS]:    Configuration layer - pipeline setup
[UPDATE]: When adding new configuration options
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use depthfeed_adapter::{
    ClientConfig, DEFAULT_REST_BASE_URL, DEFAULT_STREAM_BASE_URL, DepthSpeed, MAX_DEPTH_LIMIT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forwarder::ForwarderSettings;
use crate::orchestrator::OrchestratorSettings;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::snapshot::SnapshotSettings;
use crate::stream::StreamSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Immutable per-symbol parameters shared read-only by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolConfig {
    pub symbol: String,
    pub snapshot_interval: Duration,
    pub snapshot_depth_limit: u32,
    pub max_payload_size: usize,
}

/// Top-level configuration for one connector instance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,
    /// Name written into every downstream frame
    #[serde(default = "default_connector_name")]
    pub connector_name: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Environment variable holding the read-scope API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Largest stream frame accepted, in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    #[serde(default)]
    pub depth_speed: DepthSpeed,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub interval_secs: u64,
    pub initial_delay_ms: u64,
    pub depth_limit: u32,
    pub enqueue_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            initial_delay_ms: 2_000,
            depth_limit: MAX_DEPTH_LIMIT,
            enqueue_timeout_ms: 2_000,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub handshake_timeout_ms: u64,
    pub pong_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed handshakes before giving up; unbounded when absent
    pub max_connect_attempts: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            pong_timeout_ms: 5_000,
            idle_timeout_secs: 60,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_connect_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub poll_interval_ms: u64,
    pub send_timeout_ms: u64,
    pub max_send_attempts: u32,
    pub retry_delay_ms: u64,
    /// Restarts granted after a fatal sink failure before escalating
    pub max_restarts: u32,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            send_timeout_ms: 1_000,
            max_send_attempts: 3,
            retry_delay_ms: 100,
            max_restarts: 1,
        }
    }
}

fn default_connector_name() -> String {
    "Binance".to_string()
}

fn default_ws_url() -> String {
    DEFAULT_STREAM_BASE_URL.to_string()
}

fn default_rest_url() -> String {
    DEFAULT_REST_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "BINANCE_API_KEY".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/unix_socket")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_payload_size() -> usize {
    1024 * 1024
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl ConnectorConfig {
    /// Configuration with defaults for everything but the symbol.
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            connector_name: default_connector_name(),
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            api_key_env: default_api_key_env(),
            socket_path: default_socket_path(),
            queue_capacity: default_queue_capacity(),
            max_payload_size: default_max_payload_size(),
            depth_speed: DepthSpeed::default(),
            snapshot: SnapshotConfig::default(),
            stream: StreamConfig::default(),
            forwarder: ForwarderConfig::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.symbol.trim().is_empty() {
            return invalid("symbol must not be empty".to_string());
        }
        if self.connector_name.trim().is_empty() {
            return invalid("connector_name must not be empty".to_string());
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return invalid(format!("ws_url must use ws:// or wss://, got {}", self.ws_url));
        }
        if !(self.rest_url.starts_with("http://") || self.rest_url.starts_with("https://")) {
            return invalid(format!("rest_url must use http:// or https://, got {}", self.rest_url));
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be greater than zero".to_string());
        }
        if self.max_payload_size == 0 {
            return invalid("max_payload_size must be greater than zero".to_string());
        }
        if self.snapshot.depth_limit == 0 || self.snapshot.depth_limit > MAX_DEPTH_LIMIT {
            return invalid(format!(
                "snapshot.depth_limit must be within 1..={MAX_DEPTH_LIMIT}, got {}",
                self.snapshot.depth_limit
            ));
        }

        let non_zero = [
            ("snapshot.interval_secs", self.snapshot.interval_secs),
            ("snapshot.enqueue_timeout_ms", self.snapshot.enqueue_timeout_ms),
            ("snapshot.request_timeout_ms", self.snapshot.request_timeout_ms),
            ("stream.handshake_timeout_ms", self.stream.handshake_timeout_ms),
            ("stream.pong_timeout_ms", self.stream.pong_timeout_ms),
            ("stream.idle_timeout_secs", self.stream.idle_timeout_secs),
            ("stream.initial_backoff_ms", self.stream.initial_backoff_ms),
            ("forwarder.poll_interval_ms", self.forwarder.poll_interval_ms),
            ("forwarder.send_timeout_ms", self.forwarder.send_timeout_ms),
            ("forwarder.max_send_attempts", u64::from(self.forwarder.max_send_attempts)),
            ("shutdown_grace_ms", self.shutdown_grace_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return invalid(format!("{name} must be greater than zero"));
        }

        if self.stream.initial_backoff_ms > self.stream.max_backoff_ms {
            return invalid(format!(
                "stream.initial_backoff_ms ({}) exceeds stream.max_backoff_ms ({})",
                self.stream.initial_backoff_ms, self.stream.max_backoff_ms
            ));
        }
        if self.stream.max_connect_attempts == Some(0) {
            return invalid("stream.max_connect_attempts must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn symbol_config(&self) -> Arc<SymbolConfig> {
        Arc::new(SymbolConfig {
            symbol: self.symbol.trim().to_ascii_uppercase(),
            snapshot_interval: Duration::from_secs(self.snapshot.interval_secs),
            snapshot_depth_limit: self.snapshot.depth_limit,
            max_payload_size: self.max_payload_size,
        })
    }

    pub fn http_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.snapshot.request_timeout_ms),
            ..ClientConfig::default()
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            ws_url: self.ws_url.clone(),
            depth_speed: self.depth_speed,
            handshake_timeout: Duration::from_millis(self.stream.handshake_timeout_ms),
            pong_timeout: Duration::from_millis(self.stream.pong_timeout_ms),
            idle_timeout: Duration::from_secs(self.stream.idle_timeout_secs),
            initial_backoff: Duration::from_millis(self.stream.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.stream.max_backoff_ms),
            max_connect_attempts: self.stream.max_connect_attempts,
        }
    }

    pub fn snapshot_settings(&self) -> SnapshotSettings {
        SnapshotSettings {
            initial_delay: Duration::from_millis(self.snapshot.initial_delay_ms),
            enqueue_timeout: Duration::from_millis(self.snapshot.enqueue_timeout_ms),
        }
    }

    pub fn forwarder_settings(&self) -> ForwarderSettings {
        ForwarderSettings {
            connector_name: self.connector_name.clone(),
            poll_interval: Duration::from_millis(self.forwarder.poll_interval_ms),
            send_timeout: Duration::from_millis(self.forwarder.send_timeout_ms),
            max_send_attempts: self.forwarder.max_send_attempts,
            retry_delay: Duration::from_millis(self.forwarder.retry_delay_ms),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            queue_capacity: self.queue_capacity,
            max_forwarder_restarts: self.forwarder.max_restarts,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}
