/*
[INPUT]:  Error sources (HTTP, API, serialization, WebSocket, subscription)
[OUTPUT]: Structured error types with context and retry classification
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the depthfeed adapter
#[derive(Error, Debug)]
pub enum DepthfeedError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Stream subscription was refused by the server
    #[error("Subscription rejected (code {code}): {message}")]
    SubscriptionRejected { code: i64, message: String },

    /// Connection was closed by the peer
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimit { retry_after: u64 },

    /// Operation did not complete in time
    #[error("Timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl DepthfeedError {
    /// Transport-level failures that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DepthfeedError::Http(_)
                | DepthfeedError::RateLimit { .. }
                | DepthfeedError::Timeout { .. }
                | DepthfeedError::WebSocket(_)
                | DepthfeedError::Closed(_)
        )
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        DepthfeedError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }

    pub fn timeout(duration: std::time::Duration) -> Self {
        DepthfeedError::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DepthfeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DepthfeedError::WebSocket(err.to_string())
    }
}

/// Result type alias for depthfeed operations
pub type Result<T> = std::result::Result<T, DepthfeedError>;
