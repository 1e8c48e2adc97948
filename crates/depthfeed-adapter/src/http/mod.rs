/*
[INPUT]:  HTTP client configuration and API endpoints
[OUTPUT]: HTTP responses and typed API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod public;

pub use error::{DepthfeedError, Result};

pub use client::{API_KEY_HEADER, BinanceClient, ClientConfig, Credentials, DEFAULT_REST_BASE_URL};
pub use public::{DepthResponse, MAX_DEPTH_LIMIT};
