/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public depthfeed adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod http;
pub mod types;
pub mod ws;

// Re-export commonly used types from http
pub use http::{
    API_KEY_HEADER,
    BinanceClient,
    ClientConfig,
    Credentials,
    DEFAULT_REST_BASE_URL,
    DepthResponse,
    DepthfeedError,
    MAX_DEPTH_LIMIT,
    Result,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    DEFAULT_STREAM_BASE_URL,
    DepthFrame,
    DepthStreamConnection,
    InboundFrame,
    StreamMessage,
    parse_stream_text,
};
