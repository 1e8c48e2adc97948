/*
[INPUT]:  Market stream configuration and subscription streams
[OUTPUT]: Real-time depth update frames
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::{DEFAULT_STREAM_BASE_URL, DepthStreamConnection, InboundFrame, combined_stream_url};
pub use message::{DepthFrame, StreamMessage, parse_stream_text};
