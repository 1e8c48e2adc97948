/*
[INPUT]:  Stream names and request ids
[OUTPUT]: Typed Rust request structs with serialization support
[POS]:    Data layer - type definitions for market data communication
[UPDATE]: When exchange schema changes or new types added
*/

use serde::{Deserialize, Serialize};

use super::enums::StreamMethod;

/// Stream control request, e.g. `{"method":"SUBSCRIBE","params":["btcusdt@depth"],"id":1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub method: StreamMethod,
    pub params: Vec<String>,
    pub id: u64,
}

impl StreamRequest {
    pub fn subscribe(streams: Vec<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Subscribe,
            params: streams,
            id,
        }
    }
}
