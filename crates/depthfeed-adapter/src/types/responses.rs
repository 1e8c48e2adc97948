/*
[INPUT]:  Exchange reply schema definitions and serde requirements
[OUTPUT]: Typed Rust response structs with serialization support
[POS]:    Data layer - type definitions for market data communication
[UPDATE]: When exchange schema changes or new types added
*/

use serde::{Deserialize, Serialize};

/// REST error body, e.g. `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Reply to a [`StreamRequest`](super::StreamRequest).
///
/// Success is `{"result":null,"id":1}`; rejection is `{"error":{"code":2,"msg":"..."},"id":1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReply {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

impl StreamReply {
    pub fn is_ack(&self) -> bool {
        self.error.is_none()
    }
}
