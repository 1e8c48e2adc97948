/*
[INPUT]:  Exchange depth schema definitions and serde requirements
[OUTPUT]: Ordering headers read out of depth snapshot / depth update bodies
[POS]:    Data layer - type definitions for market data communication
[UPDATE]: When exchange schema changes or new types added
[UPDATE]: 2026-10-02 Replace trading models with depth snapshot/update models
[UPDATE]: 2026-10-15 Header-only models; price levels stay in the raw body
*/

use serde::{Deserialize, Serialize};

/// Ordering header of a `GET /api/v3/depth` body.
///
/// Unknown fields (`bids`, `asks`) are ignored; the levels are never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshotHeader {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
}

/// Ordering header of a `depthUpdate` stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdateHeader {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
}

impl DepthUpdateHeader {
    pub const EVENT_TYPE: &'static str = "depthUpdate";
}

/// Number of price levels on one side of a depth body, without decoding them.
pub fn level_count(body: &serde_json::Value, side: &str) -> usize {
    body.get(side)
        .and_then(serde_json::Value::as_array)
        .map_or(0, Vec::len)
}
