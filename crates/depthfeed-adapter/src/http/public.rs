/*
[INPUT]:  Symbol identifiers and depth limit
[OUTPUT]: Full order book snapshot (typed header + untouched JSON body)
[POS]:    HTTP layer - public market data endpoints (API key optional)
[UPDATE]: When adding new public endpoints or changing response format
[UPDATE]: 2026-10-02 Depth snapshot endpoint returns raw body alongside lastUpdateId
*/

use crate::http::{BinanceClient, DepthfeedError, Result};
use crate::types::{DepthSnapshotHeader, level_count};
use reqwest::Method;
use serde::Deserialize;

/// Largest `limit` accepted by the depth endpoint
pub const MAX_DEPTH_LIMIT: u32 = 5000;

/// Depth snapshot as returned by the exchange.
///
/// `body` is forwarded downstream untouched; `last_update_id` and the level
/// counts are read from it once so callers do not have to re-parse.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthResponse {
    pub last_update_id: u64,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub body: serde_json::Value,
}

impl DepthResponse {
    pub fn from_body(body: serde_json::Value) -> Result<Self> {
        let header = DepthSnapshotHeader::deserialize(&body).map_err(|err| {
            DepthfeedError::InvalidResponse(format!("malformed depth snapshot: {err}"))
        })?;

        Ok(Self {
            last_update_id: header.last_update_id,
            bid_levels: level_count(&body, "bids"),
            ask_levels: level_count(&body, "asks"),
            body,
        })
    }
}

impl BinanceClient {
    /// Query order book depth
    ///
    /// GET /api/v3/depth?symbol={symbol}&limit={limit}
    pub async fn get_depth(&self, symbol: &str, limit: u32) -> Result<DepthResponse> {
        if limit == 0 || limit > MAX_DEPTH_LIMIT {
            return Err(DepthfeedError::Config(format!(
                "depth limit must be within 1..={MAX_DEPTH_LIMIT}, got {limit}"
            )));
        }

        let builder = self
            .request(Method::GET, "/api/v3/depth")?
            .query(&[("symbol", symbol.to_ascii_uppercase()), ("limit", limit.to_string())]);
        let body: serde_json::Value = self.send_json(builder).await?;
        DepthResponse::from_body(body)
    }
}
