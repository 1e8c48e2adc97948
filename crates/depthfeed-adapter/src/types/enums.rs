/*
[INPUT]:  Exchange stream naming conventions
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for market data communication
[UPDATE]: When exchange schema changes or new types added
*/

use serde::{Deserialize, Serialize};

/// Push cadence of the diff-depth stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthSpeed {
    #[default]
    #[serde(rename = "1000ms")]
    Ms1000,
    #[serde(rename = "100ms")]
    Ms100,
}

impl DepthSpeed {
    /// Stream name for `symbol`, e.g. `btcusdt@depth` or `btcusdt@depth@100ms`.
    pub fn stream_name(self, symbol: &str) -> String {
        let symbol = symbol.to_ascii_lowercase();
        match self {
            DepthSpeed::Ms1000 => format!("{symbol}@depth"),
            DepthSpeed::Ms100 => format!("{symbol}@depth@100ms"),
        }
    }
}

/// Stream control methods understood by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamMethod {
    Subscribe,
}
