/*
[INPUT]:  Symbol identifier (e.g., "BTCUSDT")
[OUTPUT]: Full depth snapshot summary
[POS]:    Examples - public market data queries
[UPDATE]: When adding new market data endpoints
*/

use depthfeed_adapter::*;

/// Example: fetch one depth snapshot (API key optional)
#[tokio::main]
async fn main() {
    println!("=== Depth Snapshot Example ===\n");

    let mut client = match BinanceClient::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return;
        }
    };

    if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
        client.set_credentials(Credentials { api_key });
        println!("✓ API key header attached\n");
    }

    let symbol = "BTCUSDT";

    println!("Querying depth for {}...", symbol);
    match client.get_depth(symbol, 100).await {
        Ok(depth) => println!(
            "✓ lastUpdateId={} bids={} asks={}",
            depth.last_update_id, depth.bid_levels, depth.ask_levels
        ),
        Err(e) => println!("✗ Error: {}", e),
    }

    println!("\n✓ Market data example complete");
}
