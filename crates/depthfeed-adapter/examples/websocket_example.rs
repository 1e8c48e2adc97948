/*
[INPUT]:  Market stream URL and symbol
[OUTPUT]: First few depth update frames printed to stdout
[POS]:    Examples - real-time depth stream
[UPDATE]: When stream handshake or frame format changes
*/

use std::time::Duration;

use depthfeed_adapter::*;

#[tokio::main]
async fn main() {
    println!("=== Depth Stream Example ===\n");

    let mut connection = match DepthStreamConnection::connect(DEFAULT_STREAM_BASE_URL).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            return;
        }
    };
    println!("✓ Connected to {}", connection.url());

    let streams = vec![DepthSpeed::Ms1000.stream_name("BTCUSDT")];
    if let Err(e) = connection.subscribe(streams, Duration::from_secs(5)).await {
        eprintln!("Subscription failed: {}", e);
        return;
    }
    println!("✓ Subscribed\n");

    let mut received = 0;
    while received < 5 {
        match connection.recv().await {
            Some(Ok(InboundFrame::Text(text))) => {
                if let Ok(StreamMessage::Depth(frame)) = parse_stream_text(&text) {
                    received += 1;
                    println!(
                        "depth {} [{}..={}]",
                        frame.symbol, frame.first_update_id, frame.final_update_id
                    );
                }
            }
            Some(Ok(InboundFrame::Ping(payload))) => {
                if let Err(e) = connection.pong(payload).await {
                    eprintln!("Pong failed: {}", e);
                    break;
                }
            }
            Some(Ok(InboundFrame::Close(reason))) => {
                println!("Server closed: {:?}", reason);
                break;
            }
            Some(Ok(InboundFrame::Pong)) | Some(Ok(InboundFrame::Undecodable { .. })) => {}
            Some(Err(e)) => {
                eprintln!("Stream error: {}", e);
                break;
            }
            None => break,
        }
    }

    connection.close().await;
    println!("\n✓ Depth stream example complete");
}
