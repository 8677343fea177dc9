//! Example: Streaming ticker and heartbeat frames.
//!
//! Reads `COINBASE_API_KEY` and `COINBASE_API_SECRET` from the environment
//! (or a `.env` file) and prints every inbound frame until Ctrl+C.
//!
//! Run with: cargo run --example ticker_feed

use futures_util::StreamExt;
use coinbase_ws_feed::auth::EnvCredentials;
use coinbase_ws_feed::ws::{ReadChannel, WsChannel, WsClient, WsConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(credentials) = EnvCredentials::try_from_env() else {
        eprintln!("Set COINBASE_API_KEY and COINBASE_API_SECRET to run this example.");
        return Ok(());
    };

    let frames = ReadChannel::bounded(256);
    let config = WsConfig::builder()
        .credentials_provider(&credentials)
        .read_channel(frames.clone())
        .channel(WsChannel::heartbeats(["BTC-USD"]))
        .channel(WsChannel::ticker(["BTC-USD", "ETH-USD"]))
        .use_backoff(true)
        .debug(true)
        .on_connect(|| println!("[connected]"))
        .on_disconnect(|| println!("[disconnected]"))
        .on_reconnect(|| println!("[reconnected]"))
        .max_reconnect_attempts(10)
        .on_reconnect_abandoned(|e| eprintln!("[gave up] {e}"))
        .build();

    let client = WsClient::new(config)?;
    client.connect().await?;
    println!("Subscribed! Press Ctrl+C to exit.\n");

    let mut stream = client.read_chan().expect("receiver not taken yet");
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(frame) => println!("{}", String::from_utf8_lossy(&frame)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    Ok(())
}
