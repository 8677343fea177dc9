//! Coinbase Advanced Trade WebSocket feed.
//!
//! Maintains one logical connection: dials, signs and replays the configured
//! subscriptions, forwards inbound frames to a [`ReadChannel`], and redials
//! with exponential backoff when the socket drops.
//!
//! # Example
//!
//! ```rust,ignore
//! use coinbase_ws_feed::ws::{ReadChannel, WsChannel, WsClient, WsConfig};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let frames = ReadChannel::bounded(64);
//!     let config = WsConfig::builder()
//!         .credentials("api_key", "api_secret")
//!         .read_channel(frames.clone())
//!         .channel(WsChannel::heartbeats(["BTC-USD"]))
//!         .channel(WsChannel::ticker(["BTC-USD", "ETH-USD"]))
//!         .use_backoff(true)
//!         .on_reconnect(|| println!("Reconnected!"))
//!         .build();
//!
//!     let client = WsClient::new(config)?;
//!     client.connect().await?;
//!
//!     let mut stream = client.read_chan().expect("receiver not taken yet");
//!     while let Some(frame) = stream.next().await {
//!         println!("{}", String::from_utf8_lossy(&frame));
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Log a connection lifecycle event: at `$level` when the client's debug
/// flag is set, otherwise at debug.
macro_rules! lifecycle {
    ($debug:expr, $level:ident, $($arg:tt)+) => {
        if $debug {
            tracing::$level!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}
pub(crate) use lifecycle;

pub mod backoff;
pub mod channel;
mod client;
mod connection;
mod delivery;
mod handler;

pub use backoff::Backoff;
pub use channel::{ChannelType, SubType, SubscriptionFrame, WsChannel};
pub use client::{ConnectionState, WsClient, WsConfig, WsConfigBuilder, endpoints};
pub use connection::{CloseKind, LinkState, classify_close_code, classify_error};
pub use delivery::{Frame, FrameStream, ReadChannel};
pub use handler::{Callbacks, NoopHandler, WsHandler};
