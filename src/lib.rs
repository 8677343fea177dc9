//! # Coinbase WebSocket Feed
//!
//! An async Rust client for the Coinbase Advanced Trade WebSocket feed.
//!
//! ## Features
//!
//! - Signed channel subscriptions, re-signed on every connection
//! - Automatic reconnection with capped exponential backoff and jitter
//! - Inbound frames delivered through a bounded channel with backpressure
//! - Lifecycle callbacks for connect, disconnect and reconnect
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coinbase_ws_feed::ws::{ReadChannel, WsChannel, WsClient, WsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let frames = ReadChannel::bounded(64);
//!     let config = WsConfig::new(
//!         "api_key",
//!         "api_secret",
//!         frames.clone(),
//!         vec![WsChannel::ticker(["BTC-USD"])],
//!     );
//!
//!     let client = WsClient::new(config)?;
//!     client.connect().await?;
//!
//!     let mut rx = frames.take_receiver().unwrap();
//!     if let Some(frame) = rx.recv().await {
//!         println!("{}", String::from_utf8_lossy(&frame));
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod ws;

// Re-export commonly used types at crate root
pub use error::CoinbaseError;
pub use ws::{ChannelType, WsChannel, WsClient, WsConfig};

/// Result type alias using CoinbaseError
pub type Result<T> = std::result::Result<T, CoinbaseError>;
