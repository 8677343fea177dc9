//! Error types for the Coinbase feed client.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all feed client operations.
#[derive(Error, Debug)]
pub enum CoinbaseError {
    /// No API key was configured
    #[error("no api key provided")]
    MissingApiKey,

    /// No API secret was configured
    #[error("no api secret provided")]
    MissingApiSecret,

    /// The delivery channel is absent or already closed
    #[error("read channel is invalid")]
    InvalidReadChannel,

    /// Operation requires a live connection
    #[error("not connected")]
    NotConnected,

    /// The client has been shut down
    #[error("client is shutting down")]
    ShuttingDown,

    /// Dialing the endpoint took longer than the configured timeout
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Signing error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// WebSocket connection closed
    #[error("WebSocket connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for the closure
        reason: String,
    },

    /// The reconnect loop gave up
    #[error("reconnection abandoned after {attempts} attempts")]
    ReconnectAbandoned {
        /// Number of failed attempts
        attempts: u32,
        /// The error from the final attempt
        #[source]
        last: Box<CoinbaseError>,
    },
}

impl CoinbaseError {
    /// Check if this error comes from configuration validation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey | Self::MissingApiSecret | Self::InvalidReadChannel
        )
    }

    /// Check if this error describes a network condition that may clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_) | Self::WebSocket(_) | Self::ConnectionClosed { .. }
        )
    }
}
