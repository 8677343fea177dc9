//! Subscription descriptors for the Coinbase WebSocket feed.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::{Credentials, sign_hmac_sha256};
use crate::error::CoinbaseError;

/// Feed channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    /// Periodic heartbeats keeping the connection open.
    #[serde(rename = "heartbeats")]
    Heartbeats,
    /// OHLC candles.
    #[serde(rename = "candles")]
    Candles,
    /// Product status updates.
    #[serde(rename = "status")]
    Status,
    /// Real-time ticker updates.
    #[serde(rename = "ticker")]
    Ticker,
    /// Batched ticker updates.
    #[serde(rename = "ticker_batch")]
    TickerBatch,
    /// Level 2 order book.
    #[serde(rename = "l2_data")]
    Level2,
    /// Authenticated user orders.
    #[serde(rename = "user")]
    User,
    /// Market trades.
    #[serde(rename = "market_trades")]
    MarketTrades,
}

impl ChannelType {
    /// Wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeats => "heartbeats",
            Self::Candles => "candles",
            Self::Status => "status",
            Self::Ticker => "ticker",
            Self::TickerBatch => "ticker_batch",
            Self::Level2 => "l2_data",
            Self::User => "user",
            Self::MarketTrades => "market_trades",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a descriptor subscribes or unsubscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubType {
    Subscribe,
    Unsubscribe,
}

/// A subscribe/unsubscribe intent for one channel.
///
/// Only the intent is stored. The timestamp and signature are computed by
/// [`WsChannel::marshal`] every time the frame is sent, so a descriptor can
/// be replayed on each reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsChannel {
    /// Subscribe or unsubscribe.
    pub sub_type: SubType,
    /// Channel name.
    pub channel: ChannelType,
    /// Product identifiers (e.g. `BTC-USD`).
    pub product_ids: Vec<String>,
}

/// Wire frame for a signed subscription request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionFrame {
    /// `subscribe` or `unsubscribe`.
    #[serde(rename = "type")]
    pub sub_type: SubType,
    /// Product identifiers.
    pub product_ids: Vec<String>,
    /// Channel name.
    pub channel: ChannelType,
    /// Hex HMAC-SHA256 signature.
    pub signature: String,
    /// API key.
    pub api_key: String,
    /// Unix seconds, as a decimal string.
    pub timestamp: String,
}

impl WsChannel {
    /// Create a new descriptor.
    pub fn new<I, S>(sub_type: SubType, channel: ChannelType, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sub_type,
            channel,
            product_ids: product_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Subscribe to a channel.
    pub fn subscribe<I, S>(channel: ChannelType, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(SubType::Subscribe, channel, product_ids)
    }

    /// Unsubscribe from a channel.
    pub fn unsubscribe<I, S>(channel: ChannelType, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(SubType::Unsubscribe, channel, product_ids)
    }

    /// Subscribe to heartbeats, which keep an otherwise quiet connection open.
    pub fn heartbeats<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::Heartbeats, product_ids)
    }

    /// Subscribe to five-minute candles.
    pub fn candles<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::Candles, product_ids)
    }

    /// Subscribe to product status updates.
    pub fn status<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::Status, product_ids)
    }

    /// Subscribe to real-time price updates on every match.
    pub fn ticker<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::Ticker, product_ids)
    }

    /// Subscribe to ticker updates batched every few seconds.
    pub fn ticker_batch<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::TickerBatch, product_ids)
    }

    /// Subscribe to the level 2 order book (`l2_data` on the wire).
    pub fn level2<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::Level2, product_ids)
    }

    /// Subscribe to the authenticated user's order updates.
    pub fn user<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::User, product_ids)
    }

    /// Subscribe to real-time trades.
    pub fn market_trades<I: IntoIterator<Item = S>, S: Into<String>>(product_ids: I) -> Self {
        Self::subscribe(ChannelType::MarketTrades, product_ids)
    }

    /// Stamp, sign and serialize this descriptor using the current time.
    pub fn marshal(&self, credentials: &Credentials) -> Result<Vec<u8>, CoinbaseError> {
        self.marshal_at(credentials, OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Stamp, sign and serialize this descriptor with an explicit timestamp.
    pub fn marshal_at(
        &self,
        credentials: &Credentials,
        timestamp: i64,
    ) -> Result<Vec<u8>, CoinbaseError> {
        let frame = self.signed_frame(credentials, timestamp)?;
        Ok(serde_json::to_vec(&frame)?)
    }

    /// Build the signed wire frame.
    pub fn signed_frame(
        &self,
        credentials: &Credentials,
        timestamp: i64,
    ) -> Result<SubscriptionFrame, CoinbaseError> {
        let timestamp = timestamp.to_string();
        let signature = sign_hmac_sha256(
            &signing_payload(&timestamp, self.channel, &self.product_ids),
            credentials.expose_secret(),
        )?;

        Ok(SubscriptionFrame {
            sub_type: self.sub_type,
            product_ids: self.product_ids.clone(),
            channel: self.channel,
            signature,
            api_key: credentials.api_key.clone(),
            timestamp,
        })
    }
}

/// Message signed for a subscription, e.g. `1660838876level2ETH-USD,ETH-EUR`.
fn signing_payload(timestamp: &str, channel: ChannelType, product_ids: &[String]) -> String {
    format!("{}{}{}", timestamp, channel.as_str(), product_ids.join(","))
}
