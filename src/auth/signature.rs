//! HMAC-SHA256 signature generation for Coinbase subscription frames.
//!
//! Each subscribe/unsubscribe frame carries a signature computed as:
//! ```text
//! hex(HMAC-SHA256(timestamp + channel + product_ids.join(","), api_secret))
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CoinbaseError;

type HmacSha256 = Hmac<Sha256>;

/// Sign a message with the raw API secret.
///
/// Returns the lowercase hex encoding of the MAC.
///
/// # Example
///
/// ```rust
/// use coinbase_ws_feed::auth::sign_hmac_sha256;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let signature = sign_hmac_sha256("1660838876level2ETH-USD,ETH-EUR", "secret")?;
/// assert_eq!(signature.len(), 64);
/// # Ok(())
/// # }
/// ```
pub fn sign_hmac_sha256(message: &str, secret: &str) -> Result<String, CoinbaseError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoinbaseError::Auth(format!("Invalid HMAC key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
