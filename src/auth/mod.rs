//! Authentication module for the Coinbase WebSocket feed.
//!
//! This module provides:
//! - Credential management with secure secret storage
//! - HMAC-SHA256 signature generation for subscription frames

mod credentials;
mod signature;

pub use credentials::{
    API_KEY_VAR, API_SECRET_VAR, Credentials, CredentialsProvider, EnvCredentials,
};
pub use signature::sign_hmac_sha256;
