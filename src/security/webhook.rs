//! Signed callback verification.
//!
//! Callbacks carry `x-webhook-timestamp` (unix seconds) and
//! `x-webhook-signature`, the hex HMAC-SHA256 of `{timestamp}.{body}` under
//! the shared secret. Staleness is checked before the signature so a
//! replayed request is rejected even when its signature is genuine.

use std::sync::Arc;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WebhookConfig;
use crate::security::clock::Clock;

pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature headers missing")]
    MissingHeaders,

    #[error("timestamp is not a unix time")]
    MalformedTimestamp,

    #[error("timestamp outside replay window ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: u64 },

    #[error("signature mismatch")]
    Mismatch,

    #[error("webhook secret rejected by HMAC")]
    InvalidKey,
}

impl SignatureError {
    pub fn is_stale(&self) -> bool {
        matches!(self, SignatureError::StaleTimestamp { .. })
    }
}

/// Hex signature for `body` sent at `timestamp`.
pub fn sign(secret: &[u8], timestamp: u64, body: &[u8]) -> Result<String, SignatureError> {
    Ok(hex::encode(mac_for(secret, timestamp, body)?.finalize().into_bytes()))
}

fn mac_for(secret: &[u8], timestamp: u64, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
    clock: Arc<dyn Clock>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            clock,
        }
    }

    pub fn from_config(config: &WebhookConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.secret.as_bytes(), config.tolerance_secs, clock)
    }

    /// Verifies the request and returns its timestamp.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<u64, SignatureError> {
        let timestamp = header_str(headers, TIMESTAMP_HEADER).ok_or(SignatureError::MissingHeaders)?;
        let signature = header_str(headers, SIGNATURE_HEADER).ok_or(SignatureError::MissingHeaders)?;

        let timestamp: u64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::MalformedTimestamp)?;

        let now = self.clock.now_secs();
        let skew_secs = now.abs_diff(timestamp);
        if skew_secs > self.tolerance_secs {
            return Err(SignatureError::StaleTimestamp { skew_secs });
        }

        let signature = signature.trim();
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex::decode(signature).map_err(|_| SignatureError::Mismatch)?;

        mac_for(&self.secret, timestamp, body)?
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)?;
        Ok(timestamp)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
