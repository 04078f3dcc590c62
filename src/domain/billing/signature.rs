//! Webhook signature verification.
//!
//! Two schemes are supported:
//!
//! - `HmacSignatureVerifier`: hex HMAC-SHA256 of the raw body (PIX webhooks,
//!   `X-Signature` header).
//! - `TimestampedSignatureVerifier`: `t=<unix>,v1=<hex>` header where the MAC
//!   covers `"{t}.{body}"`, with a replay window (card webhooks).
//!
//! All comparisons are constant time.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::Timestamp;

use super::WebhookError;

/// Default maximum age of a timestamped signature (5 minutes).
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Maximum allowed clock skew for future timestamps (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Longest timestamped header accepted before parsing.
const MAX_SIGNATURE_HEADER_LEN: usize = 1024;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &SecretString) -> Result<HmacSha256, WebhookError> {
    HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| WebhookError::Configuration(e.to_string()))
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verifies a hex HMAC-SHA256 of the raw request body.
#[derive(Clone)]
pub struct HmacSignatureVerifier {
    secret: SecretString,
}

impl HmacSignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Checks `signature` (hex, case-insensitive) against the body.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<(), WebhookError> {
        let provided = hex::decode(signature.trim().to_ascii_lowercase())
            .map_err(|_| WebhookError::InvalidSignature)?;

        let mut mac = mac_for(&self.secret)?;
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        if constant_time_compare(&expected, &provided) {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Hex signature for a payload, as a sender would compute it.
    pub fn sign(&self, payload: &[u8]) -> Result<String, WebhookError> {
        let mut mac = mac_for(&self.secret)?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Parsed components of a `t=<timestamp>,v1=<signature>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// All `v1` signatures present (several during secret rotation).
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses a timestamped signature header.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::ParseError` if the header format is invalid.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::ParseError("invalid signature header".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::ParseError("invalid signature timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| {
                        WebhookError::ParseError("invalid v1 signature hex".to_string())
                    })?);
                }
                // Unknown schemes are ignored for forward compatibility
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| WebhookError::ParseError("missing signature timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifier for `t=..,v1=..` signatures with replay protection.
#[derive(Clone)]
pub struct TimestampedSignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl TimestampedSignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies the header against the payload at time `now`.
    ///
    /// # Errors
    ///
    /// - `TimestampOutOfRange` - older than the tolerance or too far in the future
    /// - `InvalidSignature` - malformed or oversized header, or no `v1` signature matches
    pub fn verify(&self, payload: &[u8], header: &str, now: Timestamp) -> Result<(), WebhookError> {
        if header.len() > MAX_SIGNATURE_HEADER_LEN {
            return Err(WebhookError::InvalidSignature);
        }
        let header = SignatureHeader::parse(header).map_err(|e| {
            tracing::debug!(error = %e, "Rejecting malformed signature header");
            WebhookError::InvalidSignature
        })?;
        self.validate_timestamp(header.timestamp, now)?;

        let expected = self.compute_signature(header.timestamp, payload)?;
        if header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Header value a sender would attach for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let signature = self.compute_signature(timestamp, payload)?;
        Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
    }

    fn validate_timestamp(&self, timestamp: i64, now: Timestamp) -> Result<(), WebhookError> {
        match now.as_unix_secs().checked_sub(timestamp) {
            Some(age) if age <= self.tolerance_secs && age >= -MAX_CLOCK_SKEW_SECS => Ok(()),
            _ => Err(WebhookError::TimestampOutOfRange),
        }
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
        let mut mac = mac_for(&self.secret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
