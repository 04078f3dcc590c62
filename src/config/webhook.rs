//! Webhook endpoint configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::billing::DEFAULT_SIGNATURE_TOLERANCE_SECS;

/// Largest body accepted by default (1 MiB).
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Webhook endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Bodies above this size are rejected with 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Accepted age of a timestamped signature, in seconds
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_body_bytes == 0 || self.max_body_bytes > 16 * DEFAULT_MAX_BODY_BYTES {
            return Err(ValidationError::InvalidWebhookSetting("max_body_bytes"));
        }
        if self.signature_tolerance_secs <= 0 || self.signature_tolerance_secs > 3600 {
            return Err(ValidationError::InvalidWebhookSetting("signature_tolerance_secs"));
        }
        Ok(())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            signature_tolerance_secs: default_signature_tolerance(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_signature_tolerance() -> i64 {
    DEFAULT_SIGNATURE_TOLERANCE_SECS
}
