//! Billing behavior configuration (grace period, sweeps, token refresh)

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::ports::ClaimPolicy;

/// Billing behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Days a past-due subscription keeps access before cancellation
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,

    /// Refresh access tokens this many seconds before they expire
    #[serde(default = "default_refresh_lead")]
    pub refresh_lead_secs: u64,

    /// Timeout for outbound gateway requests
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Time between sweeper ticks
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age a pending event must reach before the sweep takes it over
    #[serde(default = "default_pending_grace")]
    pub pending_grace_secs: i64,

    /// Age after which a processing claim is considered abandoned
    #[serde(default = "default_processing_stale")]
    pub processing_stale_secs: i64,

    /// Settled events older than this are archived
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,

    /// Events and subscriptions examined per sweep
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

impl BillingConfig {
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.grace_period_days)
    }

    pub fn refresh_lead(&self) -> Duration {
        Duration::from_secs(self.refresh_lead_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn processing_stale(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.processing_stale_secs)
    }

    pub fn archive_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.archive_after_days)
    }

    /// Claim policy for the retry sweep.
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            pending_grace: chrono::Duration::seconds(self.pending_grace_secs),
            stale_after: self.processing_stale(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_period_days < 0 {
            return Err(ValidationError::InvalidBillingSetting("grace_period_days"));
        }
        if self.http_timeout_secs == 0 {
            return Err(ValidationError::InvalidBillingSetting("http_timeout_secs"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidBillingSetting("sweep_interval_secs"));
        }
        if self.pending_grace_secs < 0 {
            return Err(ValidationError::InvalidBillingSetting("pending_grace_secs"));
        }
        // A claim must outlive a full gateway round trip
        if self.processing_stale_secs <= self.http_timeout_secs as i64 {
            return Err(ValidationError::InvalidBillingSetting("processing_stale_secs"));
        }
        if self.archive_after_days <= 0 {
            return Err(ValidationError::InvalidBillingSetting("archive_after_days"));
        }
        if self.sweep_batch_size == 0 {
            return Err(ValidationError::InvalidBillingSetting("sweep_batch_size"));
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            refresh_lead_secs: default_refresh_lead(),
            http_timeout_secs: default_http_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            pending_grace_secs: default_pending_grace(),
            processing_stale_secs: default_processing_stale(),
            archive_after_days: default_archive_after_days(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

fn default_grace_period_days() -> i64 {
    7
}

fn default_refresh_lead() -> u64 {
    60
}

fn default_http_timeout() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_pending_grace() -> i64 {
    60
}

fn default_processing_stale() -> i64 {
    300
}

fn default_archive_after_days() -> i64 {
    90
}

fn default_sweep_batch_size() -> usize {
    100
}
