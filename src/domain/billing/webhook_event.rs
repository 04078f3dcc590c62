//! Stored webhook events and their retry schedule.
//!
//! A `WebhookEvent` is created the first time a signed delivery is accepted
//! and is never deleted. Status moves through
//! `pending → processing → {processed | skipped | failed}`; failed events
//! are retried on a doubling schedule until `MAX_RETRIES` is exhausted.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, Timestamp, ValidationError, WebhookEventId};

use super::{Gateway, NormalizedEvent};

/// Failed attempts that still get a retry scheduled.
pub const MAX_RETRIES: u32 = 5;

/// Delay before retry number `retry_count` (1-based): 1, 2, 4, 8, 16 minutes.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(30);
    Duration::minutes(1_i64 << exponent)
}

/// Processing status of a stored webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Skipped,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Processing => "processing",
            WebhookStatus::Processed => "processed",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Skipped => "skipped",
        }
    }
}

impl StateMachine for WebhookStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use WebhookStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                // Stale claim taken over by another worker
                | (Processing, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Skipped)
                | (Failed, Processing)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use WebhookStatus::*;
        match self {
            Pending => vec![Processing],
            Processing => vec![Processing, Processed, Failed, Skipped],
            Failed => vec![Processing],
            Processed | Skipped => vec![],
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WebhookStatus::Pending),
            "processing" => Ok(WebhookStatus::Processing),
            "processed" => Ok(WebhookStatus::Processed),
            "failed" => Ok(WebhookStatus::Failed),
            "skipped" => Ok(WebhookStatus::Skipped),
            other => Err(ValidationError::invalid_format(
                "webhook_status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// Outcome of recording a failed processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Another attempt is due at the given time.
    RetryAt(Timestamp),
    /// No further automatic attempts; needs manual reconciliation.
    Permanent,
}

/// A webhook event as stored in the event ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub gateway: Gateway,
    /// Unique per gateway.
    pub event_id: String,
    pub event_type: String,
    /// The normalized event, replayed on every processing attempt.
    pub payload: serde_json::Value,
    /// Delivery headers kept for audit.
    pub headers: serde_json::Value,
    pub status: WebhookStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub received_at: Timestamp,
    pub processing_started_at: Option<Timestamp>,
    pub processed_at: Option<Timestamp>,
    pub archived_at: Option<Timestamp>,
}

impl WebhookEvent {
    /// Builds the pending record for a freshly verified event.
    pub fn received(
        event: &NormalizedEvent,
        headers: serde_json::Value,
        now: Timestamp,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: WebhookEventId::new(),
            gateway: event.gateway,
            event_id: event.event_id.clone(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            headers,
            status: WebhookStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            received_at: now,
            processing_started_at: None,
            processed_at: None,
            archived_at: None,
        })
    }

    /// Decodes the stored normalized event.
    pub fn normalized_event(&self) -> Result<NormalizedEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// True if a worker may claim this event at `now`.
    ///
    /// Pending events are claimable once `pending_grace` has passed since
    /// receipt (zero for the ingest path), failed events once their retry is
    /// due, and processing events once their claim is older than `stale_after`.
    pub fn is_claimable(&self, now: Timestamp, pending_grace: Duration, stale_after: Duration) -> bool {
        match self.status {
            WebhookStatus::Pending => !now.is_before(&self.received_at.plus(pending_grace)),
            WebhookStatus::Failed => self.is_retry_due(now),
            WebhookStatus::Processing => self
                .processing_started_at
                .map(|started| !now.is_before(&started.plus(stale_after)))
                .unwrap_or(true),
            WebhookStatus::Processed | WebhookStatus::Skipped => false,
        }
    }

    /// True for failed events whose scheduled retry time has arrived.
    pub fn is_retry_due(&self, now: Timestamp) -> bool {
        self.status == WebhookStatus::Failed
            && self.next_retry_at.map(|at| !now.is_before(&at)).unwrap_or(false)
    }

    /// True if the event failed and no retry will ever be scheduled.
    pub fn is_permanently_failed(&self) -> bool {
        self.status == WebhookStatus::Failed && self.next_retry_at.is_none()
    }

    pub fn start_processing(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(WebhookStatus::Processing)?;
        self.processing_started_at = Some(now);
        Ok(())
    }

    pub fn mark_processed(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(WebhookStatus::Processed)?;
        self.processed_at = Some(now);
        self.next_retry_at = None;
        self.last_error = None;
        Ok(())
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(WebhookStatus::Skipped)?;
        self.processed_at = Some(now);
        self.next_retry_at = None;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Records a transient failure and schedules the next attempt.
    ///
    /// The retry count is incremented first; counts 1 through `MAX_RETRIES`
    /// get a retry after `backoff_delay(count)`, the next failure is permanent.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        now: Timestamp,
    ) -> Result<FailureDisposition, ValidationError> {
        self.status = self.status.transition_to(WebhookStatus::Failed)?;
        self.retry_count += 1;
        self.last_error = Some(error.into());

        if self.retry_count <= MAX_RETRIES {
            let at = now.plus(backoff_delay(self.retry_count));
            self.next_retry_at = Some(at);
            Ok(FailureDisposition::RetryAt(at))
        } else {
            self.next_retry_at = None;
            Ok(FailureDisposition::Permanent)
        }
    }

    /// Records a failure that retrying cannot fix.
    pub fn mark_permanently_failed(
        &mut self,
        error: impl Into<String>,
    ) -> Result<FailureDisposition, ValidationError> {
        self.status = self.status.transition_to(WebhookStatus::Failed)?;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        Ok(FailureDisposition::Permanent)
    }
}
