//! RetrySweep - re-drives stored events the ingest path did not finish.
//!
//! Picks up pending events older than the pending grace (their background
//! attempt never ran, e.g. the process restarted), failed events whose retry
//! is due, and processing events whose claim went stale.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{ClaimPolicy, WebhookEventRepository};

use super::{EventProcessor, ProcessOutcome};

/// Default maximum number of events handled per sweep.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweepReport {
    pub processed: usize,
    pub skipped: usize,
    pub rescheduled: usize,
    pub failed_permanently: usize,
    pub not_claimed: usize,
}

impl RetrySweepReport {
    pub fn attempted(&self) -> usize {
        self.processed + self.skipped + self.rescheduled + self.failed_permanently
    }

    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Processed => self.processed += 1,
            ProcessOutcome::Skipped(_) => self.skipped += 1,
            ProcessOutcome::RetryScheduled(_) => self.rescheduled += 1,
            ProcessOutcome::FailedPermanently => self.failed_permanently += 1,
            ProcessOutcome::NotClaimed => self.not_claimed += 1,
        }
    }
}

pub struct RetrySweep {
    events: Arc<dyn WebhookEventRepository>,
    processor: Arc<EventProcessor>,
    policy: ClaimPolicy,
    batch_size: usize,
}

impl RetrySweep {
    pub fn new(events: Arc<dyn WebhookEventRepository>, processor: Arc<EventProcessor>) -> Self {
        Self {
            events,
            processor,
            policy: ClaimPolicy::default(),
            batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }

    pub fn with_policy(mut self, policy: ClaimPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Runs one pass over claimable events.
    pub async fn run_once(&self, now: Timestamp) -> Result<RetrySweepReport, DomainError> {
        let due = self
            .events
            .find_claimable(now, self.policy, self.batch_size)
            .await?;

        let mut report = RetrySweepReport::default();
        for id in due {
            match self.processor.process(id, now).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => warn!(webhook_event_id = %id, error = %e, "Retry attempt not recorded"),
            }
        }

        if report.attempted() > 0 {
            info!(
                processed = report.processed,
                skipped = report.skipped,
                rescheduled = report.rescheduled,
                failed_permanently = report.failed_permanently,
                "Webhook retry sweep finished"
            );
        }
        Ok(report)
    }
}
