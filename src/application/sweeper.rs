//! BillingSweeper - Background loop for time-driven billing work.
//!
//! Each tick runs, in order:
//! 1. the webhook retry sweep (pending, due failed and stale processing events)
//! 2. the subscription reconciliation sweep (trial expiry, past due, grace, deferred cancel)
//! 3. archival of settled webhook events
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 60s | Time between ticks |
//! | `archive_after` | 90 days | Age at which settled events are archived |
//!
//! ## Graceful Shutdown
//!
//! The loop finishes the tick in progress and returns once the shutdown
//! watch flips to `true`. A failing step is logged and the next tick retries
//! it, so a database blip never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{error, info};

use crate::application::handlers::{
    ReconcileReport, ReconcileSubscriptionsHandler, RetrySweep, RetrySweepReport,
};
use crate::domain::foundation::Timestamp;
use crate::ports::WebhookEventRepository;

/// Configuration for the BillingSweeper service.
#[derive(Debug, Clone)]
pub struct BillingSweeperConfig {
    pub interval: Duration,
    pub archive_after: chrono::Duration,
}

impl Default for BillingSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            archive_after: chrono::Duration::days(90),
        }
    }
}

impl BillingSweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_archive_after(mut self, archive_after: chrono::Duration) -> Self {
        self.archive_after = archive_after;
        self
    }
}

/// What one tick did. A step that failed reports `None`.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub retry: Option<RetrySweepReport>,
    pub reconcile: Option<ReconcileReport>,
    pub archived: Option<u64>,
}

pub struct BillingSweeper {
    retry_sweep: Arc<RetrySweep>,
    reconciler: Arc<ReconcileSubscriptionsHandler>,
    events: Arc<dyn WebhookEventRepository>,
    config: BillingSweeperConfig,
}

impl BillingSweeper {
    pub fn new(
        retry_sweep: Arc<RetrySweep>,
        reconciler: Arc<ReconcileSubscriptionsHandler>,
        events: Arc<dyn WebhookEventRepository>,
        config: BillingSweeperConfig,
    ) -> Self {
        Self {
            retry_sweep,
            reconciler,
            events,
            config,
        }
    }

    /// Runs ticks until the shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        info!(interval_secs = self.config.interval.as_secs(), "Billing sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Billing sweeper stopped");
                        return;
                    }
                }

                _ = interval.tick() => {
                    self.run_once(Timestamp::now()).await;
                }
            }
        }
    }

    /// Runs every step once at `now`.
    pub async fn run_once(&self, now: Timestamp) -> SweepReport {
        let retry = match self.retry_sweep.run_once(now).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "Webhook retry sweep failed");
                None
            }
        };

        let reconcile = match self.reconciler.run_once(now).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "Reconciliation sweep failed");
                None
            }
        };

        let cutoff = now.plus(-self.config.archive_after);
        let archived = match self.events.archive_settled_before(cutoff, now).await {
            Ok(count) => {
                if count > 0 {
                    info!(archived = count, cutoff = %cutoff, "Archived settled webhook events");
                }
                Some(count)
            }
            Err(err) => {
                error!(error = %err, "Webhook archival failed");
                None
            }
        };

        SweepReport {
            retry,
            reconcile,
            archived,
        }
    }
}
