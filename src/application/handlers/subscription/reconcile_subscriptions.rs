//! ReconcileSubscriptionsHandler - time-driven subscription transitions.
//!
//! Applies what no webhook will ever tell us: trials that ran out, periods
//! that lapsed without a renewal, grace periods that elapsed and deferred
//! cancels that came due. Gateway recurrences are ended before the local
//! cancel, so a gateway outage defers the cancel to the next sweep instead
//! of leaving a live recurrence behind a canceled subscription.
//!
//! With payment recovery enabled, a lapsed period is first checked against
//! the payments the gateway collected on the recurrence. A collected payment
//! missing from the ledger means its webhook never reached us: it is stored
//! as a pending event for the retry sweep and the past-due mark waits.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::application::locks::SubscriptionLocks;
use crate::application::GatewayRegistry;
use crate::domain::billing::{
    BillingEventKind, RecurrenceRef, ReconciliationAction, WebhookEvent, DEFAULT_GRACE_PERIOD_DAYS,
};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::ports::{
    PaymentLedger, SaveResult, SubscriptionEventPublisher, SubscriptionRepository,
    WebhookEventRepository,
};

use super::super::publish_lifecycle;

/// Subscriptions examined per sweep.
pub const DEFAULT_RECONCILE_BATCH_SIZE: usize = 500;

/// Outcome for a single subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(ReconciliationAction),
    /// The gateway recurrence could not be ended; retried next sweep.
    Deferred,
    /// Payments the gateway collected were queued for processing instead.
    PaymentsRecovered(usize),
    NothingDue,
}

/// Counts from one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub expired: usize,
    pub marked_past_due: usize,
    pub canceled: usize,
    pub deferred: usize,
    pub recovered: usize,
    pub errors: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Applied(ReconciliationAction::ExpireTrial) => self.expired += 1,
            ReconcileOutcome::Applied(ReconciliationAction::MarkPastDue) => {
                self.marked_past_due += 1
            }
            ReconcileOutcome::Applied(
                ReconciliationAction::CancelAtPeriodEnd | ReconciliationAction::CancelAfterGrace,
            ) => self.canceled += 1,
            ReconcileOutcome::Deferred => self.deferred += 1,
            ReconcileOutcome::PaymentsRecovered(n) => self.recovered += n,
            ReconcileOutcome::NothingDue => {}
        }
    }

    pub fn changed(&self) -> usize {
        self.expired + self.marked_past_due + self.canceled
    }
}

/// Where recovered payments are checked and queued.
struct PaymentRecovery {
    ledger: Arc<dyn PaymentLedger>,
    events: Arc<dyn WebhookEventRepository>,
}

pub struct ReconcileSubscriptionsHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateways: GatewayRegistry,
    publisher: Arc<dyn SubscriptionEventPublisher>,
    locks: Arc<SubscriptionLocks>,
    recovery: Option<PaymentRecovery>,
    grace_period: chrono::Duration,
    batch_size: usize,
}

impl ReconcileSubscriptionsHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateways: GatewayRegistry,
        publisher: Arc<dyn SubscriptionEventPublisher>,
        locks: Arc<SubscriptionLocks>,
    ) -> Self {
        Self {
            subscriptions,
            gateways,
            publisher,
            locks,
            recovery: None,
            grace_period: chrono::Duration::days(DEFAULT_GRACE_PERIOD_DAYS),
            batch_size: DEFAULT_RECONCILE_BATCH_SIZE,
        }
    }

    pub fn with_grace_period(mut self, grace_period: chrono::Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Checks the gateway for uncredited payments before marking past due.
    pub fn with_payment_recovery(
        mut self,
        ledger: Arc<dyn PaymentLedger>,
        events: Arc<dyn WebhookEventRepository>,
    ) -> Self {
        self.recovery = Some(PaymentRecovery { ledger, events });
        self
    }

    /// Runs one sweep over the subscriptions due at `now`.
    ///
    /// Per-subscription failures are logged and counted; only a failure to
    /// list candidates aborts the sweep.
    pub async fn run_once(&self, now: Timestamp) -> Result<ReconcileReport, DomainError> {
        let due = self
            .subscriptions
            .find_due_for_reconciliation(now, self.batch_size)
            .await?;

        let mut report = ReconcileReport::default();
        for id in due {
            match self.reconcile(id, now).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    warn!(subscription_id = %id, error = %err, "Reconciliation failed");
                    report.errors += 1;
                }
            }
        }

        if report.changed() > 0 || report.deferred > 0 || report.recovered > 0 || report.errors > 0 {
            info!(
                expired = report.expired,
                marked_past_due = report.marked_past_due,
                canceled = report.canceled,
                deferred = report.deferred,
                recovered = report.recovered,
                errors = report.errors,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Reconciles one subscription under its lock.
    pub async fn reconcile(
        &self,
        id: SubscriptionId,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, DomainError> {
        let _guard = self.locks.acquire(id).await;

        // 1. Re-read under the lock; a webhook may have renewed it
        let Some(mut subscription) = self.subscriptions.find_by_id(id).await? else {
            return Ok(ReconcileOutcome::NothingDue);
        };
        let Some(action) = subscription.reconciliation_action(now, self.grace_period) else {
            return Ok(ReconcileOutcome::NothingDue);
        };

        // 2. A lapsed period may only have lost its webhook
        if action == ReconciliationAction::MarkPastDue {
            if let Some(recurrence) = subscription.recurrence() {
                let recovered = self.recover_payments(id, &recurrence, now).await?;
                if recovered > 0 {
                    return Ok(ReconcileOutcome::PaymentsRecovered(recovered));
                }
            }
        }

        // 3. End the gateway recurrence first
        if action.cancels_recurrence() {
            if let Some(recurrence) = subscription.recurrence() {
                if let Err(err) = self.gateways.cancel_recurrence(&recurrence).await {
                    warn!(
                        subscription_id = %id,
                        gateway = %recurrence.gateway,
                        recurrence_id = %recurrence.recurrence_id,
                        error = %err,
                        "Could not end recurrence, deferring cancel"
                    );
                    return Ok(ReconcileOutcome::Deferred);
                }
            }
        }

        // 4. Apply and persist
        let event = subscription.apply_reconciliation(action, now)?;
        self.subscriptions.update(&subscription).await?;

        debug!(
            subscription_id = %id,
            action = ?action,
            status = %subscription.status,
            "Reconciliation applied"
        );

        // 5. Notify
        publish_lifecycle(self.publisher.as_ref(), &event).await;

        Ok(ReconcileOutcome::Applied(action))
    }

    /// Queues collected payments the ledger has never seen. Returns how many
    /// were queued; gateway errors count as none found.
    async fn recover_payments(
        &self,
        id: SubscriptionId,
        recurrence: &RecurrenceRef,
        now: Timestamp,
    ) -> Result<usize, DomainError> {
        let Some(recovery) = &self.recovery else {
            return Ok(0);
        };
        let Some(gateway) = self.gateways.get(recurrence.gateway) else {
            return Ok(0);
        };

        let collected = match gateway.recurrence_payments(&recurrence.recurrence_id).await {
            Ok(collected) => collected,
            Err(err) => {
                warn!(
                    subscription_id = %id,
                    recurrence_id = %recurrence.recurrence_id,
                    error = %err,
                    "Could not list recurrence payments"
                );
                return Ok(0);
            }
        };

        let mut recovered = 0;
        for event in collected {
            let BillingEventKind::PaymentConfirmed(payment) = &event.kind else {
                continue;
            };
            if recovery
                .ledger
                .find_by_gateway_payment_id(recurrence.gateway, &payment.payment_id)
                .await?
                .is_some()
            {
                continue;
            }

            let stored = WebhookEvent::received(
                &event,
                serde_json::json!({ "source": "reconciliation" }),
                now,
            )
            .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?;
            if recovery.events.insert_if_absent(&stored).await? == SaveResult::Inserted {
                info!(
                    subscription_id = %id,
                    payment_id = %payment.payment_id,
                    "Recovered payment missing from the ledger"
                );
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
