//! EventProcessor - applies stored webhook events to subscriptions.
//!
//! Every attempt starts with an atomic claim on the stored event, so a single
//! event is never applied by two workers at once. The subscription touched by
//! the event is then updated under its per-subscription lock. Confirmed
//! payments go through the payment ledger first: a settled ledger record for
//! the same gateway payment id turns a duplicate into a no-op, and a record
//! left in `processing` by an interrupted attempt is resumed with the period
//! it already computed.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::application::locks::{SubscriptionGuard, SubscriptionLocks};
use crate::domain::billing::{
    BillingEventKind, ConfirmedPayment, FailureDisposition, Gateway, NormalizedEvent,
    PaymentRecord, PaymentStatus, ProcessingError, Subscription, SubscriptionLookup, WebhookEvent,
};
use crate::domain::foundation::{DomainError, Timestamp, WebhookEventId};
use crate::ports::{
    ClaimPolicy, PaymentLedger, SaveResult, SubscriptionEventPublisher, SubscriptionRepository,
    WebhookEventRepository,
};

use super::super::publish_lifecycle;

/// Default age after which a `processing` claim is considered abandoned.
pub const DEFAULT_PROCESSING_STALE_AFTER_SECS: i64 = 300;

/// Result of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event changed a subscription or the payment ledger.
    Processed,
    /// Nothing to do; the reason is stored on the event.
    Skipped(String),
    /// Transient failure, another attempt is due at the given time.
    RetryScheduled(Timestamp),
    /// Permanent failure, left for manual reconciliation.
    FailedPermanently,
    /// Another worker holds the event, took it over mid-attempt, or it is
    /// already settled.
    NotClaimed,
}

enum Applied {
    Changed,
    Unchanged(String),
}

/// Applies stored webhook events to the subscription state machine and the
/// payment ledger.
pub struct EventProcessor {
    events: Arc<dyn WebhookEventRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    ledger: Arc<dyn PaymentLedger>,
    publisher: Arc<dyn SubscriptionEventPublisher>,
    locks: Arc<SubscriptionLocks>,
    claim_policy: ClaimPolicy,
}

impl EventProcessor {
    pub fn new(
        events: Arc<dyn WebhookEventRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        ledger: Arc<dyn PaymentLedger>,
        publisher: Arc<dyn SubscriptionEventPublisher>,
        locks: Arc<SubscriptionLocks>,
    ) -> Self {
        Self {
            events,
            subscriptions,
            ledger,
            publisher,
            locks,
            claim_policy: ClaimPolicy::immediate(Duration::seconds(
                DEFAULT_PROCESSING_STALE_AFTER_SECS,
            )),
        }
    }

    /// Sets how long another worker's claim is honoured.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.claim_policy = ClaimPolicy::immediate(stale_after);
        self
    }

    /// Claims and applies one stored event.
    ///
    /// Processing failures are recorded on the event, not returned. The
    /// returned error is reserved for failures of the event ledger itself.
    pub async fn process(
        &self,
        id: WebhookEventId,
        now: Timestamp,
    ) -> Result<ProcessOutcome, DomainError> {
        let Some(mut event) = self.events.claim(id, now, self.claim_policy).await? else {
            debug!(webhook_event_id = %id, "Webhook event not claimable");
            return Ok(ProcessOutcome::NotClaimed);
        };
        let claimed_at = event.processing_started_at.unwrap_or(now);

        let outcome = match self.apply(&event, now).await {
            Ok(Applied::Changed) => {
                event.mark_processed(now)?;
                info!(
                    gateway = %event.gateway,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Webhook event processed"
                );
                ProcessOutcome::Processed
            }
            Ok(Applied::Unchanged(reason)) => {
                debug!(event_id = %event.event_id, reason = %reason, "Webhook event skipped");
                event.mark_skipped(reason.clone(), now)?;
                ProcessOutcome::Skipped(reason)
            }
            Err(err) => self.record_failure(&mut event, err, now)?,
        };

        if !self.events.complete(&event, claimed_at).await? {
            warn!(
                gateway = %event.gateway,
                event_id = %event.event_id,
                "Claim taken over by another worker, outcome not recorded"
            );
            return Ok(ProcessOutcome::NotClaimed);
        }
        Ok(outcome)
    }

    fn record_failure(
        &self,
        event: &mut WebhookEvent,
        err: ProcessingError,
        now: Timestamp,
    ) -> Result<ProcessOutcome, DomainError> {
        let disposition = if err.is_transient() {
            event.mark_failed(err.to_string(), now)?
        } else {
            event.mark_permanently_failed(err.to_string())?
        };

        Ok(match disposition {
            FailureDisposition::RetryAt(at) => {
                warn!(
                    gateway = %event.gateway,
                    event_id = %event.event_id,
                    retry_count = event.retry_count,
                    next_retry_at = %at,
                    error = %err,
                    "Webhook processing failed, retry scheduled"
                );
                ProcessOutcome::RetryScheduled(at)
            }
            FailureDisposition::Permanent => {
                error!(
                    gateway = %event.gateway,
                    event_id = %event.event_id,
                    retry_count = event.retry_count,
                    error = %err,
                    "Webhook processing failed permanently"
                );
                ProcessOutcome::FailedPermanently
            }
        })
    }

    async fn apply(&self, event: &WebhookEvent, now: Timestamp) -> Result<Applied, ProcessingError> {
        let normalized = event
            .normalized_event()
            .map_err(|e| ProcessingError::MalformedPayload(e.to_string()))?;

        match &normalized.kind {
            BillingEventKind::PaymentConfirmed(payment) => {
                self.payment_confirmed(&normalized, payment, now).await
            }
            BillingEventKind::PaymentFailed {
                payment_id,
                amount_cents,
                reason,
                ..
            } => {
                self.payment_failed(&normalized, payment_id.as_deref(), *amount_cents, reason, now)
                    .await
            }
            BillingEventKind::PaymentRefunded { payment_id } => {
                self.payment_refunded(normalized.gateway, payment_id, now).await
            }
            BillingEventKind::RecurrenceApproved { recurrence_id, .. } => {
                self.recurrence_approved(&normalized, recurrence_id, now).await
            }
            BillingEventKind::RecurrenceCanceled {
                recurrence_id,
                reason,
                ..
            } => {
                self.recurrence_canceled(&normalized, recurrence_id, reason, now)
                    .await
            }
            BillingEventKind::Unrecognized { provider_type } => Ok(Applied::Unchanged(format!(
                "unhandled event type {}",
                provider_type
            ))),
        }
    }

    async fn payment_confirmed(
        &self,
        event: &NormalizedEvent,
        payment: &ConfirmedPayment,
        now: Timestamp,
    ) -> Result<Applied, ProcessingError> {
        let gateway = event.gateway;
        let lookup = event.lookup();
        let Some((_guard, mut subscription)) = self.lock_subscription(gateway, lookup).await? else {
            return Err(ProcessingError::SubscriptionNotFound(describe(lookup)));
        };

        let paid_at = payment.paid_at.or(event.occurred_at).unwrap_or(now);
        let existing = self
            .ledger
            .find_by_gateway_payment_id(gateway, &payment.payment_id)
            .await?;

        let mut record = match existing {
            Some(record) if record.status.is_settled() => {
                return Ok(already_settled(&record));
            }
            Some(record) => record,
            None => {
                let period =
                    subscription.covered_period(payment.period_start, payment.period_end, paid_at);
                let record = PaymentRecord::processing(
                    subscription.id,
                    gateway,
                    payment.payment_id.clone(),
                    payment.amount_cents,
                    period,
                    now,
                );
                match self.ledger.insert_if_absent(&record).await? {
                    SaveResult::Inserted => record,
                    SaveResult::AlreadyExists => {
                        match self
                            .ledger
                            .find_by_gateway_payment_id(gateway, &payment.payment_id)
                            .await?
                        {
                            Some(winner) if winner.status.is_settled() => {
                                return Ok(already_settled(&winner));
                            }
                            Some(winner) => winner,
                            None => {
                                return Err(ProcessingError::Storage(format!(
                                    "payment {} reported as existing but not found",
                                    payment.payment_id
                                )))
                            }
                        }
                    }
                }
            }
        };

        let lifecycle = subscription.confirm_payment(
            gateway,
            payment.recurrence_id.as_deref(),
            record.covered_period(),
            now,
        )?;
        self.subscriptions.update(&subscription).await?;

        record.succeed(paid_at, now)?;
        self.ledger.update(&record).await?;

        info!(
            subscription_id = %subscription.id,
            payment_id = %payment.payment_id,
            amount_cents = payment.amount_cents,
            period_end = %subscription.current_period_end,
            "Payment confirmed"
        );
        publish_lifecycle(self.publisher.as_ref(), &lifecycle).await;
        Ok(Applied::Changed)
    }

    async fn payment_failed(
        &self,
        event: &NormalizedEvent,
        payment_id: Option<&str>,
        amount_cents: Option<i64>,
        reason: &Option<String>,
        now: Timestamp,
    ) -> Result<Applied, ProcessingError> {
        let gateway = event.gateway;
        let lookup = event.lookup();
        let Some((_guard, mut subscription)) = self.lock_subscription(gateway, lookup).await? else {
            return Err(ProcessingError::SubscriptionNotFound(describe(lookup)));
        };

        // A failure notice delivered after the same payment was confirmed is stale.
        if let Some(id) = payment_id {
            if let Some(record) = self.ledger.find_by_gateway_payment_id(gateway, id).await? {
                return Ok(already_settled(&record));
            }
        }

        let period = subscription.covered_period(None, None, now);
        let lifecycle = subscription.record_payment_failure(now)?;

        let attempt = PaymentRecord::failed(
            subscription.id,
            gateway,
            None,
            amount_cents.unwrap_or(0),
            period,
            reason.clone(),
            now,
        );
        self.ledger.insert_if_absent(&attempt).await?;

        warn!(
            subscription_id = %subscription.id,
            payment_id = payment_id.unwrap_or("-"),
            reason = reason.as_deref().unwrap_or("-"),
            "Payment failed"
        );

        if let Some(lifecycle) = lifecycle {
            self.subscriptions.update(&subscription).await?;
            publish_lifecycle(self.publisher.as_ref(), &lifecycle).await;
        }
        Ok(Applied::Changed)
    }

    async fn payment_refunded(
        &self,
        gateway: Gateway,
        payment_id: &str,
        now: Timestamp,
    ) -> Result<Applied, ProcessingError> {
        let Some(found) = self.ledger.find_by_gateway_payment_id(gateway, payment_id).await? else {
            return Err(ProcessingError::PaymentNotFound(payment_id.to_string()));
        };

        let _guard = self.locks.acquire(found.subscription_id).await;
        let mut record = self
            .ledger
            .find_by_gateway_payment_id(gateway, payment_id)
            .await?
            .unwrap_or(found);

        if record.status == PaymentStatus::Refunded {
            return Ok(Applied::Unchanged(format!(
                "payment {} already refunded",
                payment_id
            )));
        }

        record.refund(now)?;
        self.ledger.update(&record).await?;
        info!(
            subscription_id = %record.subscription_id,
            payment_id = %payment_id,
            "Payment refunded"
        );
        Ok(Applied::Changed)
    }

    async fn recurrence_approved(
        &self,
        event: &NormalizedEvent,
        recurrence_id: &str,
        now: Timestamp,
    ) -> Result<Applied, ProcessingError> {
        let lookup = event.lookup();
        let Some((_guard, mut subscription)) = self.lock_subscription(event.gateway, lookup).await?
        else {
            // Our own subscription id must resolve eventually
            if lookup.subscription_id().is_some() {
                return Err(ProcessingError::SubscriptionNotFound(describe(lookup)));
            }
            return Ok(Applied::Unchanged(format!(
                "no subscription for recurrence {}",
                recurrence_id
            )));
        };

        if subscription.is_terminal() {
            return Ok(Applied::Unchanged(format!(
                "subscription {} is {}",
                subscription.id, subscription.status
            )));
        }

        if !subscription.attach_recurrence(event.gateway, recurrence_id, now)? {
            return Ok(Applied::Unchanged(format!(
                "recurrence {} already attached",
                recurrence_id
            )));
        }

        self.subscriptions.update(&subscription).await?;
        info!(
            subscription_id = %subscription.id,
            recurrence_id = %recurrence_id,
            "Recurrence approved"
        );
        Ok(Applied::Changed)
    }

    async fn recurrence_canceled(
        &self,
        event: &NormalizedEvent,
        recurrence_id: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<Applied, ProcessingError> {
        let Some((_guard, mut subscription)) =
            self.lock_subscription(event.gateway, event.lookup()).await?
        else {
            return Ok(Applied::Unchanged(format!(
                "no subscription for recurrence {}",
                recurrence_id
            )));
        };

        let Some(lifecycle) = subscription.recurrence_ended(recurrence_id, reason, now)? else {
            return Ok(Applied::Unchanged(format!(
                "recurrence {} is not attached to subscription {}",
                recurrence_id, subscription.id
            )));
        };

        self.subscriptions.update(&subscription).await?;
        info!(
            subscription_id = %subscription.id,
            recurrence_id = %recurrence_id,
            reason = %reason,
            "Recurrence ended by gateway"
        );
        publish_lifecycle(self.publisher.as_ref(), &lifecycle).await;
        Ok(Applied::Changed)
    }

    /// Finds the subscription an event is about: by recurrence id first, then
    /// by the customer reference we sent when creating the charge.
    async fn resolve(
        &self,
        gateway: Gateway,
        lookup: SubscriptionLookup<'_>,
    ) -> Result<Option<Subscription>, ProcessingError> {
        if let Some(recurrence_id) = lookup.recurrence_id {
            if let Some(found) = self
                .subscriptions
                .find_by_recurrence_id(gateway, recurrence_id)
                .await?
            {
                return Ok(Some(found));
            }
        }
        match lookup.subscription_id() {
            Some(id) => Ok(self.subscriptions.find_by_id(id).await?),
            None => Ok(None),
        }
    }

    /// Resolves, locks, then re-reads the subscription so the caller works on
    /// the state committed by whoever held the lock before.
    async fn lock_subscription(
        &self,
        gateway: Gateway,
        lookup: SubscriptionLookup<'_>,
    ) -> Result<Option<(SubscriptionGuard, Subscription)>, ProcessingError> {
        let Some(found) = self.resolve(gateway, lookup).await? else {
            return Ok(None);
        };
        let guard = self.locks.acquire(found.id).await;
        let current = self
            .subscriptions
            .find_by_id(found.id)
            .await?
            .ok_or_else(|| ProcessingError::SubscriptionNotFound(found.id.to_string()))?;
        Ok(Some((guard, current)))
    }
}

fn already_settled(record: &PaymentRecord) -> Applied {
    Applied::Unchanged(format!(
        "payment {} already {}",
        record.gateway_payment_id.as_deref().unwrap_or("-"),
        record.status
    ))
}

fn describe(lookup: SubscriptionLookup<'_>) -> String {
    match (lookup.recurrence_id, lookup.customer_reference) {
        (Some(rec), Some(reference)) => format!("recurrence {} / reference {}", rec, reference),
        (Some(rec), None) => format!("recurrence {}", rec),
        (None, Some(reference)) => format!("reference {}", reference),
        (None, None) => "event without subscription references".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryPaymentLedger, InMemorySubscriptionRepository, InMemoryWebhookEventRepository,
        RecordingEventPublisher,
    };
    use crate::domain::billing::{
        BillingInterval, CoveredPeriod, SubscriptionStatus, WebhookStatus,
    };
    use crate::domain::foundation::{OwnerId, PlanId};

    fn day(n: i64) -> Timestamp {
        Timestamp::parse_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .add_days(n)
    }

    struct Fixture {
        events: Arc<InMemoryWebhookEventRepository>,
        subscriptions: Arc<InMemorySubscriptionRepository>,
        ledger: Arc<InMemoryPaymentLedger>,
        publisher: Arc<RecordingEventPublisher>,
        processor: EventProcessor,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Arc::new(InMemoryWebhookEventRepository::new());
            let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
            let ledger = Arc::new(InMemoryPaymentLedger::new());
            let publisher = Arc::new(RecordingEventPublisher::new());
            let processor = EventProcessor::new(
                events.clone(),
                subscriptions.clone(),
                ledger.clone(),
                publisher.clone(),
                Arc::new(SubscriptionLocks::new()),
            );
            Self {
                events,
                subscriptions,
                ledger,
                publisher,
                processor,
            }
        }

        async fn trialing(&self) -> Subscription {
            let (subscription, _) = Subscription::start_trial(
                OwnerId::new(),
                PlanId::new(),
                BillingInterval::Monthly,
                14,
                day(-14),
            );
            self.subscriptions.save(&subscription).await.unwrap();
            subscription
        }

        async fn active_until(&self, end: Timestamp) -> Subscription {
            let mut subscription = self.trialing().await;
            subscription
                .confirm_payment(
                    Gateway::Pix,
                    Some("rec-1"),
                    CoveredPeriod {
                        start: end.add_days(-30),
                        end,
                    },
                    day(-30),
                )
                .unwrap();
            self.subscriptions.update(&subscription).await.unwrap();
            subscription
        }

        async fn store(&self, event_id: &str, kind: BillingEventKind) -> WebhookEventId {
            let normalized = NormalizedEvent {
                gateway: Gateway::Pix,
                event_id: event_id.to_string(),
                kind,
                occurred_at: None,
            };
            let stored =
                WebhookEvent::received(&normalized, serde_json::json!({}), day(0)).unwrap();
            self.events.insert_if_absent(&stored).await.unwrap();
            stored.id
        }

        async fn stored(&self, id: WebhookEventId) -> WebhookEvent {
            self.events.find_by_id(id).await.unwrap().unwrap()
        }

        async fn subscription(&self, id: crate::domain::foundation::SubscriptionId) -> Subscription {
            self.subscriptions.find_by_id(id).await.unwrap().unwrap()
        }
    }

    fn confirmed(payment_id: &str, reference: Option<String>, end: Option<Timestamp>) -> BillingEventKind {
        BillingEventKind::PaymentConfirmed(ConfirmedPayment {
            payment_id: payment_id.to_string(),
            recurrence_id: Some("rec-1".to_string()),
            customer_reference: reference,
            amount_cents: 9900,
            paid_at: Some(day(0)),
            period_start: end.map(|e| e.add_days(-30)),
            period_end: end,
        })
    }

    // ══════════════════════════════════════════════════════════════
    // Confirmed payments
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn first_payment_activates_trial_found_by_reference() {
        let fx = Fixture::new();
        let sub = fx.trialing().await;
        let id = fx
            .store("E1", confirmed("E1", Some(sub.id.to_string()), None))
            .await;

        let outcome = fx.processor.process(id, day(0)).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Processed);
        let sub = fx.subscription(sub.id).await;
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.gateway, Gateway::Pix);
        assert_eq!(sub.gateway_recurrence_id.as_deref(), Some("rec-1"));
        assert_eq!(sub.current_period_end, day(0).add_months(1));

        let records = fx.ledger.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Succeeded);
        assert_eq!(records[0].paid_at, Some(day(0)));

        assert_eq!(fx.stored(id).await.status, WebhookStatus::Processed);
        assert_eq!(fx.publisher.names().await, vec!["activated"]);
    }

    #[tokio::test]
    async fn same_payment_under_new_event_id_is_skipped() {
        let fx = Fixture::new();
        let sub = fx.active_until(day(0)).await;

        let first = fx.store("E1", confirmed("pay-1", None, Some(day(30)))).await;
        let second = fx.store("E1-again", confirmed("pay-1", None, Some(day(30)))).await;

        assert_eq!(fx.processor.process(first, day(0)).await.unwrap(), ProcessOutcome::Processed);
        let outcome = fx.processor.process(second, day(0)).await.unwrap();

        assert!(matches!(outcome, ProcessOutcome::Skipped(_)));
        assert_eq!(fx.subscription(sub.id).await.current_period_end, day(30));
        assert_eq!(fx.ledger.all().await.len(), 1);
        assert_eq!(fx.stored(second).await.status, WebhookStatus::Skipped);
    }

    #[tokio::test]
    async fn interrupted_payment_resumes_with_recorded_period() {
        let fx = Fixture::new();
        let sub = fx.active_until(day(0)).await;
        let period = CoveredPeriod {
            start: day(0),
            end: day(31),
        };
        let leftover =
            PaymentRecord::processing(sub.id, Gateway::Pix, "pay-1", 9900, period, day(0));
        fx.ledger.insert_if_absent(&leftover).await.unwrap();

        let id = fx.store("E1", confirmed("pay-1", None, None)).await;
        fx.processor.process(id, day(1)).await.unwrap();

        let records = fx.ledger.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, leftover.id);
        assert_eq!(records[0].status, PaymentStatus::Succeeded);
        assert_eq!(fx.subscription(sub.id).await.current_period_end, day(31));
    }

    #[tokio::test]
    async fn payment_without_subscription_is_retried_after_one_minute() {
        let fx = Fixture::new();
        let id = fx.store("E1", confirmed("pay-1", None, None)).await;

        let outcome = fx.processor.process(id, day(0)).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::RetryScheduled(day(0).plus_minutes(1)));
        let stored = fx.stored(id).await;
        assert_eq!(stored.status, WebhookStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert!(fx.ledger.all().await.is_empty());
    }

    #[tokio::test]
    async fn payment_for_canceled_subscription_fails_permanently() {
        let fx = Fixture::new();
        let mut sub = fx.trialing().await;
        sub.cancel("requested", day(-1)).unwrap();
        fx.subscriptions.update(&sub).await.unwrap();

        let id = fx
            .store("E1", confirmed("pay-1", Some(sub.id.to_string()), None))
            .await;
        let outcome = fx.processor.process(id, day(0)).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::FailedPermanently);
        let stored = fx.stored(id).await;
        assert!(stored.is_permanently_failed());
        assert_eq!(fx.subscription(sub.id).await.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn undecodable_payload_fails_permanently() {
        let fx = Fixture::new();
        let normalized = NormalizedEvent {
            gateway: Gateway::Pix,
            event_id: "E1".to_string(),
            kind: confirmed("pay-1", None, None),
            occurred_at: None,
        };
        let mut stored = WebhookEvent::received(&normalized, serde_json::json!({}), day(0)).unwrap();
        stored.payload = serde_json::json!({"garbage": true});
        fx.events.insert_if_absent(&stored).await.unwrap();

        let outcome = fx.processor.process(stored.id, day(0)).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::FailedPermanently);
    }

    #[tokio::test]
    async fn stale_worker_does_not_overwrite_the_newer_claim() {
        let fx = Fixture::new();
        let id = fx
            .store(
                "E1",
                BillingEventKind::Unrecognized {
                    provider_type: "customer.updated".to_string(),
                },
            )
            .await;
        let policy = ClaimPolicy::immediate(Duration::minutes(5));

        // A worker claims at day 0 and stalls past the stale window
        let stalled = fx.events.claim(id, day(0), policy).await.unwrap().unwrap();
        let taken_over = day(0).plus_minutes(6);
        assert_eq!(
            fx.processor.process(id, taken_over).await.unwrap(),
            ProcessOutcome::Skipped("unhandled event type customer.updated".to_string())
        );

        let mut late = stalled.clone();
        late.mark_failed("gateway timeout", taken_over.plus_minutes(1)).unwrap();
        let written = fx
            .events
            .complete(&late, stalled.processing_started_at.unwrap())
            .await
            .unwrap();

        assert!(!written);
        let kept = fx.stored(id).await;
        assert_eq!(kept.status, WebhookStatus::Skipped);
        assert_eq!(kept.retry_count, 0);
    }

    // ══════════════════════════════════════════════════════════════
    // Other event kinds
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unrecognized_event_is_skipped() {
        let fx = Fixture::new();
        let id = fx
            .store(
                "E1",
                BillingEventKind::Unrecognized {
                    provider_type: "customer.updated".to_string(),
                },
            )
            .await;

        let outcome = fx.processor.process(id, day(0)).await.unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Skipped("unhandled event type customer.updated".to_string())
        );
    }

    #[tokio::test]
    async fn failed_payment_moves_active_to_past_due() {
        let fx = Fixture::new();
        let sub = fx.active_until(day(5)).await;
        let id = fx
            .store(
                "evt_1",
                BillingEventKind::PaymentFailed {
                    payment_id: Some("in_1".to_string()),
                    recurrence_id: Some("rec-1".to_string()),
                    customer_reference: None,
                    amount_cents: Some(9900),
                    reason: Some("card_declined".to_string()),
                },
            )
            .await;

        assert_eq!(fx.processor.process(id, day(1)).await.unwrap(), ProcessOutcome::Processed);

        let sub = fx.subscription(sub.id).await;
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.past_due_since, Some(day(1)));
        let records = fx.ledger.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Failed);
        assert_eq!(records[0].failure_reason.as_deref(), Some("card_declined"));
        assert_eq!(fx.publisher.names().await, vec!["past_due"]);
    }

    #[tokio::test]
    async fn refund_marks_ledger_record_refunded() {
        let fx = Fixture::new();
        fx.active_until(day(0)).await;
        let paid = fx.store("E1", confirmed("pay-1", None, Some(day(30)))).await;
        fx.processor.process(paid, day(0)).await.unwrap();

        let refund = fx
            .store(
                "devolucao:D1",
                BillingEventKind::PaymentRefunded {
                    payment_id: "pay-1".to_string(),
                },
            )
            .await;

        assert_eq!(fx.processor.process(refund, day(2)).await.unwrap(), ProcessOutcome::Processed);
        assert_eq!(fx.ledger.all().await[0].status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_ahead_of_its_payment_is_retried_until_the_payment_lands() {
        let fx = Fixture::new();
        fx.active_until(day(0)).await;
        let refund = fx
            .store(
                "devolucao:D1",
                BillingEventKind::PaymentRefunded {
                    payment_id: "E2E1".to_string(),
                },
            )
            .await;
        let paid = fx.store("E2E1", confirmed("E2E1", None, Some(day(30)))).await;

        let early = fx.processor.process(refund, day(0)).await.unwrap();
        assert_eq!(early, ProcessOutcome::RetryScheduled(day(0).plus_minutes(1)));
        assert_eq!(fx.stored(refund).await.status, WebhookStatus::Failed);

        assert_eq!(fx.processor.process(paid, day(0)).await.unwrap(), ProcessOutcome::Processed);
        let retried = fx.processor.process(refund, day(0).plus_minutes(1)).await.unwrap();

        assert_eq!(retried, ProcessOutcome::Processed);
        assert_eq!(fx.stored(refund).await.status, WebhookStatus::Processed);
        assert_eq!(fx.ledger.all().await[0].status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn payment_failure_ahead_of_its_subscription_is_retried() {
        let fx = Fixture::new();
        let failed = BillingEventKind::PaymentFailed {
            payment_id: Some("in_1".to_string()),
            recurrence_id: Some("rec-1".to_string()),
            customer_reference: None,
            amount_cents: Some(9900),
            reason: Some("insufficient_funds".to_string()),
        };
        let id = fx.store("evt_f", failed).await;

        let early = fx.processor.process(id, day(1)).await.unwrap();
        assert_eq!(early, ProcessOutcome::RetryScheduled(day(1).plus_minutes(1)));

        let sub = fx.active_until(day(5)).await;
        let retried = fx.processor.process(id, day(1).plus_minutes(1)).await.unwrap();

        assert_eq!(retried, ProcessOutcome::Processed);
        assert_eq!(fx.subscription(sub.id).await.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn approval_for_a_reference_not_yet_stored_is_retried() {
        let fx = Fixture::new();
        let (pending, _) = Subscription::start_trial(
            OwnerId::new(),
            PlanId::new(),
            BillingInterval::Monthly,
            14,
            day(0),
        );
        let id = fx
            .store(
                "rec:RR-2:APROVADA",
                BillingEventKind::RecurrenceApproved {
                    recurrence_id: "RR-2".to_string(),
                    customer_reference: Some(pending.id.to_string()),
                },
            )
            .await;

        let early = fx.processor.process(id, day(0)).await.unwrap();
        assert_eq!(early, ProcessOutcome::RetryScheduled(day(0).plus_minutes(1)));

        fx.subscriptions.save(&pending).await.unwrap();
        let retried = fx.processor.process(id, day(0).plus_minutes(1)).await.unwrap();

        assert_eq!(retried, ProcessOutcome::Processed);
        assert_eq!(
            fx.subscription(pending.id).await.gateway_recurrence_id.as_deref(),
            Some("RR-2")
        );
    }

    #[tokio::test]
    async fn gateway_side_cancel_clears_recurrence() {
        let fx = Fixture::new();
        let sub = fx.active_until(day(10)).await;
        let id = fx
            .store(
                "rec:rec-1:CANCELADA",
                BillingEventKind::RecurrenceCanceled {
                    recurrence_id: "rec-1".to_string(),
                    customer_reference: None,
                    reason: "cancelada pelo pagador".to_string(),
                },
            )
            .await;

        fx.processor.process(id, day(1)).await.unwrap();

        let sub = fx.subscription(sub.id).await;
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.gateway_recurrence_id.is_none());
        assert_eq!(sub.cancel_reason.as_deref(), Some("cancelada pelo pagador"));
    }

    #[tokio::test]
    async fn cancel_for_unknown_recurrence_is_skipped() {
        let fx = Fixture::new();
        let id = fx
            .store(
                "rec:rec-9:EXPIRADA",
                BillingEventKind::RecurrenceCanceled {
                    recurrence_id: "rec-9".to_string(),
                    customer_reference: None,
                    reason: "expirada".to_string(),
                },
            )
            .await;

        let outcome = fx.processor.process(id, day(0)).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn approval_attaches_recurrence_once() {
        let fx = Fixture::new();
        let sub = fx.trialing().await;
        let approved = BillingEventKind::RecurrenceApproved {
            recurrence_id: "sub_123".to_string(),
            customer_reference: Some(sub.id.to_string()),
        };
        let first = fx.store("evt_a", approved.clone()).await;
        let second = fx.store("evt_b", approved).await;

        assert_eq!(fx.processor.process(first, day(0)).await.unwrap(), ProcessOutcome::Processed);
        assert!(matches!(
            fx.processor.process(second, day(0)).await.unwrap(),
            ProcessOutcome::Skipped(_)
        ));
        assert_eq!(
            fx.subscription(sub.id).await.gateway_recurrence_id.as_deref(),
            Some("sub_123")
        );
    }

    #[tokio::test]
    async fn settled_event_is_not_claimed_again() {
        let fx = Fixture::new();
        let id = fx
            .store(
                "E1",
                BillingEventKind::Unrecognized {
                    provider_type: "x".to_string(),
                },
            )
            .await;
        fx.processor.process(id, day(0)).await.unwrap();

        assert_eq!(fx.processor.process(id, day(0)).await.unwrap(), ProcessOutcome::NotClaimed);
    }
}
