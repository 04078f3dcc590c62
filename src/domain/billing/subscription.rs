//! Subscription aggregate.
//!
//! The Subscription is the aggregate root every lifecycle rule operates on.
//! Webhook-driven changes (`confirm_payment`, `record_payment_failure`,
//! `recurrence_ended`) and sweep-driven changes (`reconciliation_action`
//! followed by `mark_past_due`, `expire` or `cancel`) all route through the
//! `SubscriptionStatus` state machine.
//!
//! # Design Decisions
//!
//! - **Money in cents**: amounts live on `PaymentRecord`, never as floats
//! - **Period advances only on confirmed payments**: nothing here moves
//!   `current_period_end` speculatively
//! - **Idempotent period math**: a renewal sets the period end to the later of
//!   the current end and the payment's covered end, so replaying the same
//!   covered period cannot double-advance it
//! - **Explicit `now`**: every mutation takes the clock reading from the caller

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    DomainError, ErrorCode, OwnerId, PlanId, StateMachine, SubscriptionId, Timestamp,
};

use super::{BillingInterval, Gateway, SubscriptionEvent, SubscriptionEventKind, SubscriptionStatus};

/// Days of grace after a subscription becomes past due.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 7;

/// The billing period a payment pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveredPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// A live gateway recurrence attached to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRef {
    pub gateway: Gateway,
    pub recurrence_id: String,
}

/// Time-driven transition the reconciliation sweep should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationAction {
    /// Trial ended with no payment.
    ExpireTrial,
    /// A deferred cancel reached the end of the paid period.
    CancelAtPeriodEnd,
    /// The period ended without a renewal.
    MarkPastDue,
    /// Past due for longer than the grace period.
    CancelAfterGrace,
}

impl ReconciliationAction {
    /// True if applying the action ends the gateway recurrence.
    pub fn cancels_recurrence(&self) -> bool {
        !matches!(self, ReconciliationAction::MarkPastDue)
    }

    pub fn cancel_reason(&self) -> &'static str {
        match self {
            ReconciliationAction::CancelAtPeriodEnd => "canceled at period end",
            ReconciliationAction::CancelAfterGrace => "grace period elapsed without payment",
            ReconciliationAction::ExpireTrial | ReconciliationAction::MarkPastDue => "",
        }
    }
}

/// Subscription aggregate.
///
/// # Invariants
///
/// - At most one gateway recurrence reference, and none once terminal
/// - `status` changes only through `SubscriptionStatus` transitions
/// - `current_period_end` moves only on a confirmed payment and never backward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner_id: OwnerId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub gateway: Gateway,
    pub gateway_recurrence_id: Option<String>,
    pub billing_interval: BillingInterval,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub trial_end_date: Option<Timestamp>,

    /// When the subscription entered past_due. Cleared on recovery.
    pub past_due_since: Option<Timestamp>,

    /// Cancel requested for the end of the current period.
    pub cancel_at_period_end: bool,

    pub canceled_at: Option<Timestamp>,
    pub cancel_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a trialing subscription whose first period is the trial itself.
    pub fn start_trial(
        owner_id: OwnerId,
        plan_id: PlanId,
        billing_interval: BillingInterval,
        trial_days: u32,
        now: Timestamp,
    ) -> (Self, SubscriptionEvent) {
        let trial_end = now.add_days(i64::from(trial_days));
        let subscription = Self {
            id: SubscriptionId::new(),
            owner_id,
            plan_id,
            status: SubscriptionStatus::Trialing,
            gateway: Gateway::None,
            gateway_recurrence_id: None,
            billing_interval,
            current_period_start: now,
            current_period_end: trial_end,
            trial_end_date: Some(trial_end),
            past_due_since: None,
            cancel_at_period_end: false,
            canceled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = subscription.event(SubscriptionEventKind::TrialStarted { trial_end }, now);
        (subscription, event)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The recurrence currently billing this subscription, if any.
    pub fn recurrence(&self) -> Option<RecurrenceRef> {
        self.gateway_recurrence_id.as_ref().map(|id| RecurrenceRef {
            gateway: self.gateway,
            recurrence_id: id.clone(),
        })
    }

    /// Binds a freshly created or approved gateway recurrence.
    ///
    /// Returns `false` when the same recurrence is already attached.
    ///
    /// # Errors
    ///
    /// - `SubscriptionTerminal` if the subscription is canceled or expired
    /// - `RecurrenceAlreadyActive` if a different recurrence is attached
    pub fn attach_recurrence(
        &mut self,
        gateway: Gateway,
        recurrence_id: &str,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        if self.is_terminal() {
            return Err(DomainError::new(
                ErrorCode::SubscriptionTerminal,
                format!("Subscription is {}", self.status),
            )
            .with_detail("subscription_id", self.id.to_string()));
        }
        match self.recurrence() {
            Some(current) if current.gateway == gateway && current.recurrence_id == recurrence_id => {
                Ok(false)
            }
            Some(current) => Err(DomainError::new(
                ErrorCode::RecurrenceAlreadyActive,
                format!(
                    "Recurrence {} on {} is already attached",
                    current.recurrence_id, current.gateway
                ),
            )
            .with_detail("subscription_id", self.id.to_string())),
            None => {
                self.gateway = gateway;
                self.gateway_recurrence_id = Some(recurrence_id.to_string());
                self.updated_at = now;
                Ok(true)
            }
        }
    }

    /// Works out which period a payment covers.
    ///
    /// Explicit bounds from the gateway win. Otherwise a first payment covers
    /// one interval from when it was paid and a renewal covers one interval
    /// from the current period end.
    pub fn covered_period(
        &self,
        period_start: Option<Timestamp>,
        period_end: Option<Timestamp>,
        paid_at: Timestamp,
    ) -> CoveredPeriod {
        let anchor = match self.status {
            SubscriptionStatus::Trialing => paid_at,
            _ => self.current_period_end,
        };
        let start = period_start.unwrap_or(anchor);
        let end = match period_end {
            Some(end) if end.is_after(&start) => end,
            _ => self.billing_interval.advance(start),
        };
        CoveredPeriod { start, end }
    }

    /// Applies a confirmed payment.
    ///
    /// trialing → active binds the gateway and recurrence; active → active
    /// renews; past_due → active recovers.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` for canceled or expired subscriptions.
    pub fn confirm_payment(
        &mut self,
        gateway: Gateway,
        recurrence_id: Option<&str>,
        period: CoveredPeriod,
        now: Timestamp,
    ) -> Result<SubscriptionEvent, DomainError> {
        let previous = self.status;
        self.transition_to(SubscriptionStatus::Active)?;

        if self.gateway_recurrence_id.is_none() {
            if let Some(id) = recurrence_id {
                self.gateway_recurrence_id = Some(id.to_string());
            }
        }
        if !self.gateway.is_billable() {
            self.gateway = gateway;
        }

        let kind = match previous {
            SubscriptionStatus::Trialing => {
                self.current_period_start = period.start;
                self.current_period_end = period.end;
                SubscriptionEventKind::Activated {
                    gateway: self.gateway,
                    period_end: self.current_period_end,
                }
            }
            _ => {
                if period.end.is_after(&self.current_period_end) {
                    self.current_period_start = period.start;
                    self.current_period_end = period.end;
                }
                self.past_due_since = None;
                if previous == SubscriptionStatus::PastDue {
                    SubscriptionEventKind::Recovered {
                        period_end: self.current_period_end,
                    }
                } else {
                    SubscriptionEventKind::Renewed {
                        period_end: self.current_period_end,
                    }
                }
            }
        };

        self.updated_at = now;
        Ok(self.event(kind, now))
    }

    /// Applies a payment-failed notification.
    ///
    /// Returns `None` when nothing changes: a failed attempt during a trial
    /// leaves the trial running and a past-due subscription stays past due.
    pub fn record_payment_failure(
        &mut self,
        now: Timestamp,
    ) -> Result<Option<SubscriptionEvent>, DomainError> {
        match self.status {
            SubscriptionStatus::Active => self.mark_past_due(now).map(Some),
            SubscriptionStatus::Trialing | SubscriptionStatus::PastDue => Ok(None),
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired => {
                Err(self.invalid_transition(SubscriptionStatus::PastDue))
            }
        }
    }

    /// active → past_due.
    pub fn mark_past_due(&mut self, now: Timestamp) -> Result<SubscriptionEvent, DomainError> {
        if self.status != SubscriptionStatus::Active {
            return Err(self.invalid_transition(SubscriptionStatus::PastDue));
        }
        self.transition_to(SubscriptionStatus::PastDue)?;
        self.past_due_since = Some(now);
        self.updated_at = now;
        Ok(self.event(SubscriptionEventKind::PastDue { since: now }, now))
    }

    /// trialing → expired.
    ///
    /// Clears the recurrence reference like `cancel`, so an attached gateway
    /// recurrence must be ended first.
    pub fn expire(&mut self, now: Timestamp) -> Result<SubscriptionEvent, DomainError> {
        self.transition_to(SubscriptionStatus::Expired)?;
        self.gateway_recurrence_id = None;
        self.cancel_at_period_end = false;
        self.updated_at = now;
        Ok(self.event(SubscriptionEventKind::Expired, now))
    }

    /// Cancels immediately and clears the recurrence reference.
    ///
    /// Callers cancel the gateway recurrence (see `recurrence`) before calling
    /// this, because the reference is gone afterwards.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<SubscriptionEvent, DomainError> {
        self.transition_to(SubscriptionStatus::Canceled)?;
        let reason = reason.into();
        self.gateway_recurrence_id = None;
        self.cancel_at_period_end = false;
        self.past_due_since = None;
        self.canceled_at = Some(now);
        self.cancel_reason = Some(reason.clone());
        self.updated_at = now;
        Ok(self.event(SubscriptionEventKind::Canceled { reason }, now))
    }

    /// Defers cancellation until `current_period_end`. Status is unchanged.
    pub fn schedule_cancel(
        &mut self,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<SubscriptionEvent, DomainError> {
        if self.is_terminal() {
            return Err(self.invalid_transition(SubscriptionStatus::Canceled));
        }
        self.cancel_at_period_end = true;
        self.cancel_reason = Some(reason.into());
        self.updated_at = now;
        Ok(self.event(
            SubscriptionEventKind::CancellationScheduled {
                effective_at: self.current_period_end,
            },
            now,
        ))
    }

    /// Handles the gateway reporting that the payer's authorization ended.
    ///
    /// Returns `None` if the recurrence is not the one attached here.
    pub fn recurrence_ended(
        &mut self,
        recurrence_id: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<Option<SubscriptionEvent>, DomainError> {
        if self.gateway_recurrence_id.as_deref() != Some(recurrence_id) {
            return Ok(None);
        }
        self.cancel(reason, now).map(Some)
    }

    /// Decides which time-driven transition, if any, is due at `now`.
    pub fn reconciliation_action(
        &self,
        now: Timestamp,
        grace_period: Duration,
    ) -> Option<ReconciliationAction> {
        if self.is_terminal() {
            return None;
        }
        if self.cancel_at_period_end && !now.is_before(&self.current_period_end) {
            return Some(ReconciliationAction::CancelAtPeriodEnd);
        }
        match self.status {
            SubscriptionStatus::Trialing => self
                .trial_end_date
                .filter(|trial_end| now.is_after(trial_end))
                .map(|_| ReconciliationAction::ExpireTrial),
            SubscriptionStatus::Active if now.is_after(&self.current_period_end) => {
                Some(ReconciliationAction::MarkPastDue)
            }
            SubscriptionStatus::PastDue => {
                let since = self.past_due_since.unwrap_or(self.current_period_end);
                (now.duration_since(&since) > grace_period)
                    .then_some(ReconciliationAction::CancelAfterGrace)
            }
            _ => None,
        }
    }

    /// Applies a reconciliation action decided by `reconciliation_action`.
    pub fn apply_reconciliation(
        &mut self,
        action: ReconciliationAction,
        now: Timestamp,
    ) -> Result<SubscriptionEvent, DomainError> {
        match action {
            ReconciliationAction::ExpireTrial => self.expire(now),
            ReconciliationAction::MarkPastDue => self.mark_past_due(now),
            ReconciliationAction::CancelAtPeriodEnd => {
                let reason = self
                    .cancel_reason
                    .clone()
                    .unwrap_or_else(|| action.cancel_reason().to_string());
                self.cancel(reason, now)
            }
            ReconciliationAction::CancelAfterGrace => self.cancel(action.cancel_reason(), now),
        }
    }

    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), DomainError> {
        self.status = self
            .status
            .transition_to(target)
            .map_err(|_| self.invalid_transition(target))?;
        Ok(())
    }

    fn invalid_transition(&self, target: SubscriptionStatus) -> DomainError {
        DomainError::new(
            ErrorCode::InvalidStateTransition,
            format!(
                "Cannot transition subscription from {} to {}",
                self.status, target
            ),
        )
        .with_detail("subscription_id", self.id.to_string())
    }

    fn event(&self, kind: SubscriptionEventKind, now: Timestamp) -> SubscriptionEvent {
        SubscriptionEvent {
            subscription_id: self.id,
            owner_id: self.owner_id,
            kind,
            occurred_at: now,
        }
    }
}
