//! Subscription lifecycle events.
//!
//! Emitted by the `Subscription` aggregate for every committed transition and
//! handed to the lifecycle publisher once the new state is persisted.

use crate::domain::foundation::{OwnerId, SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};

use super::Gateway;

/// What happened to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEventKind {
    TrialStarted {
        trial_end: Timestamp,
    },

    /// trialing → active on the first confirmed payment.
    Activated {
        gateway: Gateway,
        period_end: Timestamp,
    },

    /// active → active on a confirmed renewal payment.
    Renewed {
        period_end: Timestamp,
    },

    /// past_due → active on a late payment.
    Recovered {
        period_end: Timestamp,
    },

    /// active → past_due.
    PastDue {
        since: Timestamp,
    },

    /// Cancellation deferred until the end of the paid period.
    CancellationScheduled {
        effective_at: Timestamp,
    },

    Canceled {
        reason: String,
    },

    /// trialing → expired.
    Expired,
}

/// A lifecycle event for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub subscription_id: SubscriptionId,
    pub owner_id: OwnerId,
    pub kind: SubscriptionEventKind,
    pub occurred_at: Timestamp,
}

impl SubscriptionEvent {
    /// Short snake_case name used in logs.
    pub fn name(&self) -> &'static str {
        match self.kind {
            SubscriptionEventKind::TrialStarted { .. } => "trial_started",
            SubscriptionEventKind::Activated { .. } => "activated",
            SubscriptionEventKind::Renewed { .. } => "renewed",
            SubscriptionEventKind::Recovered { .. } => "recovered",
            SubscriptionEventKind::PastDue { .. } => "past_due",
            SubscriptionEventKind::CancellationScheduled { .. } => "cancellation_scheduled",
            SubscriptionEventKind::Canceled { .. } => "canceled",
            SubscriptionEventKind::Expired => "expired",
        }
    }
}
