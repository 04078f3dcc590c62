//! CreateTrialHandler - Command handler for starting a subscription trial.

use std::sync::Arc;

use tracing::info;

use crate::domain::billing::{BillingInterval, Subscription, SubscriptionEvent};
use crate::domain::foundation::{DomainError, ErrorCode, OwnerId, PlanId, Timestamp};
use crate::ports::{SubscriptionEventPublisher, SubscriptionRepository};

use super::super::publish_lifecycle;

/// Longest trial a plan may grant.
pub const MAX_TRIAL_DAYS: u32 = 365;

/// Command to start a trial.
#[derive(Debug, Clone)]
pub struct CreateTrialCommand {
    pub owner_id: OwnerId,
    pub plan_id: PlanId,
    pub interval: BillingInterval,
    pub trial_days: u32,
}

/// Result of a started trial.
#[derive(Debug, Clone)]
pub struct CreateTrialResult {
    pub subscription: Subscription,
    pub event: SubscriptionEvent,
}

/// Handler for starting trials.
///
/// An owner holds at most one live (non-terminal) subscription.
pub struct CreateTrialHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    publisher: Arc<dyn SubscriptionEventPublisher>,
}

impl CreateTrialHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        publisher: Arc<dyn SubscriptionEventPublisher>,
    ) -> Self {
        Self {
            subscriptions,
            publisher,
        }
    }

    pub async fn handle(
        &self,
        cmd: CreateTrialCommand,
        now: Timestamp,
    ) -> Result<CreateTrialResult, DomainError> {
        // 1. Validate trial length
        if cmd.trial_days == 0 || cmd.trial_days > MAX_TRIAL_DAYS {
            return Err(DomainError::validation(
                "trial_days",
                format!("Trial must last between 1 and {} days", MAX_TRIAL_DAYS),
            ));
        }

        // 2. One live subscription per owner
        if let Some(existing) = self.subscriptions.find_live_by_owner(cmd.owner_id).await? {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("Owner already has subscription {}", existing.id),
            )
            .with_detail("owner_id", cmd.owner_id.to_string()));
        }

        // 3. Create and persist the aggregate
        let (subscription, event) = Subscription::start_trial(
            cmd.owner_id,
            cmd.plan_id,
            cmd.interval,
            cmd.trial_days,
            now,
        );
        self.subscriptions.save(&subscription).await?;

        info!(
            subscription_id = %subscription.id,
            owner_id = %subscription.owner_id,
            trial_end = %subscription.current_period_end,
            "Trial started"
        );

        // 4. Notify
        publish_lifecycle(self.publisher.as_ref(), &event).await;

        Ok(CreateTrialResult {
            subscription,
            event,
        })
    }
}
