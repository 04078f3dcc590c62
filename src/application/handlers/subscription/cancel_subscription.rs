//! CancelSubscriptionHandler - Command handler for explicit cancellation.

use std::sync::Arc;

use tracing::info;

use crate::application::locks::SubscriptionLocks;
use crate::application::GatewayRegistry;
use crate::domain::billing::{Subscription, SubscriptionEvent};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::ports::{SubscriptionEventPublisher, SubscriptionRepository};

use super::super::publish_lifecycle;

/// Command to cancel a subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub subscription_id: SubscriptionId,
    /// Keep access until the paid period ends instead of cancelling now.
    pub at_period_end: bool,
    pub reason: String,
}

/// Result of a cancellation request.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub subscription: Subscription,
    pub event: SubscriptionEvent,
    /// When access ends.
    pub effective_at: Timestamp,
}

/// Handler for cancelling subscriptions.
///
/// A deferred cancel only flags the subscription; the reconciliation sweep
/// ends the gateway recurrence once `current_period_end` is reached. An
/// immediate cancel ends the recurrence on the gateway first, so a gateway
/// failure leaves the subscription untouched.
pub struct CancelSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateways: GatewayRegistry,
    publisher: Arc<dyn SubscriptionEventPublisher>,
    locks: Arc<SubscriptionLocks>,
}

impl CancelSubscriptionHandler {
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
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
        now: Timestamp,
    ) -> Result<CancelSubscriptionResult, DomainError> {
        let _guard = self.locks.acquire(cmd.subscription_id).await;

        // 1. Find the subscription
        let mut subscription = self
            .subscriptions
            .find_by_id(cmd.subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription {} not found", cmd.subscription_id),
                )
            })?;

        // 2. Apply the cancel
        let (event, effective_at) = if cmd.at_period_end {
            let event = subscription.schedule_cancel(cmd.reason, now)?;
            (event, subscription.current_period_end)
        } else {
            // Terminal subscriptions carry no recurrence; `cancel` rejects them.
            if let Some(recurrence) = subscription.recurrence() {
                self.gateways.cancel_recurrence(&recurrence).await?;
            }
            (subscription.cancel(cmd.reason, now)?, now)
        };

        // 3. Persist
        self.subscriptions.update(&subscription).await?;

        info!(
            subscription_id = %subscription.id,
            at_period_end = cmd.at_period_end,
            effective_at = %effective_at,
            "Subscription cancellation recorded"
        );

        // 4. Notify
        publish_lifecycle(self.publisher.as_ref(), &event).await;

        Ok(CancelSubscriptionResult {
            subscription,
            event,
            effective_at,
        })
    }
}
