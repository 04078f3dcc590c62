//! Application handlers.
//!
//! Command handlers that orchestrate domain operations. Every handler takes
//! `now` explicitly so time-driven behavior is testable.

pub mod subscription;
pub mod webhook;

use tracing::warn;

use crate::domain::billing::SubscriptionEvent;
use crate::ports::SubscriptionEventPublisher;

pub use subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
    CreateTrialCommand, CreateTrialHandler, CreateTrialResult, ReconcileOutcome, ReconcileReport,
    ReconcileSubscriptionsHandler, StartRecurringBillingCommand, StartRecurringBillingHandler,
    StartRecurringBillingResult,
};
pub use webhook::{
    EventProcessor, IngestWebhookCommand, IngestWebhookResult, ProcessOutcome, RetrySweep,
    RetrySweepReport, WebhookIngestor,
};

/// Publishes a lifecycle event after the transition is persisted.
///
/// The transition stands even if nobody hears about it.
pub(crate) async fn publish_lifecycle(
    publisher: &dyn SubscriptionEventPublisher,
    event: &SubscriptionEvent,
) {
    if let Err(err) = publisher.publish(event).await {
        warn!(
            subscription_id = %event.subscription_id,
            event = event.name(),
            error = %err,
            "Failed to publish subscription event"
        );
    }
}
