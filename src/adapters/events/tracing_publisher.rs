//! Lifecycle publisher that emits structured log records.
//!
//! Downstream consumers (access control, email) tail these records until a
//! message broker is wired in.

use async_trait::async_trait;

use crate::domain::billing::SubscriptionEvent;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::SubscriptionEventPublisher;

/// Publishes each lifecycle event as an `info` record with target
/// `subscription_events`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

impl TracingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubscriptionEventPublisher for TracingEventPublisher {
    async fn publish(&self, event: &SubscriptionEvent) -> Result<(), DomainError> {
        let payload = serde_json::to_string(&event.kind)
            .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?;

        tracing::info!(
            target: "subscription_events",
            event = event.name(),
            subscription_id = %event.subscription_id,
            owner_id = %event.owner_id,
            occurred_at = %event.occurred_at.as_datetime(),
            payload = %payload,
            "Subscription lifecycle event"
        );
        Ok(())
    }
}
