//! SubscriptionEventPublisher port - lifecycle notifications.
//!
//! Called after a transition is persisted (trial expired, canceled, renewed,
//! ...). Publishing failures are logged by callers and never roll back the
//! transition.

use async_trait::async_trait;

use crate::domain::billing::SubscriptionEvent;
use crate::domain::foundation::DomainError;

/// Port for publishing subscription lifecycle events.
#[async_trait]
pub trait SubscriptionEventPublisher: Send + Sync {
    async fn publish(&self, event: &SubscriptionEvent) -> Result<(), DomainError>;
}
