//! Subscription repository port.
//!
//! Persists Subscription aggregates. Callers serialize mutations per
//! subscription (see `SubscriptionLocks`), so implementations only need
//! last-write-wins updates of the full aggregate.

use async_trait::async_trait;

use crate::domain::billing::{Gateway, Subscription};
use crate::domain::foundation::{DomainError, OwnerId, SubscriptionId, Timestamp};

/// Repository port for Subscription aggregate persistence.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Save a new subscription.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the id already exists
    /// - `DatabaseError` on persistence failure
    async fn save(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Update an existing subscription.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if it does not exist
    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// Find the subscription billed by a gateway recurrence.
    async fn find_by_recurrence_id(
        &self,
        gateway: Gateway,
        recurrence_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Find the owner's non-terminal subscription, if any.
    async fn find_live_by_owner(&self, owner_id: OwnerId) -> Result<Option<Subscription>, DomainError>;

    /// Ids of non-terminal subscriptions that may need a time-driven
    /// transition at `now`: trials past their end, periods past their end,
    /// every past-due subscription and every pending deferred cancel.
    ///
    /// This is a coarse filter; `Subscription::reconciliation_action` decides.
    async fn find_due_for_reconciliation(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<SubscriptionId>, DomainError>;
}
