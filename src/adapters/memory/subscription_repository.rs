//! In-memory subscription store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::billing::{Gateway, Subscription, SubscriptionStatus};
use crate::domain::foundation::{DomainError, ErrorCode, OwnerId, SubscriptionId, Timestamp};
use crate::ports::SubscriptionRepository;

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn due_for_reconciliation(subscription: &Subscription, now: Timestamp) -> bool {
    if subscription.is_terminal() {
        return false;
    }
    if subscription.cancel_at_period_end && !now.is_before(&subscription.current_period_end) {
        return true;
    }
    match subscription.status {
        SubscriptionStatus::Trialing => subscription
            .trial_end_date
            .map(|end| now.is_after(&end))
            .unwrap_or(false),
        SubscriptionStatus::Active => now.is_after(&subscription.current_period_end),
        SubscriptionStatus::PastDue => true,
        SubscriptionStatus::Canceled | SubscriptionStatus::Expired => false,
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("Subscription {} already exists", subscription.id),
            ));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&subscription.id) {
            Some(stored) => {
                *stored = subscription.clone();
                Ok(())
            }
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", subscription.id),
            )),
        }
    }

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn find_by_recurrence_id(
        &self,
        gateway: Gateway,
        recurrence_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .find(|s| s.gateway == gateway && s.gateway_recurrence_id.as_deref() == Some(recurrence_id))
            .cloned())
    }

    async fn find_live_by_owner(&self, owner_id: OwnerId) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .find(|s| s.owner_id == owner_id && !s.is_terminal())
            .cloned())
    }

    async fn find_due_for_reconciliation(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let subscriptions = self.subscriptions.read().await;
        let mut due: Vec<&Subscription> = subscriptions
            .values()
            .filter(|s| due_for_reconciliation(s, now))
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        Ok(due.into_iter().take(limit).map(|s| s.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::BillingInterval;
    use crate::domain::foundation::PlanId;

    fn trial(now: Timestamp) -> Subscription {
        Subscription::start_trial(OwnerId::new(), PlanId::new(), BillingInterval::Monthly, 14, now).0
    }

    #[tokio::test]
    async fn save_rejects_duplicate_ids() {
        let repo = InMemorySubscriptionRepository::new();
        let subscription = trial(Timestamp::now());

        repo.save(&subscription).await.unwrap();
        let err = repo.save(&subscription).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn update_of_unknown_subscription_fails() {
        let repo = InMemorySubscriptionRepository::new();
        let err = repo.update(&trial(Timestamp::now())).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionNotFound);
    }

    #[tokio::test]
    async fn finds_by_recurrence_within_gateway() {
        let repo = InMemorySubscriptionRepository::new();
        let mut subscription = trial(Timestamp::now());
        subscription.gateway = Gateway::Pix;
        subscription.gateway_recurrence_id = Some("RR1".into());
        repo.save(&subscription).await.unwrap();

        assert!(repo.find_by_recurrence_id(Gateway::Pix, "RR1").await.unwrap().is_some());
        assert!(repo.find_by_recurrence_id(Gateway::Card, "RR1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trial_is_due_only_after_it_ends() {
        let repo = InMemorySubscriptionRepository::new();
        let now = Timestamp::now();
        let subscription = trial(now);
        repo.save(&subscription).await.unwrap();

        assert!(repo.find_due_for_reconciliation(now.add_days(13), 10).await.unwrap().is_empty());
        assert_eq!(
            repo.find_due_for_reconciliation(now.add_days(15), 10).await.unwrap(),
            vec![subscription.id]
        );
    }
}
