//! In-memory webhook event ledger.
//!
//! Uniqueness of `(gateway, event_id)` and claim atomicity both come from
//! doing the check and the write under one write lock.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::billing::{Gateway, WebhookEvent, WebhookStatus};
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, WebhookEventId};
use crate::ports::{ClaimPolicy, SaveResult, WebhookEventRepository};

#[derive(Default)]
struct Ledger {
    events: HashMap<WebhookEventId, WebhookEvent>,
    by_key: HashMap<(Gateway, String), WebhookEventId>,
}

/// Webhook event ledger kept in process memory.
#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    ledger: RwLock<Ledger>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub async fn len(&self) -> usize {
        self.ledger.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All stored events, oldest first.
    pub async fn all(&self) -> Vec<WebhookEvent> {
        let ledger = self.ledger.read().await;
        let mut events: Vec<_> = ledger.events.values().cloned().collect();
        events.sort_by_key(|e| e.received_at);
        events
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<SaveResult, DomainError> {
        let mut ledger = self.ledger.write().await;
        let key = (event.gateway, event.event_id.clone());
        if ledger.by_key.contains_key(&key) {
            return Ok(SaveResult::AlreadyExists);
        }
        ledger.by_key.insert(key, event.id);
        ledger.events.insert(event.id, event.clone());
        Ok(SaveResult::Inserted)
    }

    async fn find_by_id(&self, id: WebhookEventId) -> Result<Option<WebhookEvent>, DomainError> {
        Ok(self.ledger.read().await.events.get(&id).cloned())
    }

    async fn find_by_event_id(
        &self,
        gateway: Gateway,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, DomainError> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .by_key
            .get(&(gateway, event_id.to_string()))
            .and_then(|id| ledger.events.get(id))
            .cloned())
    }

    async fn claim(
        &self,
        id: WebhookEventId,
        now: Timestamp,
        policy: ClaimPolicy,
    ) -> Result<Option<WebhookEvent>, DomainError> {
        let mut ledger = self.ledger.write().await;
        let Some(event) = ledger.events.get_mut(&id) else {
            return Ok(None);
        };
        if !event.is_claimable(now, policy.pending_grace, policy.stale_after) {
            return Ok(None);
        }
        event.start_processing(now)?;
        Ok(Some(event.clone()))
    }

    async fn complete(&self, event: &WebhookEvent, claimed_at: Timestamp) -> Result<bool, DomainError> {
        let mut ledger = self.ledger.write().await;
        let Some(stored) = ledger.events.get_mut(&event.id) else {
            return Err(DomainError::new(
                ErrorCode::WebhookEventNotFound,
                format!("Webhook event {} not found", event.id),
            ));
        };
        if stored.status != WebhookStatus::Processing
            || stored.processing_started_at != Some(claimed_at)
        {
            return Ok(false);
        }
        *stored = event.clone();
        Ok(true)
    }

    async fn find_claimable(
        &self,
        now: Timestamp,
        policy: ClaimPolicy,
        limit: usize,
    ) -> Result<Vec<WebhookEventId>, DomainError> {
        let ledger = self.ledger.read().await;
        let mut due: Vec<&WebhookEvent> = ledger
            .events
            .values()
            .filter(|e| e.is_claimable(now, policy.pending_grace, policy.stale_after))
            .collect();
        due.sort_by_key(|e| e.received_at);
        Ok(due.into_iter().take(limit).map(|e| e.id).collect())
    }

    async fn list_by_status(
        &self,
        status: WebhookStatus,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, DomainError> {
        let ledger = self.ledger.read().await;
        let mut matching: Vec<WebhookEvent> = ledger
            .events
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.received_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn archive_settled_before(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<u64, DomainError> {
        let mut ledger = self.ledger.write().await;
        let mut archived = 0;
        for event in ledger.events.values_mut() {
            let settled = matches!(event.status, WebhookStatus::Processed | WebhookStatus::Skipped);
            if settled && event.archived_at.is_none() && event.received_at.is_before(&cutoff) {
                event.archived_at = Some(now);
                archived += 1;
            }
        }
        Ok(archived)
    }
}
