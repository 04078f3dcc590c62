//! WebhookEventRepository port - the durable webhook event ledger.
//!
//! Every verified delivery is stored here before any processing. The
//! `(gateway, event_id)` pair is unique: implementations must rely on a
//! storage-level constraint so concurrent duplicate deliveries collapse into
//! one row. Rows are never deleted, only archived.

use async_trait::async_trait;
use chrono::Duration;

use crate::domain::billing::{Gateway, WebhookEvent, WebhookStatus};
use crate::domain::foundation::{DomainError, Timestamp, WebhookEventId};

/// Result of attempting to insert a keyed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Record was inserted (first time seeing this key).
    Inserted,
    /// Record already exists (duplicate).
    AlreadyExists,
}

/// When events become claimable by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// Age a `pending` event must reach before a sweep picks it up.
    pub pending_grace: Duration,
    /// Age after which a `processing` claim is considered abandoned.
    pub stale_after: Duration,
}

impl ClaimPolicy {
    /// Policy for the ingest path: the event was just inserted.
    pub fn immediate(stale_after: Duration) -> Self {
        Self {
            pending_grace: Duration::zero(),
            stale_after,
        }
    }
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            pending_grace: Duration::seconds(60),
            stale_after: Duration::minutes(5),
        }
    }
}

/// Port for the webhook event ledger.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Inserts the event unless `(gateway, event_id)` already exists.
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<SaveResult, DomainError>;

    async fn find_by_id(&self, id: WebhookEventId) -> Result<Option<WebhookEvent>, DomainError>;

    async fn find_by_event_id(
        &self,
        gateway: Gateway,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, DomainError>;

    /// Atomically moves a claimable event (see `WebhookEvent::is_claimable`)
    /// to `processing` and returns it. `None` if another worker holds it or
    /// it needs no work.
    async fn claim(
        &self,
        id: WebhookEventId,
        now: Timestamp,
        policy: ClaimPolicy,
    ) -> Result<Option<WebhookEvent>, DomainError>;

    /// Persists the outcome of a processing attempt.
    ///
    /// Only writes while the stored event is still `processing` under the
    /// claim that started at `claimed_at`. Returns `false` without writing
    /// when a newer claim has taken the event over.
    async fn complete(&self, event: &WebhookEvent, claimed_at: Timestamp) -> Result<bool, DomainError>;

    /// Ids of events claimable at `now`, oldest first.
    async fn find_claimable(
        &self,
        now: Timestamp,
        policy: ClaimPolicy,
        limit: usize,
    ) -> Result<Vec<WebhookEventId>, DomainError>;

    /// Events in a given status, oldest first, for operator review.
    async fn list_by_status(
        &self,
        status: WebhookStatus,
        limit: usize,
    ) -> Result<Vec<WebhookEvent>, DomainError>;

    /// Marks processed and skipped events received before `cutoff` as archived.
    ///
    /// Returns the number of events archived.
    async fn archive_settled_before(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<u64, DomainError>;
}
