//! PaymentLedger port - append-mostly record of payment attempts.
//!
//! `(gateway, gateway_payment_id)` is unique when the id is present. That
//! uniqueness is what makes a duplicated confirmed-payment event a no-op.

use async_trait::async_trait;

use crate::domain::billing::{Gateway, PaymentRecord};
use crate::domain::foundation::{DomainError, SubscriptionId};

use super::SaveResult;

/// Port for the payment ledger.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Inserts the record unless its gateway payment id is already recorded.
    /// Records without a gateway payment id are always inserted.
    async fn insert_if_absent(&self, record: &PaymentRecord) -> Result<SaveResult, DomainError>;

    /// Persists a status change of an existing record.
    async fn update(&self, record: &PaymentRecord) -> Result<(), DomainError>;

    async fn find_by_gateway_payment_id(
        &self,
        gateway: Gateway,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DomainError>;

    /// All records for a subscription, oldest first.
    async fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<PaymentRecord>, DomainError>;
}
