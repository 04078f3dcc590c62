//! In-memory payment ledger.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::billing::{Gateway, PaymentRecord};
use crate::domain::foundation::{DomainError, ErrorCode, PaymentId, SubscriptionId};
use crate::ports::{PaymentLedger, SaveResult};

#[derive(Default)]
struct Records {
    by_id: HashMap<PaymentId, PaymentRecord>,
    by_gateway_id: HashMap<(Gateway, String), PaymentId>,
}

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    records: RwLock<Records>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first.
    pub async fn all(&self) -> Vec<PaymentRecord> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records.by_id.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn insert_if_absent(&self, record: &PaymentRecord) -> Result<SaveResult, DomainError> {
        let mut records = self.records.write().await;
        if let Some(payment_id) = &record.gateway_payment_id {
            let key = (record.gateway, payment_id.clone());
            if records.by_gateway_id.contains_key(&key) {
                return Ok(SaveResult::AlreadyExists);
            }
            records.by_gateway_id.insert(key, record.id);
        }
        records.by_id.insert(record.id, record.clone());
        Ok(SaveResult::Inserted)
    }

    async fn update(&self, record: &PaymentRecord) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        match records.by_id.get_mut(&record.id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(DomainError::new(
                ErrorCode::PaymentNotFound,
                format!("Payment {} not found", record.id),
            )),
        }
    }

    async fn find_by_gateway_payment_id(
        &self,
        gateway: Gateway,
        gateway_payment_id: &str,
    ) -> Result<Option<PaymentRecord>, DomainError> {
        let records = self.records.read().await;
        Ok(records
            .by_gateway_id
            .get(&(gateway, gateway_payment_id.to_string()))
            .and_then(|id| records.by_id.get(id))
            .cloned())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<PaymentRecord>, DomainError> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .by_id
            .values()
            .filter(|r| r.subscription_id == subscription_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }
}
