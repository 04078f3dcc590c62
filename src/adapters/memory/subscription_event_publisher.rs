//! Publisher that keeps lifecycle events in memory for assertions.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::billing::SubscriptionEvent;
use crate::domain::foundation::DomainError;
use crate::ports::SubscriptionEventPublisher;

#[derive(Default)]
pub struct RecordingEventPublisher {
    published: Mutex<Vec<SubscriptionEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<SubscriptionEvent> {
        self.published.lock().await.clone()
    }

    /// Names of published events in order, e.g. `["renewed"]`.
    pub async fn names(&self) -> Vec<&'static str> {
        self.published.lock().await.iter().map(|e| e.name()).collect()
    }
}

#[async_trait]
impl SubscriptionEventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &SubscriptionEvent) -> Result<(), DomainError> {
        self.published.lock().await.push(event.clone());
        Ok(())
    }
}
