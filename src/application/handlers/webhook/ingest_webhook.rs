//! WebhookIngestor - accepts a webhook delivery and records its events.
//!
//! Authenticity is checked before anything is written: a delivery with a
//! missing or invalid signature leaves no trace in the event ledger. Each
//! parsed event is inserted keyed by `(gateway, event_id)`; duplicates are
//! acknowledged without being stored again. Newly stored events are handed to
//! the `EventProcessor` on a background task, and the retry sweep picks up
//! anything that task does not finish.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::application::GatewayRegistry;
use crate::domain::billing::{WebhookError, WebhookEvent};
use crate::domain::foundation::{Timestamp, WebhookEventId};
use crate::ports::{SaveResult, WebhookEventRepository};

use super::EventProcessor;

/// Headers never copied into the stored audit record.
const REDACTED_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// Command to ingest one webhook delivery.
#[derive(Debug, Clone)]
pub struct IngestWebhookCommand {
    /// Route segment naming the gateway (`pix`, `card`).
    pub gateway: String,
    /// Raw request body, exactly as signed by the sender.
    pub payload: Vec<u8>,
    /// Request headers with lowercase names.
    pub headers: BTreeMap<String, String>,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestWebhookResult {
    /// Events stored by this delivery.
    pub inserted: Vec<WebhookEventId>,
    /// Events already stored by an earlier delivery.
    pub duplicates: usize,
}

/// Handler for inbound webhook deliveries.
pub struct WebhookIngestor {
    gateways: GatewayRegistry,
    events: Arc<dyn WebhookEventRepository>,
    processor: Option<Arc<EventProcessor>>,
}

impl WebhookIngestor {
    pub fn new(gateways: GatewayRegistry, events: Arc<dyn WebhookEventRepository>) -> Self {
        Self {
            gateways,
            events,
            processor: None,
        }
    }

    /// Processes stored events right away instead of waiting for the sweep.
    pub fn with_processor(mut self, processor: Arc<EventProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub async fn handle(
        &self,
        cmd: IngestWebhookCommand,
        now: Timestamp,
    ) -> Result<IngestWebhookResult, WebhookError> {
        let gateway = self.gateways.resolve(&cmd.gateway)?;
        let name = gateway.gateway();

        let signature = cmd.headers.get(gateway.signature_header()).map(String::as_str);
        if let Err(e) = gateway.verify_webhook_signature(&cmd.payload, signature, now) {
            warn!(gateway = %name, error = %e, "Webhook rejected");
            return Err(e);
        }

        let events = gateway.parse_webhook_payload(&cmd.payload)?;
        let headers = audit_headers(&cmd.headers);

        let mut result = IngestWebhookResult::default();
        for event in &events {
            let stored = WebhookEvent::received(event, headers.clone(), now)
                .map_err(|e| WebhookError::ParseError(e.to_string()))?;

            match self.events.insert_if_absent(&stored).await? {
                SaveResult::Inserted => {
                    info!(
                        gateway = %name,
                        event_id = %stored.event_id,
                        event_type = %stored.event_type,
                        "Webhook event stored"
                    );
                    result.inserted.push(stored.id);
                }
                SaveResult::AlreadyExists => {
                    debug!(gateway = %name, event_id = %stored.event_id, "Duplicate webhook event");
                    result.duplicates += 1;
                }
            }
        }

        self.dispatch(&result.inserted);
        Ok(result)
    }

    /// Processes one delivery's events in order on a single task.
    fn dispatch(&self, ids: &[WebhookEventId]) {
        let Some(processor) = &self.processor else {
            return;
        };
        if ids.is_empty() {
            return;
        }
        let processor = Arc::clone(processor);
        let ids = ids.to_vec();
        tokio::spawn(async move {
            for id in ids {
                if let Err(e) = processor.process(id, Timestamp::now()).await {
                    error!(webhook_event_id = %id, error = %e, "Webhook processing could not be recorded");
                }
            }
        });
    }
}

fn audit_headers(headers: &BTreeMap<String, String>) -> serde_json::Value {
    let kept: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
        .collect();
    serde_json::Value::Object(kept)
}
