//! Test doubles shared by the application handler tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::billing::{BillingEventKind, Gateway, NormalizedEvent, WebhookError};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    AuthorizationArtifact, Charge, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway,
};

/// Signature value `StubGateway` accepts.
pub const VALID_SIGNATURE: &str = "valid";

/// Gateway double.
///
/// Webhook bodies are JSON arrays of `NormalizedEvent`; the only accepted
/// signature is [`VALID_SIGNATURE`]. Outbound calls are recorded.
pub struct StubGateway {
    gateway: Gateway,
    fail_cancel: bool,
    fail_create: bool,
    canceled: Mutex<Vec<String>>,
    charges: Mutex<Vec<ChargeRequest>>,
    collected: Vec<NormalizedEvent>,
}

impl StubGateway {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            fail_cancel: false,
            fail_create: false,
            canceled: Mutex::new(Vec::new()),
            charges: Mutex::new(Vec::new()),
            collected: Vec::new(),
        }
    }

    /// Reports `event` from `recurrence_payments` for its recurrence.
    pub fn with_collected_payment(mut self, event: NormalizedEvent) -> Self {
        self.collected.push(event);
        self
    }

    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn canceled(&self) -> Vec<String> {
        self.canceled.lock().unwrap().clone()
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    /// Serializes events into a body this stub parses back.
    pub fn body(events: &[NormalizedEvent]) -> Vec<u8> {
        serde_json::to_vec(events).unwrap()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn gateway(&self) -> Gateway {
        self.gateway
    }

    async fn create_recurring_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        if self.fail_create {
            return Err(GatewayError::Server {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let mut charges = self.charges.lock().unwrap();
        charges.push(request.clone());
        Ok(Charge {
            charge_id: format!("charge-{}", charges.len()),
            recurrence_id: Some(format!("rec-{}", charges.len())),
            status: ChargeStatus::AwaitingAuthorization,
            authorization: AuthorizationArtifact::CheckoutUrl {
                url: "https://pay.example/checkout".to_string(),
            },
        })
    }

    async fn get_charge_status(&self, _charge_id: &str) -> Result<ChargeStatus, GatewayError> {
        Ok(ChargeStatus::Active)
    }

    async fn cancel_recurrence(&self, recurrence_id: &str) -> Result<(), GatewayError> {
        if self.fail_cancel {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        self.canceled.lock().unwrap().push(recurrence_id.to_string());
        Ok(())
    }

    async fn recurrence_payments(
        &self,
        recurrence_id: &str,
    ) -> Result<Vec<NormalizedEvent>, GatewayError> {
        if self.fail_cancel {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        Ok(self
            .collected
            .iter()
            .filter(|event| match &event.kind {
                BillingEventKind::PaymentConfirmed(payment) => {
                    payment.recurrence_id.as_deref() == Some(recurrence_id)
                }
                _ => false,
            })
            .cloned()
            .collect())
    }

    fn signature_header(&self) -> &'static str {
        "x-signature"
    }

    fn verify_webhook_signature(
        &self,
        _payload: &[u8],
        signature: Option<&str>,
        _now: Timestamp,
    ) -> Result<(), WebhookError> {
        match signature {
            None => Err(WebhookError::MissingSignature),
            Some(VALID_SIGNATURE) => Ok(()),
            Some(_) => Err(WebhookError::InvalidSignature),
        }
    }

    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::ParseError(e.to_string()))
    }
}
