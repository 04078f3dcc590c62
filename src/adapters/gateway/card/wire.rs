//! Card provider API objects as they arrive over HTTP and in webhooks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ports::ChargeStatus;

/// Metadata key holding our subscription id.
pub const SUBSCRIPTION_METADATA_KEY: &str = "subscription_id";

// ════════════════════════════════════════════════════════════════════════════════
// Checkout
// ════════════════════════════════════════════════════════════════════════════════

/// `POST /v1/checkout/sessions` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckoutSession {
    pub mode: &'static str,
    pub price: String,
    pub quantity: u32,
    pub customer_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// Checkout Session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session identifier (cs_...).
    pub id: String,

    /// Hosted checkout page. Absent once the session is complete.
    #[serde(default)]
    pub url: Option<String>,

    /// Session status (open, complete, expired).
    pub status: String,

    /// Provider subscription created by the checkout.
    #[serde(default)]
    pub subscription: Option<String>,

    #[serde(default)]
    pub customer_reference: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn charge_status(&self) -> ChargeStatus {
        match self.status.as_str() {
            "complete" => ChargeStatus::Active,
            "expired" => ChargeStatus::Expired,
            _ => ChargeStatus::AwaitingAuthorization,
        }
    }

    pub fn reference(&self) -> Option<String> {
        self.metadata
            .get(SUBSCRIPTION_METADATA_KEY)
            .cloned()
            .or_else(|| self.customer_reference.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook envelope and objects
// ════════════════════════════════════════════════════════════════════════════════

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct CardWebhookEvent {
    /// Unique event identifier (evt_...).
    pub id: String,

    /// Event type (e.g. "invoice.paid").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp when the event was created.
    #[serde(default)]
    pub created: Option<i64>,

    pub data: CardEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardEventData {
    /// The object affected by this event.
    pub object: serde_json::Value,
}

/// Invoice object.
#[derive(Debug, Clone, Deserialize)]
pub struct CardInvoice {
    /// Invoice identifier (in_...). Used as the gateway payment id.
    pub id: String,

    /// Provider subscription the invoice bills.
    #[serde(default)]
    pub subscription: Option<String>,

    #[serde(default)]
    pub customer_reference: Option<String>,

    #[serde(default)]
    pub amount_paid: i64,

    #[serde(default)]
    pub amount_due: Option<i64>,

    /// Billed period, Unix seconds.
    #[serde(default)]
    pub period_start: Option<i64>,
    #[serde(default)]
    pub period_end: Option<i64>,

    #[serde(default)]
    pub paid_at: Option<i64>,

    #[serde(default)]
    pub failure_reason: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CardInvoice {
    pub fn reference(&self) -> Option<String> {
        self.metadata
            .get(SUBSCRIPTION_METADATA_KEY)
            .cloned()
            .or_else(|| self.customer_reference.clone())
    }
}

/// Subscription object, as sent with `customer.subscription.*` events.
#[derive(Debug, Clone, Deserialize)]
pub struct CardSubscription {
    pub id: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub cancellation_details: Option<CancellationDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancellationDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Charge object, as sent with `charge.refunded`.
#[derive(Debug, Clone, Deserialize)]
pub struct CardCharge {
    pub id: String,

    /// Invoice the charge paid.
    #[serde(default)]
    pub invoice: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_maps_to_charge_status() {
        let session: CheckoutSession =
            serde_json::from_str(r#"{"id":"cs_1","status":"complete","subscription":"sub_1"}"#)
                .unwrap();
        assert_eq!(session.charge_status(), ChargeStatus::Active);

        let open: CheckoutSession =
            serde_json::from_str(r#"{"id":"cs_2","status":"open","url":"https://pay/cs_2"}"#).unwrap();
        assert_eq!(open.charge_status(), ChargeStatus::AwaitingAuthorization);
    }

    #[test]
    fn metadata_reference_wins_over_customer_reference() {
        let invoice: CardInvoice = serde_json::from_str(
            r#"{"id":"in_1","customer_reference":"cr","metadata":{"subscription_id":"meta"}}"#,
        )
        .unwrap();
        assert_eq!(invoice.reference().as_deref(), Some("meta"));
    }
}
