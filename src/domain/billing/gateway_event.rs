//! Gateway-neutral webhook events.
//!
//! Each gateway adapter parses its own payload format into `NormalizedEvent`s.
//! The set of event kinds is closed: the event processor matches on
//! `BillingEventKind` exhaustively, so supporting a new provider event means
//! adding a variant here.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{SubscriptionId, Timestamp};

use super::Gateway;

/// A confirmed payment as reported by a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedPayment {
    /// Gateway payment id (PIX end-to-end id, card invoice id).
    pub payment_id: String,
    pub recurrence_id: Option<String>,
    pub customer_reference: Option<String>,
    pub amount_cents: i64,
    pub paid_at: Option<Timestamp>,
    pub period_start: Option<Timestamp>,
    pub period_end: Option<Timestamp>,
}

/// What a webhook told us, independent of gateway vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEventKind {
    PaymentConfirmed(ConfirmedPayment),

    PaymentFailed {
        payment_id: Option<String>,
        recurrence_id: Option<String>,
        customer_reference: Option<String>,
        amount_cents: Option<i64>,
        reason: Option<String>,
    },

    PaymentRefunded {
        payment_id: String,
    },

    /// Payer authorized the recurrence (PIX) or completed checkout (card).
    RecurrenceApproved {
        recurrence_id: String,
        customer_reference: Option<String>,
    },

    /// Recurrence ended on the gateway side: rejected, canceled or expired.
    RecurrenceCanceled {
        recurrence_id: String,
        customer_reference: Option<String>,
        reason: String,
    },

    /// Provider event type this crate does not act on.
    Unrecognized {
        provider_type: String,
    },
}

/// One event extracted from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub gateway: Gateway,
    /// Unique per gateway; the deduplication key.
    pub event_id: String,
    pub kind: BillingEventKind,
    pub occurred_at: Option<Timestamp>,
}

/// How an event identifies the subscription it is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionLookup<'a> {
    pub recurrence_id: Option<&'a str>,
    pub customer_reference: Option<&'a str>,
}

impl<'a> SubscriptionLookup<'a> {
    /// The customer reference parsed as one of our subscription ids.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.customer_reference.and_then(|r| r.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.recurrence_id.is_none() && self.customer_reference.is_none()
    }
}

impl NormalizedEvent {
    /// Stable snake_case name stored as the webhook event type.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            BillingEventKind::PaymentConfirmed(_) => "payment_confirmed",
            BillingEventKind::PaymentFailed { .. } => "payment_failed",
            BillingEventKind::PaymentRefunded { .. } => "payment_refunded",
            BillingEventKind::RecurrenceApproved { .. } => "recurrence_approved",
            BillingEventKind::RecurrenceCanceled { .. } => "recurrence_canceled",
            BillingEventKind::Unrecognized { .. } => "unrecognized",
        }
    }

    /// References available for locating the affected subscription.
    pub fn lookup(&self) -> SubscriptionLookup<'_> {
        match &self.kind {
            BillingEventKind::PaymentConfirmed(payment) => SubscriptionLookup {
                recurrence_id: payment.recurrence_id.as_deref(),
                customer_reference: payment.customer_reference.as_deref(),
            },
            BillingEventKind::PaymentFailed {
                recurrence_id,
                customer_reference,
                ..
            } => SubscriptionLookup {
                recurrence_id: recurrence_id.as_deref(),
                customer_reference: customer_reference.as_deref(),
            },
            BillingEventKind::RecurrenceApproved {
                recurrence_id,
                customer_reference,
            }
            | BillingEventKind::RecurrenceCanceled {
                recurrence_id,
                customer_reference,
                ..
            } => SubscriptionLookup {
                recurrence_id: Some(recurrence_id.as_str()),
                customer_reference: customer_reference.as_deref(),
            },
            BillingEventKind::PaymentRefunded { .. } | BillingEventKind::Unrecognized { .. } => {
                SubscriptionLookup::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(reference: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            gateway: Gateway::Pix,
            event_id: "E123".into(),
            kind: BillingEventKind::PaymentConfirmed(ConfirmedPayment {
                payment_id: "E123".into(),
                recurrence_id: Some("RN123".into()),
                customer_reference: reference.map(String::from),
                amount_cents: 9900,
                paid_at: None,
                period_start: None,
                period_end: None,
            }),
            occurred_at: None,
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(confirmed(None)).unwrap();
        assert_eq!(json["kind"]["type"], "payment_confirmed");
        assert_eq!(json["kind"]["amount_cents"], 9900);

        let back: NormalizedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, confirmed(None));
    }

    #[test]
    fn lookup_parses_customer_reference_as_subscription_id() {
        let id = SubscriptionId::new();
        let event = confirmed(Some(&id.to_string()));
        let lookup = event.lookup();

        assert_eq!(lookup.recurrence_id, Some("RN123"));
        assert_eq!(lookup.subscription_id(), Some(id));
    }

    #[test]
    fn lookup_ignores_foreign_customer_references() {
        let event = confirmed(Some("cus_external"));
        assert_eq!(event.lookup().subscription_id(), None);
    }

    #[test]
    fn refunds_carry_no_subscription_reference() {
        let event = NormalizedEvent {
            gateway: Gateway::Card,
            event_id: "evt_1".into(),
            kind: BillingEventKind::PaymentRefunded {
                payment_id: "in_1".into(),
            },
            occurred_at: None,
        };
        assert!(event.lookup().is_empty());
        assert_eq!(event.event_type(), "payment_refunded");
    }
}
