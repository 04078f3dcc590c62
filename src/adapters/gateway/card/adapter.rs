//! Card billing gateway adapter.
//!
//! Recurring billing starts with a hosted checkout session in subscription
//! mode. The provider then bills the card every period and reports each
//! invoice through webhooks.
//!
//! # Security
//!
//! - Webhooks carry `X-Webhook-Signature: t=<unix>,v1=<hex>` where the MAC
//!   covers `"{t}.{body}"`
//! - Signatures older than the tolerance (5 minutes by default) are rejected
//! - Secrets are handled via `secrecy::SecretString`

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::SecretString;

use crate::adapters::gateway::GatewayHttpClient;
use crate::domain::billing::{
    BillingEventKind, ConfirmedPayment, Gateway, NormalizedEvent, TimestampedSignatureVerifier,
    WebhookError, DEFAULT_SIGNATURE_TOLERANCE_SECS,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    AuthorizationArtifact, Charge, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway,
};

use super::wire::{
    CardCharge, CardInvoice, CardSubscription, CardWebhookEvent, CheckoutSession,
    CreateCheckoutSession, SUBSCRIPTION_METADATA_KEY,
};

/// Header carrying the timestamped signature.
pub const CARD_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Redirect targets and webhook verification for the card gateway.
#[derive(Clone)]
pub struct CardSettings {
    pub success_url: String,
    pub cancel_url: String,
    pub webhook_secret: Option<SecretString>,
    pub signature_tolerance_secs: i64,
}

impl CardSettings {
    pub fn new(success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            webhook_secret: None,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn with_webhook_secret(mut self, secret: SecretString) -> Self {
        self.webhook_secret = Some(secret);
        self
    }

    pub fn with_signature_tolerance_secs(mut self, secs: i64) -> Self {
        self.signature_tolerance_secs = secs;
        self
    }
}

/// Card gateway adapter.
pub struct CardAdapter {
    http: GatewayHttpClient,
    success_url: String,
    cancel_url: String,
    verifier: Option<TimestampedSignatureVerifier>,
}

impl CardAdapter {
    pub fn new(http: GatewayHttpClient, settings: CardSettings) -> Self {
        let tolerance = settings.signature_tolerance_secs;
        Self {
            http,
            success_url: settings.success_url,
            cancel_url: settings.cancel_url,
            verifier: settings
                .webhook_secret
                .map(|s| TimestampedSignatureVerifier::new(s).with_tolerance_secs(tolerance)),
        }
    }

    fn build_session(&self, request: &ChargeRequest) -> Result<CreateCheckoutSession, GatewayError> {
        let price = request
            .price_reference
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| GatewayError::validation("price reference is required for card billing"))?;
        if request.amount_cents <= 0 {
            return Err(GatewayError::validation("amount must be positive"));
        }

        let reference = request.subscription_id.to_string();
        let mut metadata = HashMap::new();
        metadata.insert(SUBSCRIPTION_METADATA_KEY.to_string(), reference.clone());

        Ok(CreateCheckoutSession {
            mode: "subscription",
            price: price.to_string(),
            quantity: 1,
            customer_reference: reference,
            customer_email: request.payer.email.clone(),
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
            metadata,
        })
    }

    /// Converts a provider event into its normalized kind.
    fn event_kind(event: &CardWebhookEvent) -> Result<BillingEventKind, WebhookError> {
        let object = event.data.object.clone();
        let kind = match event.event_type.as_str() {
            "invoice.paid" | "invoice.payment_succeeded" => {
                let invoice: CardInvoice = decode(object, "invoice")?;
                BillingEventKind::PaymentConfirmed(ConfirmedPayment {
                    customer_reference: invoice.reference(),
                    payment_id: invoice.id,
                    recurrence_id: invoice.subscription,
                    amount_cents: invoice.amount_paid,
                    paid_at: invoice
                        .paid_at
                        .or(event.created)
                        .and_then(Timestamp::from_unix_secs),
                    period_start: invoice.period_start.and_then(Timestamp::from_unix_secs),
                    period_end: invoice.period_end.and_then(Timestamp::from_unix_secs),
                })
            }

            "invoice.payment_failed" => {
                let invoice: CardInvoice = decode(object, "invoice")?;
                BillingEventKind::PaymentFailed {
                    customer_reference: invoice.reference(),
                    payment_id: Some(invoice.id),
                    recurrence_id: invoice.subscription,
                    amount_cents: invoice.amount_due,
                    reason: invoice.failure_reason,
                }
            }

            "customer.subscription.deleted" => {
                let subscription: CardSubscription = decode(object, "subscription")?;
                BillingEventKind::RecurrenceCanceled {
                    customer_reference: subscription.metadata.get(SUBSCRIPTION_METADATA_KEY).cloned(),
                    reason: subscription
                        .cancellation_details
                        .and_then(|d| d.reason)
                        .unwrap_or_else(|| "subscription_deleted".to_string()),
                    recurrence_id: subscription.id,
                }
            }

            "charge.refunded" => {
                let charge: CardCharge = decode(object, "charge")?;
                BillingEventKind::PaymentRefunded {
                    payment_id: charge.invoice.unwrap_or(charge.id),
                }
            }

            "checkout.session.completed" => {
                let session: CheckoutSession = decode(object, "checkout session")?;
                let customer_reference = session.reference();
                let recurrence_id = session
                    .subscription
                    .ok_or(WebhookError::MissingField("subscription"))?;
                BillingEventKind::RecurrenceApproved {
                    recurrence_id,
                    customer_reference,
                }
            }

            other => BillingEventKind::Unrecognized {
                provider_type: other.to_string(),
            },
        };
        Ok(kind)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    object: serde_json::Value,
    what: &str,
) -> Result<T, WebhookError> {
    serde_json::from_value(object).map_err(|e| {
        tracing::warn!(error = %e, object = what, "Invalid card webhook object");
        WebhookError::ParseError(format!("invalid {}: {}", what, e))
    })
}

#[async_trait]
impl PaymentGateway for CardAdapter {
    fn gateway(&self) -> Gateway {
        Gateway::Card
    }

    async fn create_recurring_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        let body = self.build_session(request)?;

        let session: CheckoutSession = self
            .http
            .send_json(Method::POST, "/v1/checkout/sessions", Some(&body))
            .await
            .map_err(|e| {
                tracing::error!(
                    subscription_id = %request.subscription_id,
                    error = %e,
                    "Card checkout session creation failed"
                );
                e
            })?;

        tracing::info!(
            subscription_id = %request.subscription_id,
            session_id = %session.id,
            "Card checkout session created"
        );

        let status = session.charge_status();
        let authorization = match session.url {
            Some(url) => AuthorizationArtifact::CheckoutUrl { url },
            None => AuthorizationArtifact::None,
        };

        Ok(Charge {
            charge_id: session.id,
            recurrence_id: session.subscription,
            status,
            authorization,
        })
    }

    async fn get_charge_status(&self, charge_id: &str) -> Result<ChargeStatus, GatewayError> {
        if charge_id.is_empty() {
            return Err(GatewayError::validation("checkout session id is required"));
        }
        let session: CheckoutSession = self
            .http
            .send_json(
                Method::GET,
                &format!("/v1/checkout/sessions/{}", charge_id),
                None::<&()>,
            )
            .await?;
        Ok(session.charge_status())
    }

    async fn cancel_recurrence(&self, recurrence_id: &str) -> Result<(), GatewayError> {
        if recurrence_id.is_empty() {
            return Err(GatewayError::validation("subscription id is required"));
        }
        self.http
            .send_empty(
                Method::DELETE,
                &format!("/v1/subscriptions/{}", recurrence_id),
                None::<&()>,
            )
            .await?;

        tracing::info!(recurrence_id, "Card subscription canceled");
        Ok(())
    }

    fn signature_header(&self) -> &'static str {
        CARD_SIGNATURE_HEADER
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: Timestamp,
    ) -> Result<(), WebhookError> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        let header = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(WebhookError::MissingSignature)?;

        verifier.verify(payload, header, now).map_err(|e| {
            tracing::warn!(error = %e, "Card webhook signature rejected");
            e
        })
    }

    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError> {
        let event: CardWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse card webhook payload");
            WebhookError::ParseError(format!("Invalid JSON: {}", e))
        })?;

        if event.id.is_empty() {
            return Err(WebhookError::MissingField("id"));
        }

        let kind = Self::event_kind(&event)?;
        Ok(vec![NormalizedEvent {
            gateway: Gateway::Card,
            occurred_at: event.created.and_then(Timestamp::from_unix_secs),
            event_id: event.id,
            kind,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::credentials::CredentialCache;
    use crate::domain::billing::BillingInterval;
    use crate::domain::foundation::SubscriptionId;
    use crate::ports::{
        AccessToken, CredentialError, GatewayCredential, IssuedToken, Payer, TokenSource,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct StaticTokenSource;

    #[async_trait]
    impl TokenSource for StaticTokenSource {
        async fn fetch_token(&self, _: &GatewayCredential) -> Result<IssuedToken, CredentialError> {
            Ok(IssuedToken {
                access_token: AccessToken::new("card_tok"),
                expires_in: Duration::from_secs(3600),
            })
        }
    }

    const SECRET: &str = "whsec_card_secret";

    fn adapter(url: &str) -> CardAdapter {
        let cache = CredentialCache::new().with_credential(
            GatewayCredential::new(Gateway::Card, "id", SecretString::new("secret".into())),
            Arc::new(StaticTokenSource),
        );
        let http =
            GatewayHttpClient::new(reqwest::Client::new(), url, Arc::new(cache), Gateway::Card);
        CardAdapter::new(
            http,
            CardSettings::new("https://app.example/ok", "https://app.example/cancel")
                .with_webhook_secret(SecretString::new(SECRET.into())),
        )
    }

    fn charge_request(price: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            subscription_id: SubscriptionId::new(),
            amount_cents: 19900,
            interval: BillingInterval::Monthly,
            description: "Plano mensal".into(),
            payer: Payer {
                name: "Bruno".into(),
                tax_id: None,
                email: Some("bruno@example.com".into()),
            },
            price_reference: price.map(String::from),
            start_date: Timestamp::now(),
            end_date: None,
        }
    }

    fn sign(body: &str) -> String {
        TimestampedSignatureVerifier::new(SecretString::new(SECRET.into()))
            .sign(body.as_bytes(), Timestamp::now().as_unix_secs())
            .unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Checkout
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn price_reference_is_required() {
        let adapter = adapter("http://localhost");
        assert!(matches!(
            adapter.build_session(&charge_request(None)),
            Err(GatewayError::Validation { .. })
        ));
        assert!(adapter.build_session(&charge_request(Some("  "))).is_err());
    }

    #[tokio::test]
    async fn create_returns_checkout_url() {
        let mut server = mockito::Server::new_async().await;
        let request = charge_request(Some("price_monthly"));
        let mock = server
            .mock("POST", "/v1/checkout/sessions")
            .match_header("authorization", "Bearer card_tok")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "mode": "subscription",
                "price": "price_monthly",
                "customer_reference": request.subscription_id.to_string(),
                "metadata": {"subscription_id": request.subscription_id.to_string()}
            })))
            .with_status(200)
            .with_body(r#"{"id":"cs_123","url":"https://pay.example/cs_123","status":"open"}"#)
            .create_async()
            .await;

        let charge = adapter(&server.url()).create_recurring_charge(&request).await.unwrap();

        assert_eq!(charge.charge_id, "cs_123");
        assert_eq!(charge.status, ChargeStatus::AwaitingAuthorization);
        assert_eq!(
            charge.authorization,
            AuthorizationArtifact::CheckoutUrl {
                url: "https://pay.example/cs_123".into()
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancel_deletes_provider_subscription() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/v1/subscriptions/sub_9")
            .with_status(200)
            .with_body(r#"{"id":"sub_9","status":"canceled"}"#)
            .expect(1)
            .create_async()
            .await;

        adapter(&server.url()).cancel_recurrence("sub_9").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/checkout/sessions/cs_1")
            .with_status(503)
            .with_body(r#"{"code":"unavailable","message":"try later","status":503}"#)
            .create_async()
            .await;

        let err = adapter(&server.url()).get_charge_status("cs_1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    // ══════════════════════════════════════════════════════════════
    // Webhooks
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn verifies_timestamped_signature() {
        let adapter = adapter("http://localhost");
        let body = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let now = Timestamp::now();

        assert!(adapter
            .verify_webhook_signature(body.as_bytes(), Some(&sign(body)), now)
            .is_ok());
        assert!(matches!(
            adapter.verify_webhook_signature(body.as_bytes(), None, now),
            Err(WebhookError::MissingSignature)
        ));
        assert!(adapter
            .verify_webhook_signature(b"{}", Some(&sign(body)), now)
            .is_err());
    }

    #[test]
    fn hostile_signature_headers_are_unauthorized_not_panics() {
        let adapter = adapter("http://localhost");
        let now = Timestamp::now();
        let oversized = format!("t={},v1={}", now.as_unix_secs(), "ab".repeat(2048));

        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
            "garbage",
            oversized.as_str(),
        ] {
            let err = adapter
                .verify_webhook_signature(b"{}", Some(header), now)
                .unwrap_err();
            assert_eq!(
                err.status_code(),
                axum::http::StatusCode::UNAUTHORIZED,
                "{}",
                &header[..header.len().min(40)]
            );
        }
    }

    #[test]
    fn invoice_paid_becomes_confirmed_payment_with_period() {
        let body = r#"{
            "id": "evt_1", "type": "invoice.paid", "created": 1709287200,
            "data": {"object": {
                "id": "in_1", "subscription": "sub_1", "amount_paid": 19900,
                "period_start": 1709287200, "period_end": 1711965600,
                "metadata": {"subscription_id": "ref"}
            }}
        }"#;
        let events = adapter("http://localhost").parse_webhook_payload(body.as_bytes()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "evt_1");
        match &events[0].kind {
            BillingEventKind::PaymentConfirmed(payment) => {
                assert_eq!(payment.payment_id, "in_1");
                assert_eq!(payment.recurrence_id.as_deref(), Some("sub_1"));
                assert_eq!(payment.customer_reference.as_deref(), Some("ref"));
                assert_eq!(payment.period_end.map(|t| t.as_unix_secs()), Some(1711965600));
                assert_eq!(payment.paid_at.map(|t| t.as_unix_secs()), Some(1709287200));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn lifecycle_events_are_normalized() {
        let adapter = adapter("http://localhost");

        let failed = adapter
            .parse_webhook_payload(
                br#"{"id":"evt_2","type":"invoice.payment_failed","data":{"object":{"id":"in_2","subscription":"sub_1","amount_due":19900,"failure_reason":"card_declined"}}}"#,
            )
            .unwrap();
        assert!(matches!(
            failed[0].kind,
            BillingEventKind::PaymentFailed { ref reason, .. } if reason.as_deref() == Some("card_declined")
        ));

        let deleted = adapter
            .parse_webhook_payload(
                br#"{"id":"evt_3","type":"customer.subscription.deleted","data":{"object":{"id":"sub_1"}}}"#,
            )
            .unwrap();
        assert!(matches!(
            deleted[0].kind,
            BillingEventKind::RecurrenceCanceled { ref recurrence_id, .. } if recurrence_id == "sub_1"
        ));

        let refunded = adapter
            .parse_webhook_payload(
                br#"{"id":"evt_4","type":"charge.refunded","data":{"object":{"id":"ch_1","invoice":"in_1"}}}"#,
            )
            .unwrap();
        assert!(matches!(
            refunded[0].kind,
            BillingEventKind::PaymentRefunded { ref payment_id } if payment_id == "in_1"
        ));

        let completed = adapter
            .parse_webhook_payload(
                br#"{"id":"evt_5","type":"checkout.session.completed","data":{"object":{"id":"cs_1","status":"complete","subscription":"sub_1","metadata":{"subscription_id":"ref"}}}}"#,
            )
            .unwrap();
        assert!(matches!(
            completed[0].kind,
            BillingEventKind::RecurrenceApproved { ref customer_reference, .. } if customer_reference.as_deref() == Some("ref")
        ));
    }

    #[test]
    fn unknown_event_types_are_unrecognized() {
        let events = adapter("http://localhost")
            .parse_webhook_payload(
                br#"{"id":"evt_6","type":"customer.updated","data":{"object":{"id":"cus_1"}}}"#,
            )
            .unwrap();
        assert!(matches!(
            events[0].kind,
            BillingEventKind::Unrecognized { ref provider_type } if provider_type == "customer.updated"
        ));
    }

    #[test]
    fn malformed_objects_are_parse_errors() {
        let adapter = adapter("http://localhost");
        assert!(matches!(
            adapter.parse_webhook_payload(br#"{"id":"evt_7","type":"invoice.paid","data":{"object":{"amount_paid":1}}}"#),
            Err(WebhookError::ParseError(_))
        ));
        assert!(matches!(
            adapter.parse_webhook_payload(br#"{"id":"evt_8","type":"checkout.session.completed","data":{"object":{"id":"cs_1","status":"complete"}}}"#),
            Err(WebhookError::MissingField("subscription"))
        ));
    }
}
