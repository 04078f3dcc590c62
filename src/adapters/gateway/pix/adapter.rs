//! PIX Automático gateway adapter.
//!
//! Recurrences are created with `POST /v2/rec`; the payer authorizes them in
//! their banking app through the returned copy-and-paste code. The contract
//! field carries our subscription id so webhooks can be traced back.
//!
//! # Security
//!
//! Webhooks are signed with a hex HMAC-SHA256 of the raw body in
//! `X-Signature`. When no webhook secret is configured signatures are not
//! checked, which is only accepted outside production.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::billing::{
    BillingEventKind, ConfirmedPayment, Gateway, HmacSignatureVerifier, NormalizedEvent,
    WebhookError,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    AuthorizationArtifact, Charge, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway,
};

use crate::adapters::gateway::GatewayHttpClient;

use super::wire::{
    format_amount, parse_amount_cents, CreateRecurrence, Devedor, Devolucao, PixReceived,
    PixWebhookPayload, Recurrence, RecurrenceList, RecurrenceNotice, RecurrencePayments,
    RecurrenceStatus, RefundRequest, RegisterWebhook, UpdateRecurrence, WebhookRegistration,
    WebhookRegistrations,
};

/// Header carrying the body HMAC.
pub const PIX_SIGNATURE_HEADER: &str = "x-signature";

/// Latest day of month a recurrence may be due on.
const MAX_DUE_DAY: u32 = 28;

/// Longest refund id the provider accepts.
const MAX_REFUND_ID_LEN: usize = 35;

/// Rejects values that would escape their path segment.
fn path_segment<'a>(value: &'a str, what: &str) -> Result<&'a str, GatewayError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::validation(format!("{} is required", what)));
    }
    if value.contains(['/', '?', '#']) || value.chars().any(char::is_whitespace) {
        return Err(GatewayError::validation(format!("{} is not a valid path segment", what)));
    }
    Ok(value)
}

fn api_datetime(at: Timestamp) -> String {
    at.as_datetime().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Why waiting for payer approval ended without an active recurrence.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Recurrence {recurrence_id} ended as {status:?}")]
    NotApproved {
        recurrence_id: String,
        status: ChargeStatus,
    },

    #[error("Timed out waiting for approval of {0}")]
    TimedOut(String),

    #[error("Shutdown while waiting for approval")]
    Shutdown,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// PIX Automático adapter.
pub struct PixAdapter {
    http: GatewayHttpClient,
    verifier: Option<HmacSignatureVerifier>,
}

impl PixAdapter {
    pub fn new(http: GatewayHttpClient, webhook_secret: Option<SecretString>) -> Self {
        Self {
            http,
            verifier: webhook_secret.map(HmacSignatureVerifier::new),
        }
    }

    fn build_request(request: &ChargeRequest) -> Result<CreateRecurrence, GatewayError> {
        if request.amount_cents <= 0 {
            return Err(GatewayError::validation("amount must be positive"));
        }
        if request.payer.name.trim().is_empty() {
            return Err(GatewayError::validation("payer name is required"));
        }

        let tax_id = request
            .payer
            .tax_id
            .as_deref()
            .map(|raw| raw.chars().filter(char::is_ascii_digit).collect::<String>())
            .filter(|digits| !digits.is_empty())
            .ok_or_else(|| GatewayError::validation("payer tax id (CPF or CNPJ) is required"))?;

        let (cpf, cnpj) = match tax_id.len() {
            11 => (Some(tax_id), None),
            14 => (None, Some(tax_id)),
            n => {
                return Err(GatewayError::validation(format!(
                    "tax id must have 11 (CPF) or 14 (CNPJ) digits, got {}",
                    n
                )))
            }
        };

        let start = request.start_date.as_datetime();
        Ok(CreateRecurrence {
            contrato: request.subscription_id.as_uuid().simple().to_string(),
            devedor: Devedor {
                nome: request.payer.name.clone(),
                cpf,
                cnpj,
                email: request.payer.email.clone(),
            },
            objeto: request.description.clone(),
            data_inicial: request.start_date.date_string(),
            data_final: request.end_date.map(|d| d.date_string()),
            periodicidade: request.interval.pix_periodicity(),
            valor_rec: format_amount(request.amount_cents),
            descricao: Some(request.description.clone()),
            dia_vencimento: chrono::Datelike::day(start).min(MAX_DUE_DAY),
        })
    }

    /// Polls the recurrence until the payer approves it.
    ///
    /// Returns once the status is `Active`. Ends early with an error when
    /// the recurrence reaches a final status, `timeout` elapses, or
    /// `shutdown` flips to true.
    pub async fn wait_for_approval(
        &self,
        recurrence_id: &str,
        poll_interval: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ApprovalError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let status = self.get_charge_status(recurrence_id).await?;
            if status == ChargeStatus::Active {
                tracing::info!(recurrence_id, "PIX recurrence approved");
                return Ok(());
            }
            if status.is_final() {
                return Err(ApprovalError::NotApproved {
                    recurrence_id: recurrence_id.to_string(),
                    status,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ApprovalError::TimedOut(recurrence_id.to_string()));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(ApprovalError::Shutdown);
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Points the provider's notifications for `pix_key` at `webhook_url`.
    pub async fn register_webhook(&self, pix_key: &str, webhook_url: &str) -> Result<(), GatewayError> {
        let pix_key = path_segment(pix_key, "pix key")?;
        if !webhook_url.starts_with("https://") {
            return Err(GatewayError::validation("webhook url must use https"));
        }
        let body = RegisterWebhook {
            webhook_url: webhook_url.to_string(),
        };
        self.http
            .send_empty(Method::PUT, &format!("/v2/webhook/{}", pix_key), Some(&body))
            .await?;

        tracing::info!(pix_key, webhook_url, "PIX webhook registered");
        Ok(())
    }

    /// The webhook registered for `pix_key`, if any.
    pub async fn webhook(&self, pix_key: &str) -> Result<Option<WebhookRegistration>, GatewayError> {
        let pix_key = path_segment(pix_key, "pix key")?;
        match self
            .http
            .send_json(Method::GET, &format!("/v2/webhook/{}", pix_key), None::<&()>)
            .await
        {
            Ok(registration) => Ok(Some(registration)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn webhooks(&self) -> Result<Vec<WebhookRegistration>, GatewayError> {
        let list: WebhookRegistrations = self
            .http
            .send_json(Method::GET, "/v2/webhook", None::<&()>)
            .await?;
        Ok(list.webhooks)
    }

    /// Removes the webhook for `pix_key`. A key without one is left as is.
    pub async fn delete_webhook(&self, pix_key: &str) -> Result<(), GatewayError> {
        let pix_key = path_segment(pix_key, "pix key")?;
        match self
            .http
            .send_empty(Method::DELETE, &format!("/v2/webhook/{}", pix_key), None::<&()>)
            .await
        {
            Ok(()) => {
                tracing::info!(pix_key, "PIX webhook removed");
                Ok(())
            }
            Err(GatewayError::NotFound(_)) => {
                tracing::debug!(pix_key, "No PIX webhook to remove");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Recurrences created between `start` and `end`.
    pub async fn list_recurrences(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<RecurrenceList, GatewayError> {
        if end.is_before(&start) {
            return Err(GatewayError::validation("end must not be before start"));
        }
        let path = format!(
            "/v2/rec?inicio={}&fim={}",
            api_datetime(start),
            api_datetime(end)
        );
        self.http.send_json(Method::GET, &path, None::<&()>).await
    }

    /// Returns `amount_cents` of a received PIX to its payer.
    ///
    /// `refund_id` is ours and makes the request idempotent: repeating it
    /// with the same id does not refund twice.
    pub async fn refund(
        &self,
        end_to_end_id: &str,
        refund_id: &str,
        amount_cents: i64,
    ) -> Result<Devolucao, GatewayError> {
        let end_to_end_id = path_segment(end_to_end_id, "end-to-end id")?;
        if refund_id.is_empty()
            || refund_id.len() > MAX_REFUND_ID_LEN
            || !refund_id.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(GatewayError::validation(format!(
                "refund id must be 1 to {} letters or digits",
                MAX_REFUND_ID_LEN
            )));
        }
        if amount_cents <= 0 {
            return Err(GatewayError::validation("refund amount must be positive"));
        }

        let body = RefundRequest {
            valor: format_amount(amount_cents),
        };
        let refund: Devolucao = self
            .http
            .send_json(
                Method::PUT,
                &format!("/v2/pix/{}/devolucao/{}", end_to_end_id, refund_id),
                Some(&body),
            )
            .await?;

        tracing::info!(
            end_to_end_id,
            refund_id,
            status = refund.status.as_deref().unwrap_or("unknown"),
            "PIX refund requested"
        );
        Ok(refund)
    }

    /// Confirmed-payment event for a received transfer, keyed by end-to-end id.
    fn payment_event(pix: &PixReceived) -> Result<NormalizedEvent, String> {
        let amount_cents = parse_amount_cents(&pix.valor)
            .ok_or_else(|| format!("invalid valor '{}'", pix.valor))?;
        let paid_at = pix.horario.as_deref().and_then(Timestamp::parse_rfc3339);

        Ok(NormalizedEvent {
            gateway: Gateway::Pix,
            event_id: pix.end_to_end_id.clone(),
            kind: BillingEventKind::PaymentConfirmed(ConfirmedPayment {
                payment_id: pix.end_to_end_id.clone(),
                recurrence_id: pix.id_rec.clone(),
                customer_reference: None,
                amount_cents,
                paid_at,
                period_start: None,
                period_end: None,
            }),
            occurred_at: paid_at,
        })
    }

    fn recurrence_event(notice: RecurrenceNotice) -> NormalizedEvent {
        let event_id = format!("rec:{}:{}", notice.id_rec, notice.status.as_str());
        let occurred_at = notice.timestamp.as_deref().and_then(Timestamp::parse_rfc3339);

        let kind = match notice.status {
            RecurrenceStatus::Approved => BillingEventKind::RecurrenceApproved {
                recurrence_id: notice.id_rec,
                customer_reference: notice.contrato,
            },
            RecurrenceStatus::Rejected | RecurrenceStatus::Canceled | RecurrenceStatus::Expired => {
                BillingEventKind::RecurrenceCanceled {
                    reason: notice
                        .motivo
                        .unwrap_or_else(|| notice.status.as_str().to_lowercase()),
                    recurrence_id: notice.id_rec,
                    customer_reference: notice.contrato,
                }
            }
            RecurrenceStatus::Created => BillingEventKind::Unrecognized {
                provider_type: format!("rec.{}", notice.status.as_str()),
            },
        };

        NormalizedEvent {
            gateway: Gateway::Pix,
            event_id,
            kind,
            occurred_at,
        }
    }
}

#[async_trait]
impl PaymentGateway for PixAdapter {
    fn gateway(&self) -> Gateway {
        Gateway::Pix
    }

    async fn create_recurring_charge(&self, request: &ChargeRequest) -> Result<Charge, GatewayError> {
        let body = Self::build_request(request)?;

        let recurrence: Recurrence = self
            .http
            .send_json(Method::POST, "/v2/rec", Some(&body))
            .await
            .map_err(|e| {
                tracing::error!(
                    subscription_id = %request.subscription_id,
                    error = %e,
                    "PIX recurrence creation failed"
                );
                e
            })?;

        tracing::info!(
            subscription_id = %request.subscription_id,
            recurrence_id = %recurrence.id_rec,
            "PIX recurrence created"
        );

        let authorization = match recurrence.pix_copia_e_cola {
            Some(copy_paste) => AuthorizationArtifact::PixQrCode {
                copy_paste,
                location: recurrence.location,
            },
            None => AuthorizationArtifact::None,
        };

        Ok(Charge {
            charge_id: recurrence.id_rec.clone(),
            recurrence_id: Some(recurrence.id_rec),
            status: recurrence.status.into(),
            authorization,
        })
    }

    async fn get_charge_status(&self, charge_id: &str) -> Result<ChargeStatus, GatewayError> {
        if charge_id.is_empty() {
            return Err(GatewayError::validation("recurrence id is required"));
        }
        let recurrence: Recurrence = self
            .http
            .send_json(Method::GET, &format!("/v2/rec/{}", charge_id), None::<&()>)
            .await?;
        Ok(recurrence.status.into())
    }

    async fn cancel_recurrence(&self, recurrence_id: &str) -> Result<(), GatewayError> {
        if recurrence_id.is_empty() {
            return Err(GatewayError::validation("recurrence id is required"));
        }
        let body = UpdateRecurrence {
            status: RecurrenceStatus::Canceled,
        };
        self.http
            .send_empty(Method::PATCH, &format!("/v2/rec/{}", recurrence_id), Some(&body))
            .await?;

        tracing::info!(recurrence_id, "PIX recurrence canceled");
        Ok(())
    }

    async fn recurrence_payments(
        &self,
        recurrence_id: &str,
    ) -> Result<Vec<NormalizedEvent>, GatewayError> {
        let recurrence_id = path_segment(recurrence_id, "recurrence id")?;
        let payments: RecurrencePayments = self
            .http
            .send_json(Method::GET, &format!("/v2/rec/{}/pix", recurrence_id), None::<&()>)
            .await?;

        payments
            .pix
            .into_iter()
            .map(|mut pix| {
                pix.id_rec.get_or_insert_with(|| recurrence_id.to_string());
                Self::payment_event(&pix).map_err(GatewayError::InvalidResponse)
            })
            .collect()
    }

    fn signature_header(&self) -> &'static str {
        PIX_SIGNATURE_HEADER
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        _now: Timestamp,
    ) -> Result<(), WebhookError> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        verifier.verify(payload, signature)
    }

    fn parse_webhook_payload(&self, payload: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError> {
        let body: PixWebhookPayload = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse PIX webhook payload");
            WebhookError::ParseError(e.to_string())
        })?;

        if body.pix.is_empty() && body.rec.is_none() {
            return Err(WebhookError::MissingField("pix"));
        }

        let mut events = Vec::with_capacity(body.pix.len() + 1);
        for pix in body.pix {
            // The payment goes first so its refunds find it in the ledger
            events.push(Self::payment_event(&pix).map_err(WebhookError::ParseError)?);

            for refund in pix.devolucoes.iter().filter(|d| d.is_completed()) {
                events.push(NormalizedEvent {
                    gateway: Gateway::Pix,
                    event_id: format!("devolucao:{}", refund.id),
                    kind: BillingEventKind::PaymentRefunded {
                        payment_id: pix.end_to_end_id.clone(),
                    },
                    occurred_at: None,
                });
            }
        }

        if let Some(notice) = body.rec {
            events.push(Self::recurrence_event(notice));
        }

        Ok(events)
    }
}
