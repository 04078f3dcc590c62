//! PIX Automático API objects as they appear on the wire.
//!
//! Field names follow the provider's Portuguese vocabulary via serde renames.

use serde::{Deserialize, Serialize};

use crate::ports::ChargeStatus;

/// Debtor block of a recurrence request. Exactly one of `cpf`/`cnpj` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Devedor {
    pub nome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnpj: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `POST /v2/rec` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecurrence {
    pub contrato: String,
    pub devedor: Devedor,
    pub objeto: String,
    pub data_inicial: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_final: Option<String>,
    pub periodicidade: &'static str,
    pub valor_rec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descricao: Option<String>,
    pub dia_vencimento: u32,
}

/// `PATCH /v2/rec/{idRec}` body.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRecurrence {
    pub status: RecurrenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceStatus {
    #[serde(rename = "CRIADA")]
    Created,
    #[serde(rename = "APROVADA")]
    Approved,
    #[serde(rename = "REJEITADA")]
    Rejected,
    #[serde(rename = "CANCELADA")]
    Canceled,
    #[serde(rename = "EXPIRADA")]
    Expired,
}

impl RecurrenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceStatus::Created => "CRIADA",
            RecurrenceStatus::Approved => "APROVADA",
            RecurrenceStatus::Rejected => "REJEITADA",
            RecurrenceStatus::Canceled => "CANCELADA",
            RecurrenceStatus::Expired => "EXPIRADA",
        }
    }
}

impl From<RecurrenceStatus> for ChargeStatus {
    fn from(status: RecurrenceStatus) -> Self {
        match status {
            RecurrenceStatus::Created => ChargeStatus::AwaitingAuthorization,
            RecurrenceStatus::Approved => ChargeStatus::Active,
            RecurrenceStatus::Rejected => ChargeStatus::Rejected,
            RecurrenceStatus::Canceled => ChargeStatus::Canceled,
            RecurrenceStatus::Expired => ChargeStatus::Expired,
        }
    }
}

/// Recurrence as returned by create and get.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    pub id_rec: String,
    #[serde(default)]
    pub contrato: Option<String>,
    pub status: RecurrenceStatus,
    #[serde(default)]
    pub pix_copia_e_cola: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// `GET /v2/rec?inicio=..&fim=..` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RecurrenceList {
    #[serde(default)]
    pub recorrencias: Vec<Recurrence>,
    #[serde(default)]
    pub total: u64,
}

/// `GET /v2/rec/{idRec}/pix` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RecurrencePayments {
    #[serde(default)]
    pub pix: Vec<PixReceived>,
}

/// `PUT /v2/pix/{e2eId}/devolucao/{id}` body.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub valor: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhooks
// ════════════════════════════════════════════════════════════════════════════════

/// `PUT /v2/webhook/{chave}` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhook {
    pub webhook_url: String,
}

/// Webhook registered for a PIX key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRegistration {
    pub webhook_url: String,
    #[serde(default)]
    pub chave: Option<String>,
    #[serde(default)]
    pub criacao: Option<String>,
}

/// `GET /v2/webhook` body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRegistrations {
    #[serde(default)]
    pub webhooks: Vec<WebhookRegistration>,
}

/// Webhook delivery body. Either list may be absent.
#[derive(Debug, Clone, Deserialize)]
pub struct PixWebhookPayload {
    #[serde(default)]
    pub pix: Vec<PixReceived>,
    #[serde(default)]
    pub rec: Option<RecurrenceNotice>,
}

/// A received PIX transfer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixReceived {
    pub end_to_end_id: String,
    #[serde(default)]
    pub txid: Option<String>,
    pub valor: String,
    #[serde(default)]
    pub horario: Option<String>,
    #[serde(default)]
    pub id_rec: Option<String>,
    #[serde(default)]
    pub devolucoes: Vec<Devolucao>,
}

/// Refund attached to a received PIX, also returned when one is requested.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Devolucao {
    pub id: String,
    #[serde(default)]
    pub rtr_id: Option<String>,
    #[serde(default)]
    pub valor: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Devolucao {
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("DEVOLVIDO")
    }
}

/// Recurrence status change notice.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceNotice {
    pub id_rec: String,
    pub status: RecurrenceStatus,
    #[serde(default)]
    pub contrato: Option<String>,
    #[serde(default)]
    pub motivo: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Amounts
// ════════════════════════════════════════════════════════════════════════════════

/// Renders cents as the provider's decimal string, e.g. `9990` as `"99.90"`.
pub fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Parses a decimal amount string into cents. At most two decimal places.
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let value = value.trim();
    let (units, fraction) = match value.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (value, ""),
    };
    if units.is_empty() || fraction.len() > 2 {
        return None;
    }
    if !units.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let units: i64 = units.parse().ok()?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    units.checked_mul(100)?.checked_add(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_render_with_two_decimals() {
        assert_eq!(format_amount(9990), "99.90");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(150000), "1500.00");
    }

    #[test]
    fn amounts_parse_from_provider_strings() {
        assert_eq!(parse_amount_cents("99.90"), Some(9990));
        assert_eq!(parse_amount_cents("100"), Some(10000));
        assert_eq!(parse_amount_cents("1.5"), Some(150));
        assert_eq!(parse_amount_cents("1.505"), None);
        assert_eq!(parse_amount_cents("-1.00"), None);
        assert_eq!(parse_amount_cents("abc"), None);
    }

    #[test]
    fn create_body_uses_provider_field_names() {
        let body = CreateRecurrence {
            contrato: "c1".into(),
            devedor: Devedor {
                nome: "Ana".into(),
                cpf: Some("12345678909".into()),
                cnpj: None,
                email: None,
            },
            objeto: "Plano mensal".into(),
            data_inicial: "2024-03-01".into(),
            data_final: None,
            periodicidade: "MENSAL",
            valor_rec: "99.90".into(),
            descricao: None,
            dia_vencimento: 1,
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["dataInicial"], "2024-03-01");
        assert_eq!(json["valorRec"], "99.90");
        assert_eq!(json["diaVencimento"], 1);
        assert_eq!(json["devedor"]["cpf"], "12345678909");
        assert!(json["devedor"].get("cnpj").is_none());
        assert!(json.get("dataFinal").is_none());
    }

    #[test]
    fn recurrence_status_maps_to_charge_status() {
        let rec: Recurrence =
            serde_json::from_str(r#"{"idRec":"RR1","status":"APROVADA"}"#).unwrap();
        assert_eq!(ChargeStatus::from(rec.status), ChargeStatus::Active);
        assert_eq!(
            ChargeStatus::from(RecurrenceStatus::Created),
            ChargeStatus::AwaitingAuthorization
        );
    }
}
