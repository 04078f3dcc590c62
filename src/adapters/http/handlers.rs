//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to application layer command handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Json, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::error;
use uuid::Uuid;

use crate::application::handlers::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CreateTrialCommand, CreateTrialHandler,
    IngestWebhookCommand, StartRecurringBillingCommand, StartRecurringBillingHandler,
    WebhookIngestor,
};
use crate::application::locks::SubscriptionLocks;
use crate::application::GatewayRegistry;
use crate::domain::billing::WebhookError;
use crate::domain::foundation::{DomainError, ErrorCode, OwnerId, PlanId, SubscriptionId, Timestamp};
use crate::ports::{SubscriptionEventPublisher, SubscriptionRepository};

use super::dto::{
    CancelSubscriptionRequest, CancelSubscriptionResponse, CreateTrialRequest, ErrorResponse,
    HealthResponse, StartBillingRequest, StartBillingResponse, SubscriptionResponse,
    WebhookAckResponse,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned per request; everything behind it is `Arc`-shared.
#[derive(Clone)]
pub struct BillingAppState {
    pub ingestor: Arc<WebhookIngestor>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub gateways: GatewayRegistry,
    pub publisher: Arc<dyn SubscriptionEventPublisher>,
    pub locks: Arc<SubscriptionLocks>,
    /// Largest webhook body read into memory.
    pub max_body_bytes: usize,
}

impl BillingAppState {
    pub fn create_trial_handler(&self) -> CreateTrialHandler {
        CreateTrialHandler::new(self.subscriptions.clone(), self.publisher.clone())
    }

    pub fn start_billing_handler(&self) -> StartRecurringBillingHandler {
        StartRecurringBillingHandler::new(
            self.subscriptions.clone(),
            self.gateways.clone(),
            self.locks.clone(),
        )
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(
            self.subscriptions.clone(),
            self.gateways.clone(),
            self.publisher.clone(),
            self.locks.clone(),
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook and Health
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/:gateway - Receive a gateway webhook delivery
///
/// Answers 200 once the delivery is authenticated and stored, whatever the
/// outcome of processing.
pub async fn receive_webhook(
    State(state): State<BillingAppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, BillingApiError> {
    let limit = state.max_body_bytes;
    let too_large = WebhookError::PayloadTooLarge { limit };

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large.into());
    }

    // Bounded read; an undeclared oversize body fails here.
    let payload = to_bytes(body, limit).await.map_err(|_| too_large)?;

    let cmd = IngestWebhookCommand {
        gateway,
        payload: payload.to_vec(),
        headers: lowercase_headers(&headers),
    };
    state.ingestor.handle(cmd, Timestamp::now()).await?;

    Ok(Json(WebhookAckResponse::ok()))
}

/// GET /health - Liveness check
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "academy-billing",
    })
}

fn lowercase_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

// ════════════════════════════════════════════════════════════════════════════════
// Subscription Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// GET /subscriptions/:id
pub async fn get_subscription(
    State(state): State<BillingAppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BillingApiError> {
    let id = SubscriptionId::from_uuid(id);
    let subscription = state.subscriptions.find_by_id(id).await?.ok_or_else(|| {
        DomainError::new(
            ErrorCode::SubscriptionNotFound,
            format!("Subscription {} not found", id),
        )
    })?;

    Ok(Json(SubscriptionResponse::from(&subscription)))
}

/// POST /subscriptions/trials
pub async fn create_trial(
    State(state): State<BillingAppState>,
    Json(request): Json<CreateTrialRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.create_trial_handler();
    let cmd = CreateTrialCommand {
        owner_id: OwnerId::from_uuid(request.owner_id),
        plan_id: PlanId::from_uuid(request.plan_id),
        interval: request.interval,
        trial_days: request.trial_days,
    };

    let result = handler.handle(cmd, Timestamp::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse::from(&result.subscription)),
    ))
}

/// POST /subscriptions/:id/billing
pub async fn start_billing(
    State(state): State<BillingAppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartBillingRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.start_billing_handler();
    let cmd = StartRecurringBillingCommand {
        subscription_id: SubscriptionId::from_uuid(id),
        gateway: request.gateway,
        amount_cents: request.amount_cents,
        description: request.description,
        payer: request.payer,
        price_reference: request.price_reference,
        end_date: request.end_date,
    };

    let result = handler.handle(cmd, Timestamp::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartBillingResponse {
            subscription: SubscriptionResponse::from(&result.subscription),
            charge: result.charge,
        }),
    ))
}

/// POST /subscriptions/:id/cancel
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.cancel_subscription_handler();
    let cmd = CancelSubscriptionCommand {
        subscription_id: SubscriptionId::from_uuid(id),
        at_period_end: request.at_period_end,
        reason: request.reason,
    };

    let result = handler.handle(cmd, Timestamp::now()).await?;

    Ok(Json(CancelSubscriptionResponse {
        subscription: SubscriptionResponse::from(&result.subscription),
        effective_at: result.effective_at,
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts application errors to HTTP responses.
#[derive(Debug)]
pub enum BillingApiError {
    Webhook(WebhookError),
    Domain(DomainError),
}

impl From<WebhookError> for BillingApiError {
    fn from(err: WebhookError) -> Self {
        Self::Webhook(err)
    }
}

impl From<DomainError> for BillingApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

fn webhook_error_code(err: &WebhookError) -> &'static str {
    match err {
        WebhookError::UnknownGateway(_) => "UNKNOWN_GATEWAY",
        WebhookError::MissingSignature => "MISSING_SIGNATURE",
        WebhookError::InvalidSignature => "INVALID_SIGNATURE",
        WebhookError::TimestampOutOfRange => "TIMESTAMP_OUT_OF_RANGE",
        WebhookError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        WebhookError::ParseError(_) => "PARSE_ERROR",
        WebhookError::MissingField(_) => "MISSING_FIELD",
        WebhookError::Storage(_) => "STORAGE_ERROR",
        WebhookError::Configuration(_) => "CONFIGURATION_ERROR",
    }
}

fn domain_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationFailed | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,
        ErrorCode::SubscriptionNotFound
        | ErrorCode::PaymentNotFound
        | ErrorCode::WebhookEventNotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidStateTransition
        | ErrorCode::SubscriptionTerminal
        | ErrorCode::RecurrenceAlreadyActive
        | ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::GatewayError => StatusCode::BAD_GATEWAY,
        ErrorCode::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::DatabaseError | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            BillingApiError::Webhook(err) => {
                let status = err.status_code();
                let code = webhook_error_code(&err);
                let body = match &err {
                    WebhookError::PayloadTooLarge { limit } => ErrorResponse::with_details(
                        code,
                        err.to_string(),
                        serde_json::json!({ "limit": limit }),
                    ),
                    WebhookError::Storage(_) | WebhookError::Configuration(_) => {
                        error!(error = %err, "Webhook delivery could not be stored");
                        ErrorResponse::new(code, "Webhook could not be accepted")
                    }
                    _ => ErrorResponse::new(code, err.to_string()),
                };
                (status, body)
            }
            BillingApiError::Domain(err) => {
                let status = domain_status(err.code);
                let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %err, "Request failed");
                    ErrorResponse::new(err.code.to_string(), "Internal error")
                } else if err.details.is_empty() {
                    ErrorResponse::new(err.code.to_string(), err.message)
                } else {
                    ErrorResponse::with_details(
                        err.code.to_string(),
                        err.message,
                        serde_json::json!(err.details),
                    )
                };
                (status, body)
            }
        };

        (status, Json(body)).into_response()
    }
}
