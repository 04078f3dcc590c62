//! Axum router configuration for billing endpoints.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    cancel_subscription, create_trial, get_subscription, health, receive_webhook, start_billing,
    BillingAppState,
};

/// Create the webhook router.
///
/// Webhooks carry no user authentication; each gateway adapter verifies the
/// delivery's signature.
///
/// # Routes
/// - `POST /:gateway` - Receive a `pix` or `card` delivery
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/:gateway", post(receive_webhook))
}

/// Create the subscription router, for the academy backend.
///
/// # Routes
/// - `POST /trials` - Start a trial
/// - `GET /:id` - Read a subscription
/// - `POST /:id/billing` - Open the gateway recurrence
/// - `POST /:id/cancel` - Cancel now or at period end
pub fn subscription_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/trials", post(create_trial))
        .route("/:id", get(get_subscription))
        .route("/:id/billing", post(start_billing))
        .route("/:id/cancel", post(cancel_subscription))
}

/// Create the complete billing router.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/webhooks", webhook_routes())
        .nest("/subscriptions", subscription_routes())
}

/// The served application: routes, state and middleware.
///
/// Every request gets an `x-request-id` (kept if the caller sent one) that
/// is echoed on the response, a trace span and a timeout.
pub fn app(state: BillingAppState, request_timeout: Duration) -> Router {
    billing_router().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}
