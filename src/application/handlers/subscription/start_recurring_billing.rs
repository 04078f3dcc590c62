//! StartRecurringBillingHandler - Command handler for opening a gateway recurrence.
//!
//! Creates the PIX recurrence or card checkout that will bill a subscription
//! and attaches the returned recurrence id. The subscription id travels as the
//! customer reference so webhooks can find the subscription before the
//! recurrence id is known.

use std::sync::Arc;

use tracing::info;

use crate::application::locks::SubscriptionLocks;
use crate::application::GatewayRegistry;
use crate::domain::billing::{Gateway, Subscription};
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::ports::{Charge, ChargeRequest, Payer, SubscriptionRepository};

/// Command to start recurring billing for a subscription.
#[derive(Debug, Clone)]
pub struct StartRecurringBillingCommand {
    pub subscription_id: SubscriptionId,
    pub gateway: Gateway,
    pub amount_cents: i64,
    pub description: String,
    pub payer: Payer,
    /// Catalog price id; required by the card gateway.
    pub price_reference: Option<String>,
    pub end_date: Option<Timestamp>,
}

/// Result of an opened recurrence.
#[derive(Debug, Clone)]
pub struct StartRecurringBillingResult {
    pub subscription: Subscription,
    /// Gateway charge with the artifact the payer must act on.
    pub charge: Charge,
}

pub struct StartRecurringBillingHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateways: GatewayRegistry,
    locks: Arc<SubscriptionLocks>,
}

impl StartRecurringBillingHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateways: GatewayRegistry,
        locks: Arc<SubscriptionLocks>,
    ) -> Self {
        Self {
            subscriptions,
            gateways,
            locks,
        }
    }

    pub async fn handle(
        &self,
        cmd: StartRecurringBillingCommand,
        now: Timestamp,
    ) -> Result<StartRecurringBillingResult, DomainError> {
        let gateway = self.gateways.get(cmd.gateway).ok_or_else(|| {
            DomainError::validation("gateway", format!("Gateway {} is not configured", cmd.gateway))
        })?;

        let _guard = self.locks.acquire(cmd.subscription_id).await;

        // 1. Load and check the one-recurrence rule
        let mut subscription = self
            .subscriptions
            .find_by_id(cmd.subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription {} not found", cmd.subscription_id),
                )
            })?;

        if subscription.is_terminal() {
            return Err(DomainError::new(
                ErrorCode::SubscriptionTerminal,
                format!("Subscription is {}", subscription.status),
            ));
        }
        if let Some(current) = subscription.recurrence() {
            return Err(DomainError::new(
                ErrorCode::RecurrenceAlreadyActive,
                format!(
                    "Recurrence {} on {} is already active",
                    current.recurrence_id, current.gateway
                ),
            ));
        }

        // 2. Billing starts when the current (trial or paid) period ends
        let start_date = if subscription.current_period_end.is_after(&now) {
            subscription.current_period_end
        } else {
            now
        };
        let request = ChargeRequest {
            subscription_id: subscription.id,
            amount_cents: cmd.amount_cents,
            interval: subscription.billing_interval,
            description: cmd.description,
            payer: cmd.payer,
            price_reference: cmd.price_reference,
            start_date,
            end_date: cmd.end_date,
        };

        // 3. Create on the gateway
        let charge = gateway.create_recurring_charge(&request).await?;

        // 4. Attach the recurrence when the gateway already issued one
        if let Some(recurrence_id) = &charge.recurrence_id {
            if subscription.attach_recurrence(cmd.gateway, recurrence_id, now)? {
                self.subscriptions.update(&subscription).await?;
            }
        }

        info!(
            subscription_id = %subscription.id,
            gateway = %cmd.gateway,
            charge_id = %charge.charge_id,
            status = ?charge.status,
            "Recurring billing requested"
        );

        Ok(StartRecurringBillingResult {
            subscription,
            charge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::application::test_support::StubGateway;
    use crate::domain::billing::BillingInterval;
    use crate::domain::foundation::{OwnerId, PlanId};

    fn now() -> Timestamp {
        Timestamp::parse_rfc3339("2024-04-01T09:00:00Z").unwrap()
    }

    struct Fixture {
        gateway: Arc<StubGateway>,
        subscriptions: Arc<InMemorySubscriptionRepository>,
        handler: StartRecurringBillingHandler,
    }

    fn fixture(gateway: StubGateway) -> Fixture {
        let gateway = Arc::new(gateway);
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let handler = StartRecurringBillingHandler::new(
            subscriptions.clone(),
            GatewayRegistry::new().with_gateway(gateway.clone()),
            Arc::new(SubscriptionLocks::new()),
        );
        Fixture {
            gateway,
            subscriptions,
            handler,
        }
    }

    async fn trial(fx: &Fixture) -> Subscription {
        let (sub, _) = Subscription::start_trial(
            OwnerId::new(),
            PlanId::new(),
            BillingInterval::Monthly,
            7,
            now(),
        );
        fx.subscriptions.save(&sub).await.unwrap();
        sub
    }

    fn command(subscription_id: SubscriptionId) -> StartRecurringBillingCommand {
        StartRecurringBillingCommand {
            subscription_id,
            gateway: Gateway::Pix,
            amount_cents: 14990,
            description: "Plano mensal".to_string(),
            payer: Payer {
                name: "Academia Fit".to_string(),
                tax_id: Some("12345678909".to_string()),
                email: None,
            },
            price_reference: None,
            end_date: None,
        }
    }

    #[tokio::test]
    async fn creates_charge_after_trial_and_attaches_recurrence() {
        let fx = fixture(StubGateway::new(Gateway::Pix));
        let sub = trial(&fx).await;

        let result = fx.handler.handle(command(sub.id), now()).await.unwrap();

        let charges = fx.gateway.charges();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].start_date, now().add_days(7));
        assert_eq!(charges[0].subscription_id, sub.id);

        assert_eq!(result.charge.recurrence_id.as_deref(), Some("rec-1"));
        let stored = fx.subscriptions.find_by_id(sub.id).await.unwrap().unwrap();
        assert_eq!(stored.gateway, Gateway::Pix);
        assert_eq!(stored.gateway_recurrence_id.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn second_recurrence_is_rejected_without_calling_gateway() {
        let fx = fixture(StubGateway::new(Gateway::Pix));
        let sub = trial(&fx).await;
        fx.handler.handle(command(sub.id), now()).await.unwrap();

        let err = fx.handler.handle(command(sub.id), now()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::RecurrenceAlreadyActive);
        assert_eq!(fx.gateway.charges().len(), 1);
    }

    #[tokio::test]
    async fn terminal_subscription_is_rejected() {
        let fx = fixture(StubGateway::new(Gateway::Pix));
        let mut sub = trial(&fx).await;
        sub.cancel("requested", now()).unwrap();
        fx.subscriptions.update(&sub).await.unwrap();

        let err = fx.handler.handle(command(sub.id), now()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionTerminal);
    }

    #[tokio::test]
    async fn unconfigured_gateway_and_gateway_failure_surface() {
        let fx = fixture(StubGateway::new(Gateway::Pix).failing_create());
        let sub = trial(&fx).await;

        let mut card = command(sub.id);
        card.gateway = Gateway::Card;
        let err = fx.handler.handle(card, now()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);

        let err = fx.handler.handle(command(sub.id), now()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::GatewayError);
        let stored = fx.subscriptions.find_by_id(sub.id).await.unwrap().unwrap();
        assert!(stored.gateway_recurrence_id.is_none());
    }
}
