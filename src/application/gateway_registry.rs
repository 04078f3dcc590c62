//! Configured payment gateways, keyed by `Gateway`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::domain::billing::{Gateway, RecurrenceRef, WebhookError};
use crate::ports::{GatewayError, PaymentGateway};

/// The set of gateway adapters this process talks to.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Gateway, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under the gateway it reports.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.gateway(), gateway);
        self
    }

    pub fn get(&self, gateway: Gateway) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&gateway).cloned()
    }

    /// Resolves a webhook route segment such as `pix` or `card`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, WebhookError> {
        name.parse::<Gateway>()
            .ok()
            .and_then(|gateway| self.get(gateway))
            .ok_or_else(|| WebhookError::UnknownGateway(name.to_string()))
    }

    /// Ends a recurrence on its gateway.
    ///
    /// A recurrence the gateway no longer knows counts as ended.
    pub async fn cancel_recurrence(&self, recurrence: &RecurrenceRef) -> Result<(), GatewayError> {
        let gateway = self.get(recurrence.gateway).ok_or_else(|| {
            GatewayError::validation(format!("gateway {} is not configured", recurrence.gateway))
        })?;
        match gateway.cancel_recurrence(&recurrence.recurrence_id).await {
            Err(GatewayError::NotFound(message)) => {
                warn!(
                    gateway = %recurrence.gateway,
                    recurrence_id = %recurrence.recurrence_id,
                    message = %message,
                    "Recurrence already gone on gateway"
                );
                Ok(())
            }
            other => other,
        }
    }

    pub fn configured(&self) -> Vec<Gateway> {
        let mut gateways: Vec<Gateway> = self.gateways.keys().copied().collect();
        gateways.sort_by_key(|g| g.as_str());
        gateways
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::StubGateway;

    #[test]
    fn resolves_registered_gateway_by_route_name() {
        let registry = GatewayRegistry::new().with_gateway(Arc::new(StubGateway::new(Gateway::Card)));

        assert_eq!(registry.resolve("card").unwrap().gateway(), Gateway::Card);
        assert_eq!(registry.configured(), vec![Gateway::Card]);
    }

    #[test]
    fn unknown_or_unconfigured_gateway_is_rejected() {
        let registry = GatewayRegistry::new().with_gateway(Arc::new(StubGateway::new(Gateway::Card)));

        assert!(matches!(
            registry.resolve("pix"),
            Err(WebhookError::UnknownGateway(name)) if name == "pix"
        ));
        assert!(registry.resolve("boleto").is_err());
    }

    #[tokio::test]
    async fn cancel_recurrence_routes_to_the_owning_gateway() {
        let card = Arc::new(StubGateway::new(Gateway::Card));
        let registry = GatewayRegistry::new().with_gateway(card.clone());

        registry
            .cancel_recurrence(&RecurrenceRef {
                gateway: Gateway::Card,
                recurrence_id: "sub_1".to_string(),
            })
            .await
            .unwrap();
        let unconfigured = registry
            .cancel_recurrence(&RecurrenceRef {
                gateway: Gateway::Pix,
                recurrence_id: "rec-1".to_string(),
            })
            .await;

        assert_eq!(card.canceled(), vec!["sub_1".to_string()]);
        assert!(matches!(unconfigured, Err(GatewayError::Validation { .. })));
    }
}
