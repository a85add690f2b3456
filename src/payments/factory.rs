use crate::config::{AmountConfig, GatewaysConfig};
use crate::orders::model::PaymentMethod;
use crate::payments::amount::AmountCodec;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayAdapter;
use crate::payments::providers::{MomoAdapter, PaypalAdapter, VnpayAdapter};
use crate::payments::types::Gateway;
use std::collections::HashMap;
use std::sync::Arc;

/// Adapters keyed by gateway, built once at startup.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<Gateway, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.gateway(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn from_config(gateways: &GatewaysConfig, amounts: &AmountConfig) -> PaymentResult<Self> {
        let codec = AmountCodec::from_config(amounts)?;
        let policy = gateways.processing_policy;
        let mut registry = Self::new();

        if let Some(config) = &gateways.vnpay {
            registry.register(Arc::new(VnpayAdapter::new(
                config.clone(),
                codec.clone(),
                policy,
            )));
        }
        if let Some(config) = &gateways.momo {
            registry.register(Arc::new(MomoAdapter::new(
                config.clone(),
                codec.clone(),
                policy,
            )?));
        }
        if let Some(config) = &gateways.paypal {
            registry.register(Arc::new(PaypalAdapter::new(
                config.clone(),
                codec.clone(),
                policy,
            )?));
        }

        Ok(registry)
    }

    pub fn get(&self, gateway: Gateway) -> PaymentResult<Arc<dyn GatewayAdapter>> {
        self.adapters
            .get(&gateway)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("gateway {} is disabled", gateway),
                field: Some("gateway".to_string()),
            })
    }

    /// Resolves the adapter for an order's payment method. `cod` and
    /// `bank_transfer` have none.
    pub fn for_method(&self, method: PaymentMethod) -> PaymentResult<Arc<dyn GatewayAdapter>> {
        let gateway = method.gateway().ok_or_else(|| PaymentError::ValidationError {
            message: format!("payment method {} has no online gateway", method),
            field: Some("payment_method".to_string()),
        })?;
        self.get(gateway)
    }

    pub fn enabled(&self) -> Vec<Gateway> {
        let mut gateways: Vec<Gateway> = self.adapters.keys().copied().collect();
        gateways.sort_by_key(|g| g.as_str());
        gateways
    }
}
