use crate::orders::model::Order;
use crate::payments::error::PaymentResult;
use crate::payments::types::{CallbackParams, Gateway, PaymentOutcome, RedirectContext};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

/// How the reconciler disposed of a server-to-server notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpnDisposition {
    Confirmed,
    AlreadyConfirmed,
    OrderNotFound,
    AmountMismatch,
    SignatureInvalid,
    /// Ambiguous or failed for an internal reason; the gateway should retry.
    Unknown,
}

/// Body the gateway expects in answer to a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct IpnResponse {
    pub status: u16,
    pub body: Option<JsonValue>,
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn gateway(&self) -> Gateway;

    /// Builds the signed URL the payer is sent to.
    async fn build_redirect(&self, order: &Order, ctx: &RedirectContext) -> PaymentResult<String>;

    /// Verifies and classifies a callback. A bad signature yields an outcome
    /// with `signature_valid == false`, not an error.
    async fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<PaymentOutcome>;

    fn acknowledge(&self, _disposition: IpnDisposition) -> IpnResponse {
        IpnResponse {
            status: 200,
            body: Some(json!({ "status": "ok" })),
        }
    }
}
