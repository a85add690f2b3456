use crate::config::{parsed_var, required_var, validate_url, ConfigError};
use crate::orders::model::Order;
use crate::payments::amount::AmountCodec;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayAdapter;
use crate::payments::signature::{HmacAlgorithm, SignatureCodec, SortedKeyCodec};
use crate::payments::types::{
    CallbackParams, CodeVerdict, Gateway, PaymentOutcome, ProcessingPolicy, RedirectContext,
};
use crate::payments::utils::{signed_query_url, PaymentHttpClient, RequestBody};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PAYPAL_SIGNATURE_FIELD: &str = "sig";

/// Signs our own return/cancel URLs; PayPal itself does not sign redirects.
pub const PAYPAL_RETURN_CODEC: SortedKeyCodec =
    SortedKeyCodec::new(HmacAlgorithm::Sha256, PAYPAL_SIGNATURE_FIELD, &[]);

/// Fields we put on the return URL. PayPal appends `token` and `PayerID`.
const SIGNED_RETURN_FIELDS: &[&str] = &["orderNumber", "cancelled"];

const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub return_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

impl PaypalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            client_id: required_var("PAYPAL_CLIENT_ID")?,
            client_secret: required_var("PAYPAL_CLIENT_SECRET")?,
            api_base: required_var("PAYPAL_API_BASE")?,
            return_url: required_var("PAYPAL_RETURN_URL")?,
            cancel_url: required_var("PAYPAL_CANCEL_URL")?,
            timeout_secs: parsed_var("PAYPAL_TIMEOUT_SECS", "15")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("PAYPAL_API_BASE", &self.api_base)?;
        validate_url("PAYPAL_RETURN_URL", &self.return_url)?;
        validate_url("PAYPAL_CANCEL_URL", &self.cancel_url)?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("PAYPAL_TIMEOUT_SECS".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Money {
    value: String,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<Money>,
}

#[derive(Debug, Default, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    reference_id: Option<String>,
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    payments: Option<Payments>,
}

impl PurchaseUnit {
    fn references(&self, order_number: &str) -> bool {
        self.reference_id.as_deref() == Some(order_number)
            || self.invoice_id.as_deref() == Some(order_number)
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

impl OrderResponse {
    /// True when a purchase unit was created for `order_number`.
    fn belongs_to(&self, order_number: &str) -> bool {
        self.purchase_units
            .iter()
            .any(|unit| unit.references(order_number))
    }

    fn first_capture(&self) -> Option<&Capture> {
        self.purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .next()
    }
}

/// Decision table over the order status and, when present, the capture status.
pub fn classify_paypal(order_status: &str, capture_status: Option<&str>) -> CodeVerdict {
    match (order_status, capture_status) {
        (_, Some("DECLINED")) | (_, Some("FAILED")) => CodeVerdict::Failure,
        ("VOIDED", _) => CodeVerdict::Failure,
        ("COMPLETED", None) | ("COMPLETED", Some("COMPLETED")) => CodeVerdict::Success,
        (_, Some("PENDING")) => CodeVerdict::Processing,
        _ => CodeVerdict::Ambiguous,
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PaypalAdapter {
    config: PaypalConfig,
    amounts: AmountCodec,
    policy: ProcessingPolicy,
    http: PaymentHttpClient,
    token: RwLock<Option<CachedToken>>,
}

impl PaypalAdapter {
    pub fn new(
        config: PaypalConfig,
        amounts: AmountCodec,
        policy: ProcessingPolicy,
    ) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Gateway::Paypal, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            amounts,
            policy,
            http,
            token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Signs the subset of `params` that we own.
    pub fn sign_return_params(&self, params: &CallbackParams) -> String {
        let owned = owned_fields(params);
        PAYPAL_RETURN_CODEC.sign(
            &PAYPAL_RETURN_CODEC.canonicalize(&owned),
            &self.config.client_secret,
        )
    }

    fn return_urls(&self, order_number: &str) -> PaymentResult<(String, String)> {
        let mut params = CallbackParams::new();
        params.insert("orderNumber".into(), order_number.to_string());
        let return_url = signed_query_url(
            &self.config.return_url,
            &params,
            PAYPAL_SIGNATURE_FIELD,
            &self.sign_return_params(&params),
        )?;

        params.insert("cancelled".into(), "1".into());
        let cancel_url = signed_query_url(
            &self.config.cancel_url,
            &params,
            PAYPAL_SIGNATURE_FIELD,
            &self.sign_return_params(&params),
        )?;
        Ok((return_url, cancel_url))
    }

    async fn access_token(&self) -> PaymentResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let credentials = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));
        let authorization = format!("Basic {}", credentials);
        let response: TokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                None,
                RequestBody::Form(&[("grant_type", "client_credentials")]),
                &[("Authorization", authorization.as_str())],
            )
            .await
            .map_err(unavailable)?;

        let lifetime = response
            .expires_in
            .unwrap_or(0)
            .saturating_sub(TOKEN_REFRESH_MARGIN_SECS);
        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!(expires_in = lifetime, "PayPal access token minted");
        Ok(response.access_token)
    }

    async fn capture(&self, paypal_order_id: &str) -> PaymentResult<OrderResponse> {
        let token = self.access_token().await?;
        let request_id = format!("capture-{}", paypal_order_id);
        let captured = self
            .http
            .request_json::<OrderResponse>(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/checkout/orders/{}/capture", paypal_order_id)),
                Some(&token),
                RequestBody::Json(&json!({})),
                &[("PayPal-Request-Id", request_id.as_str())],
            )
            .await;

        match captured {
            Ok(order) => Ok(order),
            Err(PaymentError::ProviderError { message, .. })
                if message.contains("ORDER_ALREADY_CAPTURED") =>
            {
                info!(paypal_order_id = %paypal_order_id, "PayPal order already captured, fetching state");
                self.http
                    .request_json::<OrderResponse>(
                        reqwest::Method::GET,
                        &self.endpoint(&format!("/v2/checkout/orders/{}", paypal_order_id)),
                        Some(&token),
                        RequestBody::Empty,
                        &[],
                    )
                    .await
                    .map_err(unavailable)
            }
            Err(err) => Err(unavailable(err)),
        }
    }
}

fn owned_fields(params: &CallbackParams) -> CallbackParams {
    params
        .iter()
        .filter(|(key, _)| SIGNED_RETURN_FIELDS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn unavailable(err: PaymentError) -> PaymentError {
    match err {
        PaymentError::ProviderError { message, .. } => PaymentError::GatewayUnavailable {
            gateway: Gateway::Paypal,
            message,
        },
        other => other,
    }
}

#[async_trait]
impl GatewayAdapter for PaypalAdapter {
    fn gateway(&self) -> Gateway {
        Gateway::Paypal
    }

    async fn build_redirect(&self, order: &Order, _ctx: &RedirectContext) -> PaymentResult<String> {
        let cents = self
            .amounts
            .to_minor_units(&order.total_amount, Gateway::Paypal)?;
        let (return_url, cancel_url) = self.return_urls(&order.order_number)?;
        let token = self.access_token().await?;

        let payload = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.order_number,
                "invoice_id": order.order_number,
                "amount": {
                    "currency_code": "USD",
                    "value": AmountCodec::format_minor(cents, Gateway::Paypal),
                },
            }],
            "application_context": {
                "return_url": return_url,
                "cancel_url": cancel_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        });

        let request_id = Uuid::new_v4().to_string();
        let created: CreateOrderResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/checkout/orders"),
                Some(&token),
                RequestBody::Json(&payload),
                &[("PayPal-Request-Id", request_id.as_str())],
            )
            .await
            .map_err(unavailable)?;

        let approve = created
            .links
            .into_iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href)
            .ok_or_else(|| PaymentError::GatewayUnavailable {
                gateway: Gateway::Paypal,
                message: format!("order {} has no approval link", created.id),
            })?;

        info!(
            order_number = %order.order_number,
            paypal_order_id = %created.id,
            "PayPal order created"
        );
        Ok(approve)
    }

    async fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<PaymentOutcome> {
        let order_number = params.get("orderNumber").cloned().unwrap_or_default();
        let provided = params
            .get(PAYPAL_SIGNATURE_FIELD)
            .map(String::as_str)
            .unwrap_or("");

        if !PAYPAL_RETURN_CODEC.verify(
            &owned_fields(params),
            provided,
            &self.config.client_secret,
        ) {
            warn!(order_number = %order_number, "PayPal return signature mismatch");
            return Ok(PaymentOutcome::signature_rejected(
                Gateway::Paypal,
                order_number,
                params.clone(),
            ));
        }

        let paypal_order_id = params.get("token").cloned();

        if params.get("cancelled").map(String::as_str) == Some("1") {
            return Ok(PaymentOutcome::classified(
                Gateway::Paypal,
                order_number,
                CodeVerdict::PayerCancelled,
                self.policy,
                None,
                Some("CANCELLED".to_string()),
                None,
                params.clone(),
            ));
        }

        let paypal_order_id = match paypal_order_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => {
                return Ok(PaymentOutcome::classified(
                    Gateway::Paypal,
                    order_number,
                    CodeVerdict::Ambiguous,
                    self.policy,
                    None,
                    None,
                    None,
                    params.clone(),
                ))
            }
        };

        let order = self.capture(&paypal_order_id).await?;

        if !order.belongs_to(&order_number) {
            warn!(
                order_number = %order_number,
                paypal_order_id = %order.id,
                "PayPal order does not reference the returning order"
            );
            let mut raw = params.clone();
            raw.insert("paypal_order_id".into(), order.id.clone());
            let mut outcome = PaymentOutcome::classified(
                Gateway::Paypal,
                order_number,
                CodeVerdict::Ambiguous,
                self.policy,
                None,
                Some(order.status.clone()),
                None,
                raw,
            );
            outcome.reason = Some(format!(
                "PayPal order {} belongs to another order",
                order.id
            ));
            return Ok(outcome);
        }

        let capture = order.first_capture();
        let capture_status = capture.map(|c| c.status.as_str());
        let verdict = classify_paypal(&order.status, capture_status);

        let mut raw = params.clone();
        raw.insert("paypal_order_id".into(), order.id.clone());
        raw.insert("paypal_order_status".into(), order.status.clone());
        if let Some(status) = capture_status {
            raw.insert("paypal_capture_status".into(), status.to_string());
        }

        Ok(PaymentOutcome::classified(
            Gateway::Paypal,
            order_number,
            verdict,
            self.policy,
            capture.map(|c| c.id.clone()),
            Some(capture_status.unwrap_or(order.status.as_str()).to_string()),
            capture
                .and_then(|c| c.amount.as_ref())
                .and_then(|m| AmountCodec::parse_minor(&m.value, Gateway::Paypal)),
            raw,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::query_params;
    use bigdecimal::BigDecimal;

    fn adapter() -> PaypalAdapter {
        PaypalAdapter::new(
            PaypalConfig {
                client_id: "client".to_string(),
                client_secret: "paypal-secret".to_string(),
                api_base: "https://api-m.sandbox.paypal.com".to_string(),
                return_url: "https://shop.example/payments/callback/paypal".to_string(),
                cancel_url: "https://shop.example/payments/callback/paypal".to_string(),
                timeout_secs: 5,
            },
            AmountCodec::new(BigDecimal::from(1_000_000), BigDecimal::from(25_000)).unwrap(),
            ProcessingPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn decision_table_matches_documented_statuses() {
        assert_eq!(classify_paypal("COMPLETED", Some("COMPLETED")), CodeVerdict::Success);
        assert_eq!(classify_paypal("COMPLETED", Some("PENDING")), CodeVerdict::Processing);
        assert_eq!(classify_paypal("COMPLETED", Some("DECLINED")), CodeVerdict::Failure);
        assert_eq!(classify_paypal("VOIDED", None), CodeVerdict::Failure);
        assert_eq!(classify_paypal("APPROVED", None), CodeVerdict::Ambiguous);
    }

    #[test]
    fn return_urls_carry_a_verifiable_signature() {
        let adapter = adapter();
        let (return_url, cancel_url) = adapter.return_urls("ORD-20240301-ABCDEF12").unwrap();

        let mut params = query_params(&return_url).unwrap();
        // PayPal appends its own parameters on redirect
        params.insert("token".into(), "5O190127TN364715T".into());
        params.insert("PayerID".into(), "FSMVU44LF3YUS".into());
        let provided = params.get(PAYPAL_SIGNATURE_FIELD).cloned().unwrap();
        assert!(PAYPAL_RETURN_CODEC.verify(&owned_fields(&params), &provided, "paypal-secret"));

        let cancel = query_params(&cancel_url).unwrap();
        assert_eq!(cancel.get("cancelled").map(String::as_str), Some("1"));
        assert_ne!(cancel.get("sig"), params.get("sig"));
    }

    #[tokio::test]
    async fn cancel_return_is_a_payer_cancellation_without_network() {
        let adapter = adapter();
        let mut params = CallbackParams::new();
        params.insert("orderNumber".into(), "ORD-1".into());
        params.insert("cancelled".into(), "1".into());
        let sig = adapter.sign_return_params(&params);
        params.insert(PAYPAL_SIGNATURE_FIELD.into(), sig);
        params.insert("token".into(), "5O190127TN364715T".into());

        let outcome = adapter.parse_callback(&params).await.unwrap();
        assert!(outcome.payer_cancelled);
        assert!(outcome.is_definitive_failure());
    }

    #[tokio::test]
    async fn forged_cancel_flag_is_rejected() {
        let adapter = adapter();
        let mut params = CallbackParams::new();
        params.insert("orderNumber".into(), "ORD-1".into());
        let sig = adapter.sign_return_params(&params);
        params.insert(PAYPAL_SIGNATURE_FIELD.into(), sig);
        params.insert("cancelled".into(), "1".into());

        let outcome = adapter.parse_callback(&params).await.unwrap();
        assert!(!outcome.signature_valid);
    }

    #[tokio::test]
    async fn missing_token_is_ambiguous() {
        let adapter = adapter();
        let mut params = CallbackParams::new();
        params.insert("orderNumber".into(), "ORD-1".into());
        let sig = adapter.sign_return_params(&params);
        params.insert(PAYPAL_SIGNATURE_FIELD.into(), sig);

        let outcome = adapter.parse_callback(&params).await.unwrap();
        assert!(outcome.ambiguous);
        assert!(!outcome.success);
    }
}
