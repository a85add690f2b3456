use crate::config::{parsed_var, required_var, validate_url, ConfigError};
use crate::orders::model::Order;
use crate::payments::amount::AmountCodec;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{GatewayAdapter, IpnDisposition, IpnResponse};
use crate::payments::signature::{FixedFieldCodec, HmacAlgorithm, SignatureCodec};
use crate::payments::types::{
    CallbackParams, CodeVerdict, Gateway, PaymentOutcome, ProcessingPolicy, RedirectContext,
};
use crate::payments::utils::{PaymentHttpClient, RequestBody};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const MOMO_SIGNATURE_FIELD: &str = "signature";

pub const MOMO_CREATE_CODEC: FixedFieldCodec = FixedFieldCodec::new(
    HmacAlgorithm::Sha256,
    MOMO_SIGNATURE_FIELD,
    &[
        "accessKey",
        "amount",
        "extraData",
        "ipnUrl",
        "orderId",
        "orderInfo",
        "partnerCode",
        "redirectUrl",
        "requestId",
        "requestType",
    ],
);

pub const MOMO_CALLBACK_CODEC: FixedFieldCodec = FixedFieldCodec::new(
    HmacAlgorithm::Sha256,
    MOMO_SIGNATURE_FIELD,
    &[
        "accessKey",
        "amount",
        "extraData",
        "message",
        "orderId",
        "orderInfo",
        "orderType",
        "partnerCode",
        "payType",
        "requestId",
        "responseTime",
        "resultCode",
        "transId",
    ],
);

const REQUEST_TYPE: &str = "captureWallet";
/// Joins our order number to the per-attempt part of MoMo's `orderId`.
const ATTEMPT_SEPARATOR: char = '_';
const CREATE_PATH: &str = "/v2/gateway/api/create";

const FAILURE_CODES: &[&str] = &[
    "1001", "1002", "1004", "1005", "1007", "1017", "1026", "1080", "1081", "2019", "4001",
    "4100",
];

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub timeout_secs: u64,
}

impl MomoConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            partner_code: required_var("MOMO_PARTNER_CODE")?,
            access_key: required_var("MOMO_ACCESS_KEY")?,
            secret_key: required_var("MOMO_SECRET_KEY")?,
            endpoint: required_var("MOMO_ENDPOINT")?,
            redirect_url: required_var("MOMO_REDIRECT_URL")?,
            ipn_url: required_var("MOMO_IPN_URL")?,
            timeout_secs: parsed_var("MOMO_TIMEOUT_SECS", "15")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("MOMO_ENDPOINT", &self.endpoint)?;
        validate_url("MOMO_REDIRECT_URL", &self.redirect_url)?;
        validate_url("MOMO_IPN_URL", &self.ipn_url)?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("MOMO_TIMEOUT_SECS".to_string()));
        }
        Ok(())
    }
}

/// MoMo refuses a second create with the same `orderId`, so every payment
/// attempt gets its own: the order number plus a tag taken from the request id.
pub fn momo_order_id(order_number: &str, request_id: &str) -> String {
    let tag: String = request_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    format!("{}{}{}", order_number, ATTEMPT_SEPARATOR, tag)
}

/// Order number behind a MoMo `orderId`.
pub fn order_number_from(order_id: &str) -> &str {
    order_id
        .rsplit_once(ATTEMPT_SEPARATOR)
        .map(|(order_number, _)| order_number)
        .unwrap_or(order_id)
}

/// Decision table over `resultCode`.
pub fn classify_momo(result_code: &str) -> CodeVerdict {
    match result_code.trim() {
        "0" => CodeVerdict::Success,
        "9000" | "7000" | "7002" => CodeVerdict::Processing,
        "1000" => CodeVerdict::Ambiguous,
        "1003" | "1006" => CodeVerdict::PayerCancelled,
        code if FAILURE_CODES.contains(&code) => CodeVerdict::Failure,
        _ => CodeVerdict::Ambiguous,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateResponse {
    result_code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pay_url: Option<String>,
}

pub struct MomoAdapter {
    config: MomoConfig,
    amounts: AmountCodec,
    policy: ProcessingPolicy,
    http: PaymentHttpClient,
}

impl MomoAdapter {
    pub fn new(
        config: MomoConfig,
        amounts: AmountCodec,
        policy: ProcessingPolicy,
    ) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Gateway::Momo, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            amounts,
            policy,
            http,
        })
    }

    /// Signed create-payment fields, before any network call.
    pub fn create_request(&self, order: &Order, request_id: &str) -> PaymentResult<CallbackParams> {
        let amount = self
            .amounts
            .to_minor_units(&order.total_amount, Gateway::Momo)?;

        let mut params = CallbackParams::new();
        params.insert("accessKey".into(), self.config.access_key.clone());
        params.insert("amount".into(), amount.to_string());
        params.insert("extraData".into(), String::new());
        params.insert("ipnUrl".into(), self.config.ipn_url.clone());
        params.insert(
            "orderId".into(),
            momo_order_id(&order.order_number, request_id),
        );
        params.insert(
            "orderInfo".into(),
            format!("Thanh toan don hang {}", order.order_number),
        );
        params.insert("partnerCode".into(), self.config.partner_code.clone());
        params.insert("redirectUrl".into(), self.config.redirect_url.clone());
        params.insert("requestId".into(), request_id.to_string());
        params.insert("requestType".into(), REQUEST_TYPE.into());

        let signature = MOMO_CREATE_CODEC.sign(
            &MOMO_CREATE_CODEC.canonicalize(&params),
            &self.config.secret_key,
        );
        params.insert(MOMO_SIGNATURE_FIELD.into(), signature);
        Ok(params)
    }

    /// Callback fields with the configured access key, which MoMo signs
    /// but does not echo back.
    fn with_access_key(&self, params: &CallbackParams) -> CallbackParams {
        let mut params = params.clone();
        params.insert("accessKey".into(), self.config.access_key.clone());
        params
    }

    pub fn sign_callback(&self, params: &CallbackParams) -> String {
        let params = self.with_access_key(params);
        MOMO_CALLBACK_CODEC.sign(
            &MOMO_CALLBACK_CODEC.canonicalize(&params),
            &self.config.secret_key,
        )
    }
}

#[async_trait]
impl GatewayAdapter for MomoAdapter {
    fn gateway(&self) -> Gateway {
        Gateway::Momo
    }

    async fn build_redirect(&self, order: &Order, ctx: &RedirectContext) -> PaymentResult<String> {
        let request_id = Uuid::new_v4().to_string();
        let params = self.create_request(order, &request_id)?;
        let amount = self
            .amounts
            .to_minor_units(&order.total_amount, Gateway::Momo)?;
        let get = |key: &str| params.get(key).cloned().unwrap_or_default();

        let payload = json!({
            "partnerCode": get("partnerCode"),
            "requestId": get("requestId"),
            "amount": amount,
            "orderId": get("orderId"),
            "orderInfo": get("orderInfo"),
            "redirectUrl": get("redirectUrl"),
            "ipnUrl": get("ipnUrl"),
            "requestType": get("requestType"),
            "extraData": get("extraData"),
            "lang": ctx.locale.clone().unwrap_or_else(|| "vi".to_string()),
            "signature": get(MOMO_SIGNATURE_FIELD),
        });

        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), CREATE_PATH);
        let response: MomoCreateResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &url,
                None,
                RequestBody::Json(&payload),
                &[],
            )
            .await?;

        if response.result_code != 0 {
            return Err(PaymentError::ProviderError {
                provider: Gateway::Momo.to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| "create payment rejected".to_string()),
                provider_code: Some(response.result_code.to_string()),
                retryable: false,
            });
        }

        let pay_url = response
            .pay_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PaymentError::ProviderError {
                provider: Gateway::Momo.to_string(),
                message: "create payment response has no payUrl".to_string(),
                provider_code: None,
                retryable: false,
            })?;

        info!(
            order_number = %order.order_number,
            momo_order_id = %get("orderId"),
            request_id = %request_id,
            "MoMo payment created"
        );
        Ok(pay_url)
    }

    async fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<PaymentOutcome> {
        let order_number = params
            .get("orderId")
            .map(|id| order_number_from(id).to_string())
            .unwrap_or_default();
        let provided = params
            .get(MOMO_SIGNATURE_FIELD)
            .map(String::as_str)
            .unwrap_or("");

        if !MOMO_CALLBACK_CODEC.verify(
            &self.with_access_key(params),
            provided,
            &self.config.secret_key,
        ) {
            warn!(order_number = %order_number, "MoMo callback signature mismatch");
            return Ok(PaymentOutcome::signature_rejected(
                Gateway::Momo,
                order_number,
                params.clone(),
            ));
        }

        let result_code = params
            .get("resultCode")
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        let amount_minor = params
            .get("amount")
            .and_then(|v| AmountCodec::parse_minor(v, Gateway::Momo));

        Ok(PaymentOutcome::classified(
            Gateway::Momo,
            order_number,
            classify_momo(&result_code),
            self.policy,
            params.get("transId").cloned(),
            Some(result_code),
            amount_minor,
            params.clone(),
        ))
    }

    fn acknowledge(&self, _disposition: IpnDisposition) -> IpnResponse {
        IpnResponse {
            status: 204,
            body: None,
        }
    }
}
