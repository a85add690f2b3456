use crate::config::{required_var, validate_url, ConfigError};
use crate::orders::model::Order;
use crate::payments::amount::AmountCodec;
use crate::payments::error::PaymentResult;
use crate::payments::provider::{GatewayAdapter, IpnDisposition, IpnResponse};
use crate::payments::signature::{HmacAlgorithm, SignatureCodec, SortedKeyCodec};
use crate::payments::types::{
    CallbackParams, CodeVerdict, Gateway, PaymentOutcome, ProcessingPolicy, RedirectContext,
};
use crate::payments::utils::signed_query_url;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

pub const VNPAY_SIGNATURE_FIELD: &str = "vnp_SecureHash";

pub const VNPAY_CODEC: SortedKeyCodec = SortedKeyCodec::new(
    HmacAlgorithm::Sha512,
    VNPAY_SIGNATURE_FIELD,
    &["vnp_SecureHashType"],
);

const VERSION: &str = "2.1.0";
const PAYMENT_WINDOW_MINUTES: i64 = 15;

const FAILURE_CODES: &[&str] = &["09", "10", "11", "12", "13", "51", "65", "75", "79", "99"];

#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub payment_url: String,
    pub return_url: String,
}

impl VnpayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            tmn_code: required_var("VNPAY_TMN_CODE")?,
            hash_secret: required_var("VNPAY_HASH_SECRET")?,
            payment_url: required_var("VNPAY_PAYMENT_URL")?,
            return_url: required_var("VNPAY_RETURN_URL")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("VNPAY_PAYMENT_URL", &self.payment_url)?;
        validate_url("VNPAY_RETURN_URL", &self.return_url)
    }
}

/// Decision table over `vnp_ResponseCode` and `vnp_TransactionStatus`.
pub fn classify_vnpay(response_code: &str, transaction_status: Option<&str>) -> CodeVerdict {
    match (response_code, transaction_status) {
        ("00", None) | ("00", Some("00")) => CodeVerdict::Success,
        ("00", Some("02")) => CodeVerdict::Failure,
        ("00", Some(_)) => CodeVerdict::Ambiguous,
        ("24", _) => CodeVerdict::PayerCancelled,
        // Money deducted but the transaction is flagged as suspicious.
        ("07", _) => CodeVerdict::Ambiguous,
        (code, _) if FAILURE_CODES.contains(&code) => CodeVerdict::Failure,
        _ => CodeVerdict::Ambiguous,
    }
}

/// `yyyyMMddHHmmss` in GMT+7.
fn vn_timestamp(at: DateTime<Utc>) -> String {
    (at.naive_utc() + Duration::hours(7))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

pub struct VnpayAdapter {
    config: VnpayConfig,
    amounts: AmountCodec,
    policy: ProcessingPolicy,
}

impl VnpayAdapter {
    pub fn new(config: VnpayConfig, amounts: AmountCodec, policy: ProcessingPolicy) -> Self {
        Self {
            config,
            amounts,
            policy,
        }
    }

    /// Unsigned redirect parameters for `order` created at `now`.
    pub fn redirect_params(
        &self,
        order: &Order,
        ctx: &RedirectContext,
        now: DateTime<Utc>,
    ) -> PaymentResult<CallbackParams> {
        let amount = self
            .amounts
            .to_minor_units(&order.total_amount, Gateway::Vnpay)?;

        let mut params = CallbackParams::new();
        params.insert("vnp_Version".into(), VERSION.into());
        params.insert("vnp_Command".into(), "pay".into());
        params.insert("vnp_TmnCode".into(), self.config.tmn_code.clone());
        params.insert("vnp_Amount".into(), amount.to_string());
        params.insert("vnp_CurrCode".into(), "VND".into());
        params.insert("vnp_TxnRef".into(), order.order_number.clone());
        params.insert(
            "vnp_OrderInfo".into(),
            format!("Thanh toan don hang {}", order.order_number),
        );
        params.insert("vnp_OrderType".into(), "other".into());
        params.insert(
            "vnp_Locale".into(),
            ctx.locale.clone().unwrap_or_else(|| "vn".to_string()),
        );
        params.insert("vnp_ReturnUrl".into(), self.config.return_url.clone());
        params.insert("vnp_IpAddr".into(), ctx.client_ip.clone());
        params.insert("vnp_CreateDate".into(), vn_timestamp(now));
        params.insert(
            "vnp_ExpireDate".into(),
            vn_timestamp(now + Duration::minutes(PAYMENT_WINDOW_MINUTES)),
        );
        Ok(params)
    }

    pub fn sign(&self, params: &CallbackParams) -> String {
        VNPAY_CODEC.sign(&VNPAY_CODEC.canonicalize(params), &self.config.hash_secret)
    }
}

#[async_trait]
impl GatewayAdapter for VnpayAdapter {
    fn gateway(&self) -> Gateway {
        Gateway::Vnpay
    }

    async fn build_redirect(&self, order: &Order, ctx: &RedirectContext) -> PaymentResult<String> {
        let params = self.redirect_params(order, ctx, Utc::now())?;
        let signature = self.sign(&params);
        let url = signed_query_url(
            &self.config.payment_url,
            &params,
            VNPAY_SIGNATURE_FIELD,
            &signature,
        )?;

        info!(order_number = %order.order_number, "VNPay redirect built");
        Ok(url)
    }

    async fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<PaymentOutcome> {
        let order_number = params.get("vnp_TxnRef").cloned().unwrap_or_default();

        if !VNPAY_CODEC.verify_embedded(params, &self.config.hash_secret) {
            warn!(order_number = %order_number, "VNPay callback signature mismatch");
            return Ok(PaymentOutcome::signature_rejected(
                Gateway::Vnpay,
                order_number,
                params.clone(),
            ));
        }

        let response_code = params
            .get("vnp_ResponseCode")
            .map(String::as_str)
            .unwrap_or("");
        let verdict = classify_vnpay(
            response_code,
            params.get("vnp_TransactionStatus").map(String::as_str),
        );
        // VNPay reports "0" when no transaction was created.
        let transaction_id = params
            .get("vnp_TransactionNo")
            .filter(|no| no.as_str() != "0")
            .cloned();
        let amount_minor = params
            .get("vnp_Amount")
            .and_then(|v| AmountCodec::parse_minor(v, Gateway::Vnpay));

        Ok(PaymentOutcome::classified(
            Gateway::Vnpay,
            order_number,
            verdict,
            self.policy,
            transaction_id,
            Some(response_code.to_string()),
            amount_minor,
            params.clone(),
        ))
    }

    fn acknowledge(&self, disposition: IpnDisposition) -> IpnResponse {
        let (code, message) = match disposition {
            IpnDisposition::Confirmed => ("00", "Confirm Success"),
            IpnDisposition::AlreadyConfirmed => ("02", "Order already confirmed"),
            IpnDisposition::OrderNotFound => ("01", "Order not found"),
            IpnDisposition::AmountMismatch => ("04", "Invalid amount"),
            IpnDisposition::SignatureInvalid => ("97", "Invalid signature"),
            IpnDisposition::Unknown => ("99", "Unknown error"),
        };
        IpnResponse {
            status: 200,
            body: Some(json!({ "RspCode": code, "Message": message })),
        }
    }
}
