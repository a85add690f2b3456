use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Raw callback fields as delivered by a gateway (query string, form body or
/// flattened JSON). Ordered so canonicalization can iterate it directly.
pub type CallbackParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    Vnpay,
    Momo,
    Paypal,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Vnpay => "vnpay",
            Gateway::Momo => "momo",
            Gateway::Paypal => "paypal",
        }
    }

    pub fn all() -> [Gateway; 3] {
        [Gateway::Vnpay, Gateway::Momo, Gateway::Paypal]
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "vnpay" => Ok(Gateway::Vnpay),
            "momo" => Ok(Gateway::Momo),
            "paypal" => Ok(Gateway::Paypal),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// How a gateway result code is classified before policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeVerdict {
    Success,
    Failure,
    PayerCancelled,
    /// Gateway reports the charge as still in flight.
    Processing,
    Ambiguous,
}

/// What to do with a `Processing` verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingPolicy {
    /// Settle as paid, but only when the gateway already issued a transaction id.
    #[default]
    AcceptWithTransactionId,
    /// Never settle; leave the order pending for manual reconciliation.
    HoldForReview,
}

impl ProcessingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingPolicy::AcceptWithTransactionId => "accept_with_transaction_id",
            ProcessingPolicy::HoldForReview => "hold_for_review",
        }
    }
}

impl FromStr for ProcessingPolicy {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "accept_with_transaction_id" => Ok(ProcessingPolicy::AcceptWithTransactionId),
            "hold_for_review" => Ok(ProcessingPolicy::HoldForReview),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported processing policy: {}", value),
                field: Some("PAYMENT_PROCESSING_POLICY".to_string()),
            }),
        }
    }
}

/// Request-scoped details a redirect needs besides the order itself.
#[derive(Debug, Clone)]
pub struct RedirectContext {
    pub client_ip: String,
    pub locale: Option<String>,
}

impl Default for RedirectContext {
    fn default() -> Self {
        Self {
            client_ip: "127.0.0.1".to_string(),
            locale: None,
        }
    }
}

/// Normalized result of one gateway callback. Built per delivery and consumed
/// straight away by the reconciler.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub gateway: Gateway,
    pub order_number: String,
    pub success: bool,
    pub ambiguous: bool,
    pub signature_valid: bool,
    pub payer_cancelled: bool,
    pub gateway_transaction_id: Option<String>,
    pub result_code: Option<String>,
    /// Charged amount in the gateway's minor unit, when the gateway reports it.
    pub amount_minor: Option<i64>,
    pub reason: Option<String>,
    pub raw_fields: CallbackParams,
}

impl PaymentOutcome {
    pub fn signature_rejected(
        gateway: Gateway,
        order_number: impl Into<String>,
        raw_fields: CallbackParams,
    ) -> Self {
        Self {
            gateway,
            order_number: order_number.into(),
            success: false,
            ambiguous: true,
            signature_valid: false,
            payer_cancelled: false,
            gateway_transaction_id: None,
            result_code: None,
            amount_minor: None,
            reason: Some("signature mismatch".to_string()),
            raw_fields,
        }
    }

    /// Applies the decision table verdict and the processing policy.
    #[allow(clippy::too_many_arguments)]
    pub fn classified(
        gateway: Gateway,
        order_number: impl Into<String>,
        verdict: CodeVerdict,
        policy: ProcessingPolicy,
        gateway_transaction_id: Option<String>,
        result_code: Option<String>,
        amount_minor: Option<i64>,
        raw_fields: CallbackParams,
    ) -> Self {
        let gateway_transaction_id = gateway_transaction_id.filter(|id| !id.trim().is_empty());
        let (success, ambiguous, payer_cancelled, reason) = match verdict {
            CodeVerdict::Success => (true, false, false, None),
            CodeVerdict::Failure => (
                false,
                false,
                false,
                Some(format!(
                    "gateway reported failure code {}",
                    result_code.as_deref().unwrap_or("-")
                )),
            ),
            CodeVerdict::PayerCancelled => (
                false,
                false,
                true,
                Some("payment cancelled by payer".to_string()),
            ),
            CodeVerdict::Processing => match policy {
                ProcessingPolicy::AcceptWithTransactionId if gateway_transaction_id.is_some() => {
                    (true, false, false, None)
                }
                ProcessingPolicy::AcceptWithTransactionId => (
                    false,
                    true,
                    false,
                    Some("processing code without transaction id".to_string()),
                ),
                ProcessingPolicy::HoldForReview => (
                    false,
                    true,
                    false,
                    Some("processing code held for review".to_string()),
                ),
            },
            CodeVerdict::Ambiguous => (
                false,
                true,
                false,
                Some(format!(
                    "unrecognised result code {}",
                    result_code.as_deref().unwrap_or("-")
                )),
            ),
        };

        Self {
            gateway,
            order_number: order_number.into(),
            success,
            ambiguous,
            signature_valid: true,
            payer_cancelled,
            gateway_transaction_id,
            result_code,
            amount_minor,
            reason,
            raw_fields,
        }
    }

    /// Signed and unambiguous, but not a success.
    pub fn is_definitive_failure(&self) -> bool {
        self.signature_valid && !self.success && !self.ambiguous
    }
}
