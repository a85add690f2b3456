use crate::payments::types::Gateway;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Amount {amount} out of range for {gateway}: allowed {min}..={max} minor units")]
    AmountOutOfRange {
        gateway: Gateway,
        amount: String,
        min: i64,
        max: i64,
    },

    #[error("Signature verification failed for {gateway}")]
    SignatureInvalid { gateway: Gateway },

    #[error("Gateway unavailable: gateway={gateway}, message={message}")]
    GatewayUnavailable { gateway: Gateway, message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::AmountOutOfRange { .. } => false,
            PaymentError::SignatureInvalid { .. } => false,
            PaymentError::GatewayUnavailable { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::AmountOutOfRange { .. } => 422,
            PaymentError::SignatureInvalid { .. } => 401,
            PaymentError::GatewayUnavailable { .. } => 503,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::AmountOutOfRange { gateway, .. } => format!(
                "Order total is outside the range {} accepts. Please choose another payment method",
                gateway
            ),
            PaymentError::SignatureInvalid { .. } => "Invalid payment callback".to_string(),
            PaymentError::GatewayUnavailable { gateway, .. } => format!(
                "Payment gateway ({}) is temporarily unavailable",
                gateway
            ),
            PaymentError::ProviderError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "payment".to_string()),
                    reason: message,
                })
            }
            PaymentError::AmountOutOfRange {
                gateway,
                amount,
                min,
                max,
            } => AppErrorKind::Domain(DomainError::AmountOutOfRange {
                gateway: gateway.to_string(),
                amount,
                min,
                max,
            }),
            PaymentError::SignatureInvalid { gateway } => {
                AppErrorKind::Domain(DomainError::SignatureInvalid {
                    gateway: gateway.to_string(),
                })
            }
            PaymentError::GatewayUnavailable { gateway, message } => {
                AppErrorKind::External(ExternalError::GatewayUnavailable {
                    gateway: gateway.to_string(),
                    message,
                })
            }
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::GatewayRejected {
                gateway: provider,
                message,
                is_retryable: retryable,
            }),
        };

        AppError::new(kind)
    }
}
