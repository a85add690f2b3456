//! Unified error handling for the order and payment engine
//!
//! Every failure that reaches an HTTP boundary is expressed as an [`AppError`],
//! which carries its HTTP status, a stable machine-readable [`ErrorCode`], a
//! user-facing message and a retryable flag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_STOCK")]
    InsufficientStock,
    #[serde(rename = "AMOUNT_OUT_OF_RANGE")]
    AmountOutOfRange,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PRODUCT_NOT_FOUND")]
    ProductNotFound,
    #[serde(rename = "AMBIGUOUS_OUTCOME")]
    AmbiguousOutcome,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503)
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// A line item could not be reserved; the whole checkout was aborted
    InsufficientStock {
        product_id: String,
        requested: i32,
    },
    /// Converted amount falls outside what the chosen gateway accepts
    AmountOutOfRange {
        gateway: String,
        amount: String,
        min: i64,
        max: i64,
    },
    /// Callback signature did not verify
    SignatureInvalid { gateway: String },
    OrderNotFound { reference: String },
    ProductNotFound { product_id: String },
    /// Callback could not be classified; the order stays pending for review
    AmbiguousOutcome {
        order_number: String,
        reason: String,
    },
    /// The requested status change is not allowed from the current state
    InvalidTransition {
        order_number: String,
        from: String,
        to: String,
    },
    /// The caller does not own the order
    Forbidden { order_number: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    Internal { message: String },
}

/// Payment gateway errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Token mint or remote order call failed or timed out
    GatewayUnavailable { gateway: String, message: String },
    /// Gateway answered but refused the request
    GatewayRejected {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientStock { .. } => 409,
                DomainError::AmountOutOfRange { .. } => 422,
                DomainError::SignatureInvalid { .. } => 401,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::ProductNotFound { .. } => 404,
                DomainError::AmbiguousOutcome { .. } => 202, // Accepted, not resolved
                DomainError::InvalidTransition { .. } => 409,
                DomainError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => 503,
                ExternalError::GatewayRejected { .. } => 502,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                DomainError::AmountOutOfRange { .. } => ErrorCode::AmountOutOfRange,
                DomainError::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::ProductNotFound { .. } => ErrorCode::ProductNotFound,
                DomainError::AmbiguousOutcome { .. } => ErrorCode::AmbiguousOutcome,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::GatewayRejected { .. } => ErrorCode::GatewayError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientStock { product_id, .. } => {
                    format!("Product '{}' does not have enough stock", product_id)
                }
                DomainError::AmountOutOfRange { gateway, .. } => format!(
                    "Order total is outside the range {} accepts. Please choose another payment method",
                    gateway
                ),
                DomainError::SignatureInvalid { .. } => "Invalid payment callback".to_string(),
                DomainError::OrderNotFound { reference } => {
                    format!("Order '{}' not found", reference)
                }
                DomainError::ProductNotFound { product_id } => {
                    format!("Product '{}' not found", product_id)
                }
                DomainError::AmbiguousOutcome { .. } => {
                    "Payment is pending confirmation".to_string()
                }
                DomainError::InvalidTransition { from, to, .. } => {
                    format!("Order cannot move from '{}' to '{}'", from, to)
                }
                DomainError::Forbidden { .. } => {
                    "You do not have access to this order".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { gateway, .. } => format!(
                    "Payment gateway ({}) is temporarily unavailable. Please try again",
                    gateway
                ),
                ExternalError::GatewayRejected {
                    gateway,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        "Payment could not be started. Please choose another payment method"
                            .to_string()
                    }
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid field '{}': {}", field, reason)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => true,
                ExternalError::GatewayRejected { is_retryable, .. } => *is_retryable,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
