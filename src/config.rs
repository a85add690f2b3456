//! Application configuration module
//! Loads environment variables once at startup into an immutable configuration
//! that is validated and then shared by reference.

use crate::payments::providers::{MomoConfig, PaypalConfig, VnpayConfig};
use crate::payments::types::{Gateway, ProcessingPolicy};
use bigdecimal::{BigDecimal, Signed};
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub checkout: CheckoutConfig,
    pub amounts: AmountConfig,
    pub gateways: GatewaysConfig,
    pub expiry: ExpiryConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Client-facing page that callback redirects land on
    pub payment_result_url: String,
    /// Run against the in-memory store instead of Postgres
    pub skip_externals: bool,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Checkout limits
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Flat fee in major units
    pub shipping_fee: BigDecimal,
    pub max_line_quantity: i32,
    pub max_lines: usize,
}

/// Currency conversion settings
#[derive(Debug, Clone)]
pub struct AmountConfig {
    pub vnd_per_major_unit: BigDecimal,
    pub vnd_per_usd: BigDecimal,
}

/// Gateway credentials; a section is present only when the gateway is enabled
#[derive(Debug, Clone)]
pub struct GatewaysConfig {
    pub enabled: Vec<Gateway>,
    pub processing_policy: ProcessingPolicy,
    pub vnpay: Option<VnpayConfig>,
    pub momo: Option<MomoConfig>,
    pub paypal: Option<PaypalConfig>,
}

/// Pending order expiry worker settings
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    pub pending_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let server = ServerConfig::from_env()?;
        let database = DatabaseConfig::from_env(!server.skip_externals)?;

        Ok(AppConfig {
            server,
            database,
            logging: LoggingConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            amounts: AmountConfig::from_env()?,
            gateways: GatewaysConfig::from_env()?,
            expiry: ExpiryConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.server.skip_externals {
            self.database.validate()?;
        }
        self.logging.validate()?;
        self.checkout.validate()?;
        self.amounts.validate()?;
        self.gateways.validate()?;
        self.expiry.validate()?;

        Ok(())
    }
}

pub(crate) fn required_var(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingVariable(name.to_string())),
    }
}

pub(crate) fn parsed_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed_var("SERVER_PORT", "8000")?,
            payment_result_url: env::var("PAYMENT_RESULT_URL")
                .unwrap_or_else(|_| "http://localhost:3000/payment/result".to_string()),
            skip_externals: env::var("SKIP_EXTERNALS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        validate_url("PAYMENT_RESULT_URL", &self.payment_result_url)
    }
}

impl DatabaseConfig {
    pub fn from_env(url_required: bool) -> Result<Self, ConfigError> {
        let url = if url_required {
            required_var("DATABASE_URL")?
        } else {
            env::var("DATABASE_URL").unwrap_or_default()
        };

        Ok(DatabaseConfig {
            url,
            max_connections: parsed_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parsed_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parsed_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CheckoutConfig {
            shipping_fee: parsed_var("CHECKOUT_SHIPPING_FEE", "0")?,
            max_line_quantity: parsed_var("CHECKOUT_MAX_LINE_QUANTITY", "100")?,
            max_lines: parsed_var("CHECKOUT_MAX_LINES", "50")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shipping_fee.is_negative() {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_SHIPPING_FEE cannot be negative".to_string(),
            ));
        }
        if self.max_line_quantity <= 0 {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_MAX_LINE_QUANTITY".to_string(),
            ));
        }
        if self.max_lines == 0 {
            return Err(ConfigError::InvalidValue("CHECKOUT_MAX_LINES".to_string()));
        }
        Ok(())
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            shipping_fee: BigDecimal::from(0),
            max_line_quantity: 100,
            max_lines: 50,
        }
    }
}

impl AmountConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AmountConfig {
            vnd_per_major_unit: parsed_var("AMOUNT_VND_PER_MAJOR_UNIT", "1000000")?,
            vnd_per_usd: parsed_var("PAYPAL_VND_PER_USD", "25000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.vnd_per_major_unit.is_positive() {
            return Err(ConfigError::InvalidValue(
                "AMOUNT_VND_PER_MAJOR_UNIT must be positive".to_string(),
            ));
        }
        if !self.vnd_per_usd.is_positive() {
            return Err(ConfigError::InvalidValue(
                "PAYPAL_VND_PER_USD must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AmountConfig {
    fn default() -> Self {
        Self {
            vnd_per_major_unit: BigDecimal::from(1_000_000),
            vnd_per_usd: BigDecimal::from(25_000),
        }
    }
}

impl GatewaysConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let enabled_raw =
            env::var("ENABLED_GATEWAYS").unwrap_or_else(|_| "vnpay,momo,paypal".to_string());
        let mut enabled = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let gateway = Gateway::from_str(value)
                .map_err(|_| ConfigError::InvalidValue(format!("ENABLED_GATEWAYS: {}", value)))?;
            if !enabled.contains(&gateway) {
                enabled.push(gateway);
            }
        }

        let processing_policy = env::var("PAYMENT_PROCESSING_POLICY")
            .ok()
            .map(|v| ProcessingPolicy::from_str(&v))
            .transpose()
            .map_err(|_| ConfigError::InvalidValue("PAYMENT_PROCESSING_POLICY".to_string()))?
            .unwrap_or_default();

        Ok(GatewaysConfig {
            vnpay: if enabled.contains(&Gateway::Vnpay) {
                Some(VnpayConfig::from_env()?)
            } else {
                None
            },
            momo: if enabled.contains(&Gateway::Momo) {
                Some(MomoConfig::from_env()?)
            } else {
                None
            },
            paypal: if enabled.contains(&Gateway::Paypal) {
                Some(PaypalConfig::from_env()?)
            } else {
                None
            },
            enabled,
            processing_policy,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for gateway in &self.enabled {
            let present = match gateway {
                Gateway::Vnpay => self.vnpay.as_ref().map(VnpayConfig::validate),
                Gateway::Momo => self.momo.as_ref().map(MomoConfig::validate),
                Gateway::Paypal => self.paypal.as_ref().map(PaypalConfig::validate),
            };
            match present {
                Some(result) => result?,
                None => {
                    return Err(ConfigError::ValidationFailed(format!(
                        "gateway {} is enabled but not configured",
                        gateway
                    )))
                }
            }
        }
        Ok(())
    }
}

impl ExpiryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ExpiryConfig {
            pending_ttl_secs: parsed_var("PENDING_ORDER_TTL_SECS", "1800")?,
            sweep_interval_secs: parsed_var("EXPIRY_SWEEP_INTERVAL_SECS", "60")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PENDING_ORDER_TTL_SECS".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "EXPIRY_SWEEP_INTERVAL_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidValue(format!("{} must be a valid URL", name)))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}
