use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::Gateway;
use bigdecimal::{BigDecimal, RoundingMode, Signed, ToPrimitive};

/// Inclusive bounds, in the gateway's minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountLimits {
    pub min_minor: i64,
    pub max_minor: i64,
}

impl AmountLimits {
    pub fn contains(&self, minor: i64) -> bool {
        minor >= self.min_minor && minor <= self.max_minor
    }
}

/// Converts internal major-unit amounts into what each gateway expects.
///
/// VNPay wants VND x 100, MoMo wants integral VND and PayPal wants US cents
/// through a static exchange rate.
#[derive(Debug, Clone)]
pub struct AmountCodec {
    vnd_per_major: BigDecimal,
    vnd_per_usd: BigDecimal,
}

impl AmountCodec {
    pub fn new(vnd_per_major: BigDecimal, vnd_per_usd: BigDecimal) -> PaymentResult<Self> {
        if !vnd_per_major.is_positive() {
            return Err(PaymentError::ValidationError {
                message: "VND per major unit must be positive".to_string(),
                field: Some("AMOUNT_VND_PER_MAJOR_UNIT".to_string()),
            });
        }
        if !vnd_per_usd.is_positive() {
            return Err(PaymentError::ValidationError {
                message: "VND per USD must be positive".to_string(),
                field: Some("PAYPAL_VND_PER_USD".to_string()),
            });
        }
        Ok(Self {
            vnd_per_major,
            vnd_per_usd,
        })
    }

    pub fn from_config(config: &crate::config::AmountConfig) -> PaymentResult<Self> {
        Self::new(config.vnd_per_major_unit.clone(), config.vnd_per_usd.clone())
    }

    pub fn limits(gateway: Gateway) -> AmountLimits {
        match gateway {
            // 5,000 .. 999,999,999 VND, sent as VND x 100
            Gateway::Vnpay => AmountLimits {
                min_minor: 500_000,
                max_minor: 99_999_999_900,
            },
            Gateway::Momo => AmountLimits {
                min_minor: 1_000,
                max_minor: 50_000_000,
            },
            // 0.01 .. 10,000.00 USD
            Gateway::Paypal => AmountLimits {
                min_minor: 1,
                max_minor: 1_000_000,
            },
        }
    }

    /// Converts and range-checks. Runs before any outbound call is made.
    pub fn to_minor_units(&self, major: &BigDecimal, gateway: Gateway) -> PaymentResult<i64> {
        let minor = self.convert(major, gateway)?;
        let limits = Self::limits(gateway);
        if !limits.contains(minor) {
            return Err(PaymentError::AmountOutOfRange {
                gateway,
                amount: major.to_string(),
                min: limits.min_minor,
                max: limits.max_minor,
            });
        }
        Ok(minor)
    }

    /// Conversion without the range check, used to compare against what a
    /// gateway reports back.
    pub fn convert(&self, major: &BigDecimal, gateway: Gateway) -> PaymentResult<i64> {
        if major.is_negative() {
            return Err(PaymentError::ValidationError {
                message: format!("amount must not be negative: {}", major),
                field: Some("amount".to_string()),
            });
        }

        let vnd = major * &self.vnd_per_major;
        let scaled = match gateway {
            Gateway::Vnpay => round_whole(&vnd) * BigDecimal::from(100),
            Gateway::Momo => round_whole(&vnd),
            Gateway::Paypal => round_whole(&(vnd / &self.vnd_per_usd * BigDecimal::from(100))),
        };

        scaled.to_i64().ok_or_else(|| PaymentError::AmountOutOfRange {
            gateway,
            amount: major.to_string(),
            min: Self::limits(gateway).min_minor,
            max: Self::limits(gateway).max_minor,
        })
    }

    pub fn from_minor_units(&self, minor: i64, gateway: Gateway) -> BigDecimal {
        let minor = BigDecimal::from(minor);
        let vnd = match gateway {
            Gateway::Vnpay => minor / BigDecimal::from(100),
            Gateway::Momo => minor,
            Gateway::Paypal => minor / BigDecimal::from(100) * &self.vnd_per_usd,
        };
        (vnd / &self.vnd_per_major).normalized()
    }

    /// Renders a minor amount the way the gateway's API expects it on the wire.
    pub fn format_minor(minor: i64, gateway: Gateway) -> String {
        match gateway {
            Gateway::Paypal => format!("{}.{:02}", minor / 100, minor % 100),
            Gateway::Vnpay | Gateway::Momo => minor.to_string(),
        }
    }

    /// Parses a wire amount back into minor units.
    pub fn parse_minor(value: &str, gateway: Gateway) -> Option<i64> {
        let value = value.trim();
        match gateway {
            Gateway::Paypal => {
                let decimal: BigDecimal = value.parse().ok()?;
                round_whole(&(decimal * BigDecimal::from(100))).to_i64()
            }
            Gateway::Vnpay | Gateway::Momo => value.parse::<i64>().ok(),
        }
    }
}

fn round_whole(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(0, RoundingMode::HalfUp)
}
