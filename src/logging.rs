//! Tracing subscriber setup

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a configured level. `RUST_LOG` wins when set.
pub fn filter_directive(level: &str) -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            let level = level.to_lowercase();
            format!(
                "order_payments_engine={},tower_http={},sqlx=warn",
                level, level
            )
        })
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::new(filter_directive(&config.level));

    let _ = match config.format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(true)
            .try_init(),
        LogFormat::Plain => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
}
