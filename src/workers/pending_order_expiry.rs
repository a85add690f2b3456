use crate::config::ExpiryConfig;
use crate::error::AppError;
use crate::services::OrderService;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PendingOrderExpiryConfig {
    /// How often the worker wakes up to sweep.
    pub sweep_interval: Duration,
    /// Online orders still unpaid after this long are cancelled.
    pub pending_ttl: Duration,
    /// Maximum orders expired per sweep.
    pub batch_size: i64,
}

impl Default for PendingOrderExpiryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            pending_ttl: Duration::from_secs(1800),
            batch_size: 200,
        }
    }
}

impl From<&ExpiryConfig> for PendingOrderExpiryConfig {
    fn from(config: &ExpiryConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            pending_ttl: Duration::from_secs(config.pending_ttl_secs),
            ..Self::default()
        }
    }
}

pub struct PendingOrderExpiryWorker {
    orders: OrderService,
    config: PendingOrderExpiryConfig,
}

impl PendingOrderExpiryWorker {
    pub fn new(orders: OrderService, config: PendingOrderExpiryConfig) -> Self {
        Self { orders, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            pending_ttl_secs = self.config.pending_ttl.as_secs(),
            batch_size = self.config.batch_size,
            "pending order expiry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending order expiry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "pending order expiry cycle failed");
                    }
                }
            }
        }

        info!("pending order expiry worker stopped");
    }

    pub async fn run_cycle(&self) -> Result<usize, AppError> {
        let ttl = chrono::Duration::from_std(self.config.pending_ttl)
            .map_err(|e| AppError::internal(format!("invalid pending ttl: {}", e)))?;
        let expired = self
            .orders
            .expire_stale_orders(ttl, self.config.batch_size)
            .await?;
        if expired > 0 {
            info!(expired, "expired unpaid orders");
        }
        Ok(expired)
    }
}
