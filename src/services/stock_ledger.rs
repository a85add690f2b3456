//! Stock reservations against the product counters.
//!
//! `reserve` delegates to the store's conditional decrement, so the check and
//! the write are one atomic step no matter how many processes share storage.

use crate::database::repository::ProductStore;
use crate::error::{AppError, AppResult, DomainError};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct StockLedger {
    products: Arc<dyn ProductStore>,
}

impl StockLedger {
    pub fn new(products: Arc<dyn ProductStore>) -> Self {
        Self { products }
    }

    /// Takes `quantity` units off the shelf or fails with `InsufficientStock`,
    /// leaving the counter untouched.
    pub async fn reserve(&self, product_id: Uuid, quantity: i32) -> AppResult<()> {
        if quantity <= 0 {
            return Err(AppError::validation(
                "quantity",
                "quantity must be positive",
            ));
        }

        let reserved = self.products.reserve_stock(product_id, quantity).await?;
        if !reserved {
            warn!(product_id = %product_id, requested = quantity, "insufficient stock");
            return Err(AppError::domain(DomainError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
            }));
        }

        info!(product_id = %product_id, quantity, "stock reserved");
        Ok(())
    }

    /// Puts `quantity` units back unconditionally.
    pub async fn release(&self, product_id: Uuid, quantity: i32) -> AppResult<()> {
        self.products.release_stock(product_id, quantity).await?;
        info!(product_id = %product_id, quantity, "stock released");
        Ok(())
    }
}
