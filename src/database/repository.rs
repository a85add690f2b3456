//! Storage seams used by the services. Each has a Postgres and an
//! in-memory implementation.

use crate::database::error::DatabaseError;
use crate::orders::model::{Order, OrderStatus, PaymentInfo, PaymentMethod, PaymentStatus, Product};
use crate::payments::types::Gateway;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Conditional payment state change. Applied only while the order is still
/// `pending` and, when `allowed_order_statuses` is non-empty, only from one
/// of those order statuses.
#[derive(Debug, Clone)]
pub struct PaymentTransition {
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub allowed_order_statuses: Vec<OrderStatus>,
    pub payment_info: Option<PaymentInfo>,
    pub cancellation_reason: Option<String>,
    /// Return every line's quantity to stock in the same atomic step. If any
    /// line cannot be returned the order is left untouched.
    pub release_stock: bool,
}

impl PaymentTransition {
    pub fn permits(&self, order: &Order) -> bool {
        order.payment_status == PaymentStatus::Pending
            && (self.allowed_order_statuses.is_empty()
                || self.allowed_order_statuses.contains(&order.order_status))
    }

    pub fn apply_to(&self, order: &mut Order, now: DateTime<Utc>) {
        order.payment_status = self.payment_status;
        order.order_status = self.order_status;
        if let Some(info) = &self.payment_info {
            order.payment_info = Some(info.clone());
        }
        if let Some(reason) = &self.cancellation_reason {
            order.cancellation_reason = Some(reason.clone());
        }
        order.updated_at = now;
    }
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, DatabaseError>;

    /// Atomically decrements stock if at least `quantity` is available.
    /// Returns false, leaving stock untouched, otherwise.
    async fn reserve_stock(&self, id: Uuid, quantity: i32) -> Result<bool, DatabaseError>;

    async fn release_stock(&self, id: Uuid, quantity: i32) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, DatabaseError>;

    async fn find_by_order_number(&self, order_number: &str)
        -> Result<Option<Order>, DatabaseError>;

    /// Compare-and-set on `payment_status = pending`, together with the stock
    /// release when the transition asks for one. `None` means the order was
    /// not in a state the transition permits.
    async fn transition_payment(
        &self,
        order_number: &str,
        transition: &PaymentTransition,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Changes the payment method while payment is still pending.
    async fn set_payment_method(
        &self,
        id: Uuid,
        method: PaymentMethod,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Compare-and-set on the current order status.
    async fn advance_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Online-gateway orders still pending that were created before `before`.
    async fn find_stale_pending(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, DatabaseError>;
}

/// One processed callback delivery.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackLogEntry {
    pub id: Uuid,
    pub gateway: Gateway,
    pub order_number: String,
    pub disposition: String,
    pub result_code: Option<String>,
    pub transaction_id: Option<String>,
    pub reason: Option<String>,
    pub needs_review: bool,
    pub raw_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CallbackLogStore: Send + Sync {
    async fn append(&self, entry: &CallbackLogEntry) -> Result<(), DatabaseError>;

    /// Newest first.
    async fn list_for_review(&self, limit: i64) -> Result<Vec<CallbackLogEntry>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::model::fixtures;

    #[test]
    fn transition_requires_pending_payment() {
        let transition = PaymentTransition {
            payment_status: PaymentStatus::Paid,
            order_status: OrderStatus::Processing,
            allowed_order_statuses: vec![],
            payment_info: None,
            cancellation_reason: None,
            release_stock: false,
        };
        let mut order = fixtures::order_with_method(PaymentMethod::Vnpay);
        assert!(transition.permits(&order));

        transition.apply_to(&mut order, Utc::now());
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert!(!transition.permits(&order));
    }

    #[test]
    fn transition_respects_allowed_order_statuses() {
        let transition = PaymentTransition {
            payment_status: PaymentStatus::Cancelled,
            order_status: OrderStatus::Cancelled,
            allowed_order_statuses: vec![OrderStatus::Pending, OrderStatus::Confirmed],
            payment_info: None,
            cancellation_reason: Some("changed my mind".to_string()),
            release_stock: true,
        };
        let mut order = fixtures::order_with_method(PaymentMethod::Cod);
        order.order_status = OrderStatus::Shipping;
        assert!(!transition.permits(&order));
    }
}
