//! In-memory stores used by `SKIP_EXTERNALS` mode and the test suite.
//! Every check-then-write runs under a single write guard.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    CallbackLogEntry, CallbackLogStore, OrderStore, PaymentTransition, ProductStore,
};
use crate::orders::model::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, Product};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    order_numbers: HashMap<String, Uuid>,
    callback_log: Vec<CallbackLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callback log entries, reviewed or not.
    pub async fn callback_log_len(&self) -> usize {
        self.state.read().await.callback_log.len()
    }
}

fn not_found(entity: &str, id: impl ToString) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    })
}

fn stock_overflow(id: Uuid) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::CheckViolation {
        constraint: format!("products.stock_quantity overflow for {}", id),
    })
}

impl MemoryState {
    /// Stock counters after adding back `items`, computed without mutating.
    fn released_counts(&self, items: &[OrderItem]) -> Result<HashMap<Uuid, i32>, DatabaseError> {
        let mut counts: HashMap<Uuid, i32> = HashMap::new();
        for item in items {
            let current = match counts.get(&item.product_id) {
                Some(count) => *count,
                None => {
                    self.products
                        .get(&item.product_id)
                        .ok_or_else(|| not_found("product", item.product_id))?
                        .stock_quantity
                }
            };
            let next = current
                .checked_add(item.quantity)
                .ok_or_else(|| stock_overflow(item.product_id))?;
            counts.insert(item.product_id, next);
        }
        Ok(counts)
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, DatabaseError> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn reserve_stock(&self, id: Uuid, quantity: i32) -> Result<bool, DatabaseError> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| not_found("product", id))?;
        if product.stock_quantity < quantity {
            return Ok(false);
        }
        product.stock_quantity -= quantity;
        Ok(true)
    }

    async fn release_stock(&self, id: Uuid, quantity: i32) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| not_found("product", id))?;
        product.stock_quantity = product
            .stock_quantity
            .checked_add(quantity)
            .ok_or_else(|| stock_overflow(id))?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if state.order_numbers.contains_key(&order.order_number) || state.orders.contains_key(&order.id)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "orders_order_number_key".to_string(),
            }));
        }
        state
            .order_numbers
            .insert(order.order_number.clone(), order.id);
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .order_numbers
            .get(order_number)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn transition_payment(
        &self,
        order_number: &str,
        transition: &PaymentTransition,
    ) -> Result<Option<Order>, DatabaseError> {
        let mut state = self.state.write().await;
        let id = match state.order_numbers.get(order_number) {
            Some(id) => *id,
            None => return Ok(None),
        };
        let released = match state.orders.get(&id) {
            Some(order) if transition.permits(order) => {
                if transition.release_stock {
                    state.released_counts(&order.items)?
                } else {
                    HashMap::new()
                }
            }
            _ => return Ok(None),
        };

        for (product_id, count) in released {
            if let Some(product) = state.products.get_mut(&product_id) {
                product.stock_quantity = count;
            }
        }
        let order = match state.orders.get_mut(&id) {
            Some(order) => order,
            None => return Ok(None),
        };
        transition.apply_to(order, Utc::now());
        Ok(Some(order.clone()))
    }

    async fn set_payment_method(
        &self,
        id: Uuid,
        method: PaymentMethod,
    ) -> Result<Option<Order>, DatabaseError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&id) {
            Some(order)
                if order.payment_status == PaymentStatus::Pending
                    && order.order_status != OrderStatus::Cancelled =>
            {
                order.payment_method = method;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn advance_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.order_status == from => {
                order.order_status = to;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_stale_pending(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, DatabaseError> {
        let state = self.state.read().await;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                o.payment_status == PaymentStatus::Pending
                    && o.order_status == OrderStatus::Pending
                    && o.payment_method.is_online()
                    && o.created_at < before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

#[async_trait]
impl CallbackLogStore for MemoryStore {
    async fn append(&self, entry: &CallbackLogEntry) -> Result<(), DatabaseError> {
        self.state.write().await.callback_log.push(entry.clone());
        Ok(())
    }

    async fn list_for_review(&self, limit: i64) -> Result<Vec<CallbackLogEntry>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .callback_log
            .iter()
            .rev()
            .filter(|entry| entry.needs_review)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
