use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{OrderStore, PaymentTransition};
use crate::orders::model::{
    Order, OrderItem, OrderStatus, PaymentInfo, PaymentMethod, ShippingAddress,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::{BigDecimal, Json};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, order_number, customer_id, items, shipping_address, \
     payment_method, payment_status, order_status, subtotal, shipping_fee, total_amount, \
     payment_info, cancellation_reason, created_at, updated_at";

/// Row shape of the `orders` table
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_id: String,
    items: Json<Vec<OrderItem>>,
    shipping_address: Json<ShippingAddress>,
    payment_method: String,
    payment_status: String,
    order_status: String,
    subtotal: BigDecimal,
    shipping_fee: BigDecimal,
    total_amount: BigDecimal,
    payment_info: Option<Json<PaymentInfo>>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            customer_id: row.customer_id,
            items: row.items.0,
            shipping_address: row.shipping_address.0,
            payment_method: PaymentMethod::from_str(&row.payment_method)
                .map_err(DatabaseError::corrupt)?,
            payment_status: FromStr::from_str(&row.payment_status)
                .map_err(DatabaseError::corrupt)?,
            order_status: FromStr::from_str(&row.order_status).map_err(DatabaseError::corrupt)?,
            subtotal: row.subtotal,
            shipping_fee: row.shipping_fee,
            total_amount: row.total_amount,
            payment_info: row.payment_info.map(|info| info.0),
            cancellation_reason: row.cancellation_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_order(row: Option<OrderRow>) -> Result<Option<Order>, DatabaseError> {
    row.map(Order::try_from).transpose()
}

/// Postgres-backed order storage
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO orders
             (id, order_number, customer_id, items, shipping_address, payment_method,
              payment_status, order_status, subtotal, shipping_fee, total_amount,
              payment_info, cancellation_reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(&order.customer_id)
        .bind(Json(&order.items))
        .bind(Json(&order.shipping_address))
        .bind(order.payment_method.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.order_status.as_str())
        .bind(&order.subtotal)
        .bind(&order.shipping_fee)
        .bind(&order.total_amount)
        .bind(order.payment_info.as_ref().map(Json))
        .bind(&order.cancellation_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_order(row)
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_number = $1",
            ORDER_COLUMNS
        ))
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_order(row)
    }

    async fn transition_payment(
        &self,
        order_number: &str,
        transition: &PaymentTransition,
    ) -> Result<Option<Order>, DatabaseError> {
        let allowed: Vec<String> = transition
            .allowed_order_statuses
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET payment_status = $2,
                 order_status = $3,
                 payment_info = COALESCE($4, payment_info),
                 cancellation_reason = COALESCE($5, cancellation_reason),
                 updated_at = NOW()
             WHERE order_number = $1
               AND payment_status = 'pending'
               AND (cardinality($6::text[]) = 0 OR order_status = ANY($6::text[]))
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_number)
        .bind(transition.payment_status.as_str())
        .bind(transition.order_status.as_str())
        .bind(transition.payment_info.as_ref().map(Json))
        .bind(&transition.cancellation_reason)
        .bind(&allowed)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let order = match into_order(row)? {
            Some(order) => order,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(None);
            }
        };

        if transition.release_stock {
            for item in &order.items {
                let result = sqlx::query(
                    "UPDATE products
                     SET stock_quantity = stock_quantity + $2, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(item.product_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

                if result.rows_affected() == 0 {
                    tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                    return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                        entity: "product".to_string(),
                        id: item.product_id.to_string(),
                    }));
                }
            }
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(order))
    }

    async fn set_payment_method(
        &self,
        id: Uuid,
        method: PaymentMethod,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET payment_method = $2, updated_at = NOW()
             WHERE id = $1 AND payment_status = 'pending' AND order_status <> 'cancelled'
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(method.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_order(row)
    }

    async fn advance_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET order_status = $3, updated_at = NOW()
             WHERE id = $1 AND order_status = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        into_order(row)
    }

    async fn find_stale_pending(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders
             WHERE payment_status = 'pending'
               AND order_status = 'pending'
               AND payment_method IN ('vnpay', 'momo', 'paypal')
               AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(Order::try_from).collect()
    }
}
