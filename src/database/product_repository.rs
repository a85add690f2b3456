use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::ProductStore;
use crate::orders::model::Product;
use async_trait::async_trait;
use sqlx::types::BigDecimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct ProductRow {
    id: Uuid,
    shop_id: Uuid,
    shop_name: String,
    name: String,
    image_url: Option<String>,
    price: BigDecimal,
    stock_quantity: i32,
    is_active: bool,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            shop_id: row.shop_id,
            shop_name: row.shop_name,
            name: row.name,
            image_url: row.image_url,
            price: row.price,
            stock_quantity: row.stock_quantity,
            is_active: row.is_active,
        }
    }
}

/// Postgres-backed product catalog and stock counters
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for ProductRepository {
    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO products
             (id, shop_id, shop_name, name, image_url, price, stock_quantity, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(product.id)
        .bind(product.shop_id)
        .bind(&product.shop_name)
        .bind(&product.name)
        .bind(&product.image_url)
        .bind(&product.price)
        .bind(product.stock_quantity)
        .bind(product.is_active)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, DatabaseError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, shop_id, shop_name, name, image_url, price, stock_quantity, is_active
             FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(Product::from))
    }

    async fn reserve_stock(&self, id: Uuid, quantity: i32) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE products
             SET stock_quantity = stock_quantity - $2, updated_at = NOW()
             WHERE id = $1 AND stock_quantity >= $2",
        )
        .bind(id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish a short shelf from a missing product
        match self.find_product(id).await? {
            Some(_) => Ok(false),
            None => Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "product".to_string(),
                id: id.to_string(),
            })),
        }
    }

    async fn release_stock(&self, id: Uuid, quantity: i32) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE products
             SET stock_quantity = stock_quantity + $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "product".to_string(),
                id: id.to_string(),
            }));
        }
        Ok(())
    }
}
