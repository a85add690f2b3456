use crate::database::error::DatabaseError;
use crate::database::repository::{CallbackLogEntry, CallbackLogStore};
use crate::payments::types::Gateway;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct CallbackLogRow {
    id: Uuid,
    gateway: String,
    order_number: String,
    disposition: String,
    result_code: Option<String>,
    transaction_id: Option<String>,
    reason: Option<String>,
    needs_review: bool,
    raw_fields: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CallbackLogRow> for CallbackLogEntry {
    type Error = DatabaseError;

    fn try_from(row: CallbackLogRow) -> Result<Self, Self::Error> {
        Ok(CallbackLogEntry {
            id: row.id,
            gateway: Gateway::from_str(&row.gateway)
                .map_err(|e| DatabaseError::corrupt(e.to_string()))?,
            order_number: row.order_number,
            disposition: row.disposition,
            result_code: row.result_code,
            transaction_id: row.transaction_id,
            reason: row.reason,
            needs_review: row.needs_review,
            raw_fields: row.raw_fields.0,
            created_at: row.created_at,
        })
    }
}

/// Append-only log of every processed gateway callback
pub struct CallbackLogRepository {
    pool: PgPool,
}

impl CallbackLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallbackLogStore for CallbackLogRepository {
    async fn append(&self, entry: &CallbackLogEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO payment_callback_log
             (id, gateway, order_number, disposition, result_code, transaction_id,
              reason, needs_review, raw_fields, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(entry.gateway.as_str())
        .bind(&entry.order_number)
        .bind(&entry.disposition)
        .bind(&entry.result_code)
        .bind(&entry.transaction_id)
        .bind(&entry.reason)
        .bind(entry.needs_review)
        .bind(Json(&entry.raw_fields))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn list_for_review(&self, limit: i64) -> Result<Vec<CallbackLogEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, CallbackLogRow>(
            "SELECT id, gateway, order_number, disposition, result_code, transaction_id,
                    reason, needs_review, raw_fields, created_at
             FROM payment_callback_log
             WHERE needs_review
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(CallbackLogEntry::try_from).collect()
    }
}
