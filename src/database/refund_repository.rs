use crate::database::error::DatabaseError;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Refund record tied to exactly one payment transaction
#[derive(Debug, Clone, FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: String,
    pub gateway_refund_id: Option<String>,
    pub reason: String,
    pub initiated_by: String,
    pub status: String,
    pub credits_reversed: i64,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Fields for recording a refund
#[derive(Debug, Clone)]
pub struct NewRefund<'a> {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: &'a str,
    pub gateway: &'a str,
    pub gateway_refund_id: Option<&'a str>,
    pub reason: &'a str,
    pub initiated_by: &'a str,
    pub credits_reversed: i64,
    pub metadata: serde_json::Value,
}

/// Repository for refunds
pub struct RefundRepository {
    pool: PgPool,
}

impl RefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a refund. The unique transaction_id constraint rejects a
    /// second refund for the same payment as a unique violation.
    pub async fn create(&self, new: NewRefund<'_>) -> Result<Refund, DatabaseError> {
        sqlx::query_as::<_, Refund>(
            "INSERT INTO refunds
             (transaction_id, user_id, amount, currency, gateway, gateway_refund_id,
              reason, initiated_by, status, credits_reversed, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed', $9, $10)
             RETURNING id, transaction_id, user_id, amount, currency, gateway,
                       gateway_refund_id, reason, initiated_by, status, credits_reversed,
                       metadata, created_at",
        )
        .bind(new.transaction_id)
        .bind(new.user_id)
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.gateway)
        .bind(new.gateway_refund_id)
        .bind(new.reason)
        .bind(new.initiated_by)
        .bind(new.credits_reversed)
        .bind(new.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// The refund for a given payment, if one exists
    pub async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(
            "SELECT id, transaction_id, user_id, amount, currency, gateway,
                    gateway_refund_id, reason, initiated_by, status, credits_reversed,
                    metadata, created_at
             FROM refunds
             WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
