use crate::database::error::DatabaseError;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// One processed billing action, as recorded for the audit trail
#[derive(Debug, Clone, FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub gateway: String,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for the payment audit log
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one audit row
    pub async fn append(
        &self,
        gateway: &str,
        user_id: Option<Uuid>,
        action: &str,
        amount: Option<BigDecimal>,
        currency: Option<&str>,
        detail: serde_json::Value,
    ) -> Result<AuditRecord, DatabaseError> {
        sqlx::query_as::<_, AuditRecord>(
            "INSERT INTO payment_audit_log (gateway, user_id, action, amount, currency, detail)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, gateway, user_id, action, amount, currency, detail, created_at",
        )
        .bind(gateway)
        .bind(user_id)
        .bind(action)
        .bind(amount)
        .bind(currency)
        .bind(detail)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
