use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A webhook delivery parked for retry
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub gateway: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for the webhook retry queue
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a delivery for retry. Deduplicates on (gateway, event_id): a
    /// second enqueue of the same event touches updated_at and leaves the
    /// existing row (including a completed one) alone.
    pub async fn enqueue(
        &self,
        gateway: &str,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        error: &str,
    ) -> Result<WebhookDelivery, DatabaseError> {
        sqlx::query_as::<_, WebhookDelivery>(
            "INSERT INTO webhook_deliveries (gateway, event_id, event_type, payload, last_error)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (gateway, event_id) DO UPDATE SET updated_at = NOW()
             RETURNING id, gateway, event_id, event_type, payload, status, attempts,
                       last_error, next_attempt_at, created_at, updated_at",
        )
        .bind(gateway)
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Claim due deliveries for processing. SKIP LOCKED keeps concurrent
    /// workers from double-claiming; each claim counts as an attempt.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<WebhookDelivery>, DatabaseError> {
        sqlx::query_as::<_, WebhookDelivery>(
            "UPDATE webhook_deliveries
             SET status = 'processing', attempts = attempts + 1, updated_at = NOW()
             WHERE id IN (
                 SELECT id FROM webhook_deliveries
                 WHERE status = 'pending' AND next_attempt_at <= NOW()
                 ORDER BY next_attempt_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, gateway, event_id, event_type, payload, status, attempts,
                       last_error, next_attempt_at, created_at, updated_at",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Replay succeeded
    pub async fn mark_completed(&self, id: Uuid) -> Result<WebhookDelivery, DatabaseError> {
        sqlx::query_as::<_, WebhookDelivery>(
            "UPDATE webhook_deliveries
             SET status = 'completed', last_error = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING id, gateway, event_id, event_type, payload, status, attempts,
                       last_error, next_attempt_at, created_at, updated_at",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Replay failed. The caller decides the backoff and whether the
    /// delivery is out of attempts.
    pub async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: chrono::DateTime<chrono::Utc>,
        exhausted: bool,
    ) -> Result<WebhookDelivery, DatabaseError> {
        sqlx::query_as::<_, WebhookDelivery>(
            "UPDATE webhook_deliveries
             SET status = CASE WHEN $4 THEN 'failed' ELSE 'pending' END,
                 last_error = $2, next_attempt_at = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING id, gateway, event_id, event_type, payload, status, attempts,
                       last_error, next_attempt_at, created_at, updated_at",
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .bind(exhausted)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Deliveries still waiting for a retry
    pub async fn pending_count(&self) -> Result<i64, DatabaseError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM webhook_deliveries WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
