use crate::database::error::{DatabaseError, DatabaseErrorKind};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One signed movement of a user's credit balance
#[derive(Debug, Clone, FromRow)]
pub struct CreditLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delta: i64,
    pub balance_after: i64,
    pub entry_type: String,
    pub description: String,
    pub idempotency_key: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for the append-only credit ledger. All balance arithmetic
/// happens inside single UPDATE statements so concurrent webhooks can
/// never lose an increment.
pub struct CreditLedgerRepository {
    pool: PgPool,
}

impl CreditLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Grant credits and record the ledger entry. A duplicate
    /// idempotency_key surfaces as a unique violation and the grant is
    /// rolled back with it.
    pub async fn add_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_type: &str,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<CreditLedgerEntry, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let balance_after: Option<i64> = sqlx::query_scalar(
            "UPDATE users
             SET credits = credits + $2, updated_at = NOW()
             WHERE id = $1
             RETURNING credits",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let balance_after = match balance_after {
            Some(balance) => balance,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                    entity: "user".to_string(),
                    id: user_id.to_string(),
                }));
            }
        };

        let entry = sqlx::query_as::<_, CreditLedgerEntry>(
            "INSERT INTO credit_ledger
             (user_id, delta, balance_after, entry_type, description, idempotency_key)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, user_id, delta, balance_after, entry_type, description,
                       idempotency_key, created_at",
        )
        .bind(user_id)
        .bind(amount)
        .bind(balance_after)
        .bind(entry_type)
        .bind(description)
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(entry)
    }

    /// Claw credits back, flooring the balance at zero. The recorded delta
    /// is what was actually removed, which can be less than `amount` when
    /// the user already spent part of the grant.
    pub async fn reverse_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_type: &str,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<CreditLedgerEntry, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Single statement: lock the row, floor the subtraction, report
        // both sides of the balance.
        let balances: Option<(i64, i64)> = sqlx::query_as(
            "WITH before AS (
                 SELECT credits FROM users WHERE id = $1 FOR UPDATE
             ), updated AS (
                 UPDATE users
                 SET credits = GREATEST(credits - $2, 0), updated_at = NOW()
                 WHERE id = $1
                 RETURNING credits
             )
             SELECT before.credits, updated.credits FROM before, updated",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let (balance_before, balance_after) = match balances {
            Some(pair) => pair,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                    entity: "user".to_string(),
                    id: user_id.to_string(),
                }));
            }
        };

        let applied = balance_before - balance_after;

        let entry = sqlx::query_as::<_, CreditLedgerEntry>(
            "INSERT INTO credit_ledger
             (user_id, delta, balance_after, entry_type, description, idempotency_key)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, user_id, delta, balance_after, entry_type, description,
                       idempotency_key, created_at",
        )
        .bind(user_id)
        .bind(-applied)
        .bind(balance_after)
        .bind(entry_type)
        .bind(description)
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(entry)
    }

    /// Look up the entry a given idempotency key already produced
    pub async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<CreditLedgerEntry>, DatabaseError> {
        sqlx::query_as::<_, CreditLedgerEntry>(
            "SELECT id, user_id, delta, balance_after, entry_type, description,
                    idempotency_key, created_at
             FROM credit_ledger
             WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
