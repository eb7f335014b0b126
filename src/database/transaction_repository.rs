use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{Repository, TransactionalRepository};
use async_trait::async_trait;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// A settled payment as reported by a gateway
#[derive(Debug, Clone, FromRow)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub gateway: String,
    pub gateway_transaction_id: String,
    pub gateway_subscription_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub plan_id: Option<String>,
    pub credit_package_id: Option<String>,
    pub description: String,
    pub credits_awarded: i64,
    pub status: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields for recording a new completed payment
#[derive(Debug, Clone)]
pub struct NewPaymentTransaction<'a> {
    pub user_id: Uuid,
    pub kind: &'a str,
    pub gateway: &'a str,
    pub gateway_transaction_id: &'a str,
    pub gateway_subscription_id: Option<&'a str>,
    pub amount: BigDecimal,
    pub currency: &'a str,
    pub plan_id: Option<&'a str>,
    pub credit_package_id: Option<&'a str>,
    pub description: &'a str,
    pub credits_awarded: i64,
}

/// Repository for the payment ledger
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a completed payment. The unique (gateway, gateway_transaction_id)
    /// constraint makes this the idempotency barrier: a replayed event comes
    /// back as a unique violation, which callers treat as already-processed.
    pub async fn record_completed(
        &self,
        new: NewPaymentTransaction<'_>,
    ) -> Result<PaymentTransaction, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            "INSERT INTO payment_transactions
             (user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
              amount, currency, plan_id, credit_package_id, description, credits_awarded, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'completed')
             RETURNING id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                       amount, currency, plan_id, credit_package_id, description, credits_awarded,
                       status, completed_at, created_at, updated_at",
        )
        .bind(new.user_id)
        .bind(new.kind)
        .bind(new.gateway)
        .bind(new.gateway_transaction_id)
        .bind(new.gateway_subscription_id)
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.plan_id)
        .bind(new.credit_package_id)
        .bind(new.description)
        .bind(new.credits_awarded)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find a payment by the reference the gateway assigned to it
    pub async fn find_by_gateway_reference(
        &self,
        gateway: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            "SELECT id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                    amount, currency, plan_id, credit_package_id, description, credits_awarded,
                    status, completed_at, created_at, updated_at
             FROM payment_transactions
             WHERE gateway = $1 AND gateway_transaction_id = $2",
        )
        .bind(gateway)
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Flip a completed payment to refunded. Returns None when the row is
    /// missing or not in 'completed' state, so a second refund cannot pass.
    pub async fn mark_refunded(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            "UPDATE payment_transactions
             SET status = 'refunded', updated_at = NOW()
             WHERE id = $1 AND status = 'completed'
             RETURNING id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                       amount, currency, plan_id, credit_package_id, description, credits_awarded,
                       status, completed_at, created_at, updated_at",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository for TransactionRepository {
    type Entity = PaymentTransaction;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;

        sqlx::query_as::<_, PaymentTransaction>(
            "SELECT id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                    amount, currency, plan_id, credit_package_id, description, credits_awarded,
                    status, completed_at, created_at, updated_at
             FROM payment_transactions
             WHERE id = $1",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            "SELECT id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                    amount, currency, plan_id, credit_package_id, description, credits_awarded,
                    status, completed_at, created_at, updated_at
             FROM payment_transactions
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert(&self, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(
            "INSERT INTO payment_transactions
             (user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
              amount, currency, plan_id, credit_package_id, description, credits_awarded, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                       amount, currency, plan_id, credit_package_id, description, credits_awarded,
                       status, completed_at, created_at, updated_at",
        )
        .bind(entity.user_id)
        .bind(&entity.kind)
        .bind(&entity.gateway)
        .bind(&entity.gateway_transaction_id)
        .bind(&entity.gateway_subscription_id)
        .bind(&entity.amount)
        .bind(&entity.currency)
        .bind(&entity.plan_id)
        .bind(&entity.credit_package_id)
        .bind(&entity.description)
        .bind(entity.credits_awarded)
        .bind(&entity.status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn update(&self, id: &str, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;

        sqlx::query_as::<_, PaymentTransaction>(
            "UPDATE payment_transactions
             SET user_id = $2, kind = $3, gateway = $4, gateway_transaction_id = $5,
                 gateway_subscription_id = $6, amount = $7, currency = $8, plan_id = $9,
                 credit_package_id = $10, description = $11, credits_awarded = $12,
                 status = $13, updated_at = NOW()
             WHERE id = $1
             RETURNING id, user_id, kind, gateway, gateway_transaction_id, gateway_subscription_id,
                       amount, currency, plan_id, credit_package_id, description, credits_awarded,
                       status, completed_at, created_at, updated_at",
        )
        .bind(uuid)
        .bind(entity.user_id)
        .bind(&entity.kind)
        .bind(&entity.gateway)
        .bind(&entity.gateway_transaction_id)
        .bind(&entity.gateway_subscription_id)
        .bind(&entity.amount)
        .bind(&entity.currency)
        .bind(&entity.plan_id)
        .bind(&entity.credit_package_id)
        .bind(&entity.description)
        .bind(entity.credits_awarded)
        .bind(&entity.status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;

        let result = sqlx::query("DELETE FROM payment_transactions WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

impl TransactionalRepository for TransactionRepository {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}
