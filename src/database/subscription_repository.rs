use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{Repository, TransactionalRepository};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Subscription entity
#[derive(Debug, Clone, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub status: String,
    pub stripe_subscription_id: Option<String>,
    pub mercado_pago_subscription_id: Option<String>,
    pub lemon_squeezy_subscription_id: Option<String>,
    pub current_period_start: chrono::DateTime<chrono::Utc>,
    pub current_period_end: chrono::DateTime<chrono::Utc>,
    pub cancel_at_period_end: bool,
    pub billing_period: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for subscriptions
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a subscription by the external reference a gateway assigned to it
    pub async fn find_by_gateway_reference(
        &self,
        gateway: &str,
        subscription_ref: &str,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let query = match gateway {
            "stripe" => {
                "SELECT id, user_id, plan_id, status, stripe_subscription_id,
                        mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                        current_period_start, current_period_end, cancel_at_period_end,
                        billing_period, created_at, updated_at
                 FROM subscriptions WHERE stripe_subscription_id = $1"
            }
            "mercado_pago" => {
                "SELECT id, user_id, plan_id, status, stripe_subscription_id,
                        mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                        current_period_start, current_period_end, cancel_at_period_end,
                        billing_period, created_at, updated_at
                 FROM subscriptions WHERE mercado_pago_subscription_id = $1"
            }
            "lemon_squeezy" => {
                "SELECT id, user_id, plan_id, status, stripe_subscription_id,
                        mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                        current_period_start, current_period_end, cancel_at_period_end,
                        billing_period, created_at, updated_at
                 FROM subscriptions WHERE lemon_squeezy_subscription_id = $1"
            }
            other => {
                return Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                    message: format!("No subscription id column for gateway '{}'", other),
                }))
            }
        };

        sqlx::query_as::<_, Subscription>(query)
            .bind(subscription_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Activate a subscription for a user. Reuses the live row when one
    /// exists (a plan change or gateway switch), otherwise inserts. Only
    /// the paying gateway's external id survives; the other columns are
    /// cleared so a stale reference can never route events to this row.
    pub async fn activate(
        &self,
        user_id: Uuid,
        plan_id: &str,
        gateway: &str,
        gateway_subscription_id: Option<&str>,
        period_start: chrono::DateTime<chrono::Utc>,
        period_end: chrono::DateTime<chrono::Utc>,
    ) -> Result<Subscription, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let existing = sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, plan_id, status, stripe_subscription_id,
                    mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                    current_period_start, current_period_end, cancel_at_period_end,
                    billing_period, created_at, updated_at
             FROM subscriptions
             WHERE user_id = $1 AND status <> 'cancelled'
             FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let subscription = match existing {
            Some(current) => {
                sqlx::query_as::<_, Subscription>(
                    "UPDATE subscriptions
                     SET plan_id = $2, status = 'active',
                         stripe_subscription_id = CASE WHEN $3 = 'stripe' THEN $4 END,
                         mercado_pago_subscription_id = CASE WHEN $3 = 'mercado_pago' THEN $4 END,
                         lemon_squeezy_subscription_id = CASE WHEN $3 = 'lemon_squeezy' THEN $4 END,
                         current_period_start = $5, current_period_end = $6,
                         cancel_at_period_end = FALSE, updated_at = NOW()
                     WHERE id = $1
                     RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                               mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                               current_period_start, current_period_end, cancel_at_period_end,
                               billing_period, created_at, updated_at",
                )
                .bind(current.id)
                .bind(plan_id)
                .bind(gateway)
                .bind(gateway_subscription_id)
                .bind(period_start)
                .bind(period_end)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
            }
            None => {
                sqlx::query_as::<_, Subscription>(
                    "INSERT INTO subscriptions
                     (user_id, plan_id, status,
                      stripe_subscription_id, mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                      current_period_start, current_period_end)
                     VALUES ($1, $2, 'active',
                             CASE WHEN $3 = 'stripe' THEN $4 END,
                             CASE WHEN $3 = 'mercado_pago' THEN $4 END,
                             CASE WHEN $3 = 'lemon_squeezy' THEN $4 END,
                             $5, $6)
                     RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                               mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                               current_period_start, current_period_end, cancel_at_period_end,
                               billing_period, created_at, updated_at",
                )
                .bind(user_id)
                .bind(plan_id)
                .bind(gateway)
                .bind(gateway_subscription_id)
                .bind(period_start)
                .bind(period_end)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
            }
        };

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(subscription)
    }

    /// Set the subscription status
    pub async fn update_status(
        &self,
        subscription_id: Uuid,
        status: &str,
    ) -> Result<Subscription, DatabaseError> {
        sqlx::query_as::<_, Subscription>(
            "UPDATE subscriptions
             SET status = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                       mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                       current_period_start, current_period_end, cancel_at_period_end,
                       billing_period, created_at, updated_at",
        )
        .bind(subscription_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Advance the billing period after a successful renewal
    pub async fn update_period(
        &self,
        subscription_id: Uuid,
        period_start: chrono::DateTime<chrono::Utc>,
        period_end: chrono::DateTime<chrono::Utc>,
    ) -> Result<Subscription, DatabaseError> {
        sqlx::query_as::<_, Subscription>(
            "UPDATE subscriptions
             SET status = 'active', current_period_start = $2, current_period_end = $3,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                       mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                       current_period_start, current_period_end, cancel_at_period_end,
                       billing_period, created_at, updated_at",
        )
        .bind(subscription_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record a plan-level change pushed by the gateway
    pub async fn set_cancel_at_period_end(
        &self,
        subscription_id: Uuid,
        cancel_at_period_end: bool,
        period_end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Subscription, DatabaseError> {
        sqlx::query_as::<_, Subscription>(
            "UPDATE subscriptions
             SET cancel_at_period_end = $2,
                 current_period_end = COALESCE($3, current_period_end),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                       mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                       current_period_start, current_period_end, cancel_at_period_end,
                       billing_period, created_at, updated_at",
        )
        .bind(subscription_id)
        .bind(cancel_at_period_end)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository for SubscriptionRepository {
    type Entity = Subscription;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;

        sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, plan_id, status, stripe_subscription_id,
                    mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                    current_period_start, current_period_end, cancel_at_period_end,
                    billing_period, created_at, updated_at
             FROM subscriptions WHERE id = $1",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, plan_id, status, stripe_subscription_id,
                    mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                    current_period_start, current_period_end, cancel_at_period_end,
                    billing_period, created_at, updated_at
             FROM subscriptions ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert(&self, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError> {
        sqlx::query_as::<_, Subscription>(
            "INSERT INTO subscriptions
             (user_id, plan_id, status, stripe_subscription_id, mercado_pago_subscription_id,
              lemon_squeezy_subscription_id, current_period_start, current_period_end,
              cancel_at_period_end, billing_period)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                       mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                       current_period_start, current_period_end, cancel_at_period_end,
                       billing_period, created_at, updated_at",
        )
        .bind(entity.user_id)
        .bind(&entity.plan_id)
        .bind(&entity.status)
        .bind(&entity.stripe_subscription_id)
        .bind(&entity.mercado_pago_subscription_id)
        .bind(&entity.lemon_squeezy_subscription_id)
        .bind(entity.current_period_start)
        .bind(entity.current_period_end)
        .bind(entity.cancel_at_period_end)
        .bind(&entity.billing_period)
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

        sqlx::query_as::<_, Subscription>(
            "UPDATE subscriptions
             SET user_id = $2, plan_id = $3, status = $4, stripe_subscription_id = $5,
                 mercado_pago_subscription_id = $6, lemon_squeezy_subscription_id = $7,
                 current_period_start = $8, current_period_end = $9,
                 cancel_at_period_end = $10, billing_period = $11, updated_at = NOW()
             WHERE id = $1
             RETURNING id, user_id, plan_id, status, stripe_subscription_id,
                       mercado_pago_subscription_id, lemon_squeezy_subscription_id,
                       current_period_start, current_period_end, cancel_at_period_end,
                       billing_period, created_at, updated_at",
        )
        .bind(uuid)
        .bind(entity.user_id)
        .bind(&entity.plan_id)
        .bind(&entity.status)
        .bind(&entity.stripe_subscription_id)
        .bind(&entity.mercado_pago_subscription_id)
        .bind(&entity.lemon_squeezy_subscription_id)
        .bind(entity.current_period_start)
        .bind(entity.current_period_end)
        .bind(entity.cancel_at_period_end)
        .bind(&entity.billing_period)
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

        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

impl TransactionalRepository for SubscriptionRepository {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}
