use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{Repository, TransactionalRepository};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// User entity as the billing service sees it
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub credits: i64,
    pub is_active: bool,
    pub is_admin: bool,
    pub plan_type: String,
    pub plan_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub stripe_customer_id: Option<String>,
    pub mercado_pago_customer_id: Option<String>,
    pub lemon_squeezy_customer_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for user billing state
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a user by primary key
    pub async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                    stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                    created_at, updated_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Store the customer reference a gateway assigned to this user
    pub async fn set_gateway_customer_id(
        &self,
        user_id: Uuid,
        gateway: &str,
        customer_id: &str,
    ) -> Result<User, DatabaseError> {
        let query = match gateway {
            "stripe" => {
                "UPDATE users SET stripe_customer_id = $2, updated_at = NOW()
                 WHERE id = $1
                 RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                           stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                           created_at, updated_at"
            }
            "mercado_pago" => {
                "UPDATE users SET mercado_pago_customer_id = $2, updated_at = NOW()
                 WHERE id = $1
                 RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                           stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                           created_at, updated_at"
            }
            "lemon_squeezy" => {
                "UPDATE users SET lemon_squeezy_customer_id = $2, updated_at = NOW()
                 WHERE id = $1
                 RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                           stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                           created_at, updated_at"
            }
            other => {
                return Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                    message: format!("No customer id column for gateway '{}'", other),
                }))
            }
        };

        sqlx::query_as::<_, User>(query)
            .bind(user_id)
            .bind(customer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Set the user's plan and its expiry
    pub async fn update_plan(
        &self,
        user_id: Uuid,
        plan_type: &str,
        plan_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>(
            "UPDATE users
             SET plan_type = $2, plan_expires_at = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                       stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                       created_at, updated_at",
        )
        .bind(user_id)
        .bind(plan_type)
        .bind(plan_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Deactivate the account. Used when a chargeback is opened.
    pub async fn suspend(&self, user_id: Uuid) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>(
            "UPDATE users
             SET is_active = FALSE, updated_at = NOW()
             WHERE id = $1
             RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                       stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                       created_at, updated_at",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository for UserRepository {
    type Entity = User;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;

        self.find_by_user_id(uuid).await
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                    stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                    created_at, updated_at
             FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert(&self, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users
             (email, credits, is_active, is_admin, plan_type, plan_expires_at,
              stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                       stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                       created_at, updated_at",
        )
        .bind(&entity.email)
        .bind(entity.credits)
        .bind(entity.is_active)
        .bind(entity.is_admin)
        .bind(&entity.plan_type)
        .bind(entity.plan_expires_at)
        .bind(&entity.stripe_customer_id)
        .bind(&entity.mercado_pago_customer_id)
        .bind(&entity.lemon_squeezy_customer_id)
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

        sqlx::query_as::<_, User>(
            "UPDATE users
             SET email = $2, credits = $3, is_active = $4, is_admin = $5, plan_type = $6,
                 plan_expires_at = $7, stripe_customer_id = $8, mercado_pago_customer_id = $9,
                 lemon_squeezy_customer_id = $10, updated_at = NOW()
             WHERE id = $1
             RETURNING id, email, credits, is_active, is_admin, plan_type, plan_expires_at,
                       stripe_customer_id, mercado_pago_customer_id, lemon_squeezy_customer_id,
                       created_at, updated_at",
        )
        .bind(uuid)
        .bind(&entity.email)
        .bind(entity.credits)
        .bind(entity.is_active)
        .bind(entity.is_admin)
        .bind(&entity.plan_type)
        .bind(entity.plan_expires_at)
        .bind(&entity.stripe_customer_id)
        .bind(&entity.mercado_pago_customer_id)
        .bind(&entity.lemon_squeezy_customer_id)
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

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

impl TransactionalRepository for UserRepository {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}
