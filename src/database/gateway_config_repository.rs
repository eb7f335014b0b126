use crate::database::error::DatabaseError;
use crate::database::repository::{Repository, TransactionalRepository};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

/// Per-gateway configuration row. `is_enabled = NULL` means "no explicit
/// toggle": the gateway counts as enabled whenever credentials exist.
/// Settings may carry credential overrides that take precedence over env.
#[derive(Debug, Clone, FromRow)]
pub struct GatewayConfig {
    pub gateway: String,
    pub is_enabled: Option<bool>,
    pub settings: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for gateway configurations
pub struct GatewayConfigRepository {
    pool: PgPool,
}

impl GatewayConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find configuration by gateway name
    pub async fn find_by_gateway(
        &self,
        gateway: &str,
    ) -> Result<Option<GatewayConfig>, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "SELECT gateway, is_enabled, settings, created_at, updated_at
             FROM gateway_configs
             WHERE gateway = $1",
        )
        .bind(gateway)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Flip the explicit enable toggle
    pub async fn set_enabled(
        &self,
        gateway: &str,
        is_enabled: bool,
    ) -> Result<GatewayConfig, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "INSERT INTO gateway_configs (gateway, is_enabled)
             VALUES ($1, $2)
             ON CONFLICT (gateway)
             DO UPDATE SET is_enabled = $2, updated_at = NOW()
             RETURNING gateway, is_enabled, settings, created_at, updated_at",
        )
        .bind(gateway)
        .bind(is_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Replace the settings blob
    pub async fn update_settings(
        &self,
        gateway: &str,
        settings: serde_json::Value,
    ) -> Result<GatewayConfig, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "INSERT INTO gateway_configs (gateway, settings)
             VALUES ($1, $2)
             ON CONFLICT (gateway)
             DO UPDATE SET settings = $2, updated_at = NOW()
             RETURNING gateway, is_enabled, settings, created_at, updated_at",
        )
        .bind(gateway)
        .bind(settings)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Create or update a gateway configuration
    pub async fn upsert(
        &self,
        gateway: &str,
        is_enabled: Option<bool>,
        settings: serde_json::Value,
    ) -> Result<GatewayConfig, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "INSERT INTO gateway_configs (gateway, is_enabled, settings)
             VALUES ($1, $2, $3)
             ON CONFLICT (gateway)
             DO UPDATE SET is_enabled = $2, settings = $3, updated_at = NOW()
             RETURNING gateway, is_enabled, settings, created_at, updated_at",
        )
        .bind(gateway)
        .bind(is_enabled)
        .bind(settings)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository for GatewayConfigRepository {
    type Entity = GatewayConfig;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        self.find_by_gateway(id).await
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "SELECT gateway, is_enabled, settings, created_at, updated_at
             FROM gateway_configs
             ORDER BY gateway",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert(&self, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "INSERT INTO gateway_configs (gateway, is_enabled, settings)
             VALUES ($1, $2, $3)
             RETURNING gateway, is_enabled, settings, created_at, updated_at",
        )
        .bind(&entity.gateway)
        .bind(entity.is_enabled)
        .bind(&entity.settings)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn update(&self, id: &str, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(
            "UPDATE gateway_configs
             SET is_enabled = $2, settings = $3, updated_at = NOW()
             WHERE gateway = $1
             RETURNING gateway, is_enabled, settings, created_at, updated_at",
        )
        .bind(id)
        .bind(entity.is_enabled)
        .bind(&entity.settings)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM gateway_configs WHERE gateway = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

impl TransactionalRepository for GatewayConfigRepository {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_creation() {
        let config = GatewayConfig {
            gateway: "stripe".to_string(),
            is_enabled: None,
            settings: serde_json::json!({"webhook_secret": "whsec_test"}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        assert_eq!(config.gateway, "stripe");
        assert!(config.is_enabled.is_none());
    }
}
