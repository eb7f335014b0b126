use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgPool};

/// Platform-wide billing settings, a single row
#[derive(Debug, Clone, FromRow)]
pub struct BillingSettings {
    pub id: i32,
    pub currency: String,
    pub currency_locked: bool,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for the billing settings singleton
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read the settings row, creating it if the seed is missing
    pub async fn get(&self) -> Result<BillingSettings, DatabaseError> {
        let existing = sqlx::query_as::<_, BillingSettings>(
            "SELECT id, currency, currency_locked, updated_at FROM billing_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match existing {
            Some(settings) => Ok(settings),
            None => sqlx::query_as::<_, BillingSettings>(
                "INSERT INTO billing_settings (id) VALUES (1)
                 ON CONFLICT (id) DO UPDATE SET id = 1
                 RETURNING id, currency, currency_locked, updated_at",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx),
        }
    }

    /// Change the platform currency. Returns None when the currency is
    /// locked, so the write guard lives in the statement itself.
    pub async fn set_currency(
        &self,
        currency: &str,
    ) -> Result<Option<BillingSettings>, DatabaseError> {
        sqlx::query_as::<_, BillingSettings>(
            "UPDATE billing_settings
             SET currency = $1, updated_at = NOW()
             WHERE id = 1 AND currency_locked = FALSE
             RETURNING id, currency, currency_locked, updated_at",
        )
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Lock the currency permanently. Idempotent.
    pub async fn lock_currency(&self) -> Result<BillingSettings, DatabaseError> {
        sqlx::query_as::<_, BillingSettings>(
            "UPDATE billing_settings
             SET currency_locked = TRUE, updated_at = NOW()
             WHERE id = 1
             RETURNING id, currency, currency_locked, updated_at",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
