//! Platform currency settings
//!
//! The platform charges in exactly one currency. Operators can change it
//! freely until the first lock; locking is one-way and survives restarts
//! because the flag lives on the settings row, not in process state.

use crate::database::settings_repository::{BillingSettings, SettingsRepository};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::services::payment_audit::PaymentAuditService;
use tracing::info;
use uuid::Uuid;

/// Audit rows for settings changes carry this in the gateway column
const PLATFORM_SCOPE: &str = "platform";

/// Uppercase a currency code, rejecting anything that is not three
/// ASCII letters.
fn normalize_currency_code(code: &str) -> AppResult<String> {
    let trimmed = code.trim();
    if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidCurrency {
                currency: code.to_string(),
                reason: "currency must be a three-letter code".to_string(),
            },
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

pub struct CurrencyService {
    settings_repo: SettingsRepository,
    audit: PaymentAuditService,
}

impl CurrencyService {
    pub fn new(settings_repo: SettingsRepository, audit: PaymentAuditService) -> Self {
        Self {
            settings_repo,
            audit,
        }
    }

    pub async fn get(&self) -> AppResult<BillingSettings> {
        Ok(self.settings_repo.get().await?)
    }

    /// Change the platform currency. Fails once the currency is locked.
    pub async fn set_currency(&self, code: &str, actor: Uuid) -> AppResult<BillingSettings> {
        let code = normalize_currency_code(code)?;
        let before = self.settings_repo.get().await?;
        if before.currency_locked {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::CurrencyLocked {
                    currency: before.currency,
                },
            )));
        }

        // The guarded UPDATE returns nothing if a lock landed between the
        // read above and this write.
        let updated = self
            .settings_repo
            .set_currency(&code)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::CurrencyLocked {
                    currency: before.currency.clone(),
                }))
            })?;

        info!(from = %before.currency, to = %updated.currency, actor = %actor, "platform currency changed");
        self.audit
            .record(
                PLATFORM_SCOPE,
                Some(actor),
                "currency_updated",
                None,
                Some(&updated.currency),
                serde_json::json!({
                    "from": before.currency,
                    "to": updated.currency,
                }),
            )
            .await;

        Ok(updated)
    }

    /// Lock the currency permanently. Replaying the lock is harmless.
    pub async fn lock(&self, actor: Uuid) -> AppResult<BillingSettings> {
        let settings = self.settings_repo.lock_currency().await?;

        info!(currency = %settings.currency, actor = %actor, "platform currency locked");
        self.audit
            .record(
                PLATFORM_SCOPE,
                Some(actor),
                "currency_locked",
                None,
                Some(&settings.currency),
                serde_json::json!({ "currency": settings.currency }),
            )
            .await;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn lowercase_codes_are_normalized() {
        assert_eq!(normalize_currency_code("usd").unwrap(), "USD");
        assert_eq!(normalize_currency_code(" brl ").unwrap(), "BRL");
    }

    #[test]
    fn malformed_codes_are_rejected() {
        for code in ["US", "USDT", "U$D", "", "12A"] {
            let err = normalize_currency_code(code).unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::ValidationError, "{code}");
            assert_eq!(err.status_code(), 400);
        }
    }
}
