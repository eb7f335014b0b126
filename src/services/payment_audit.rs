//! Payment audit service
//! Append-only compliance trail, separate from the primary ledger tables.

use crate::database::audit_repository::AuditRepository;
use sqlx::types::BigDecimal;
use tracing::error;
use uuid::Uuid;

pub struct PaymentAuditService {
    repo: AuditRepository,
}

impl PaymentAuditService {
    pub fn new(repo: AuditRepository) -> Self {
        Self { repo }
    }

    /// Append one audit row. A failed append is logged and swallowed; the
    /// ledger write it describes has already committed and must stand.
    pub async fn record(
        &self,
        gateway: &str,
        user_id: Option<Uuid>,
        action: &str,
        amount: Option<BigDecimal>,
        currency: Option<&str>,
        detail: serde_json::Value,
    ) {
        if let Err(e) = self
            .repo
            .append(gateway, user_id, action, amount, currency, detail)
            .await
        {
            error!(
                gateway = %gateway,
                action = %action,
                error = %e,
                "failed to append audit record"
            );
        }
    }

    /// Flag an event that referenced something we do not know about, so
    /// an operator can reconcile it manually.
    pub async fn flag_for_reconciliation(
        &self,
        gateway: &str,
        event_type: &str,
        reference: &str,
        note: &str,
    ) {
        self.record(
            gateway,
            None,
            "reconciliation_required",
            None,
            None,
            serde_json::json!({
                "event_type": event_type,
                "reference": reference,
                "note": note,
            }),
        )
        .await;
    }
}
