//! Credit ledger service
//! The only write path to a user's balance. Balance changes happen in a
//! single atomic statement and every mutation leaves a ledger row.

use crate::database::credit_ledger_repository::{CreditLedgerEntry, CreditLedgerRepository};
use crate::database::error::DatabaseError;
use tracing::info;
use uuid::Uuid;

/// What a ledger mutation did. `AlreadyApplied` means the idempotency key
/// was seen before and the balance is untouched.
#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    Applied(CreditLedgerEntry),
    AlreadyApplied,
}

pub struct CreditLedgerService {
    ledger_repo: CreditLedgerRepository,
}

impl CreditLedgerService {
    pub fn new(ledger_repo: CreditLedgerRepository) -> Self {
        Self { ledger_repo }
    }

    /// Add credits. Replays carrying the same key land on the ledger's
    /// unique index and come back as `AlreadyApplied`.
    pub async fn grant(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_type: &str,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<LedgerOutcome, DatabaseError> {
        match self
            .ledger_repo
            .add_credits(user_id, amount, entry_type, description, idempotency_key)
            .await
        {
            Ok(entry) => {
                info!(
                    user_id = %user_id,
                    amount = amount,
                    balance_after = entry.balance_after,
                    entry_type = %entry_type,
                    "credits granted"
                );
                Ok(LedgerOutcome::Applied(entry))
            }
            Err(e) if e.is_unique_violation() => Ok(LedgerOutcome::AlreadyApplied),
            Err(e) => Err(e),
        }
    }

    /// Remove credits with a floor at zero. The ledger row records the
    /// delta actually applied, which may be smaller than requested when
    /// the balance was already partially spent.
    pub async fn reverse(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_type: &str,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<LedgerOutcome, DatabaseError> {
        match self
            .ledger_repo
            .reverse_credits(user_id, amount, entry_type, description, idempotency_key)
            .await
        {
            Ok(entry) => {
                info!(
                    user_id = %user_id,
                    requested = amount,
                    applied = -entry.delta,
                    balance_after = entry.balance_after,
                    "credits reversed"
                );
                Ok(LedgerOutcome::Applied(entry))
            }
            Err(e) if e.is_unique_violation() => Ok(LedgerOutcome::AlreadyApplied),
            Err(e) => Err(e),
        }
    }

    /// Look up the ledger row behind an idempotency key, for recovery
    /// paths that need the originally applied delta.
    pub async fn entry_for_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<CreditLedgerEntry>, DatabaseError> {
        self.ledger_repo.find_by_idempotency_key(idempotency_key).await
    }
}
