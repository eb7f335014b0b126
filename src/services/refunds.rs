//! Refund and dispute handler
//! One state machine per transaction: completed -> refunded, terminal.
//! Chargebacks additionally suspend the account; voluntary refunds never
//! do.

use crate::database::credit_ledger_repository::CreditLedgerRepository;
use crate::database::refund_repository::{NewRefund, Refund, RefundRepository};
use crate::database::repository::Repository;
use crate::database::transaction_repository::{PaymentTransaction, TransactionRepository};
use crate::database::user_repository::UserRepository;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::GatewayName;
use crate::services::credits::{CreditLedgerService, LedgerOutcome};
use crate::services::dispatch::SideEffects;
use crate::services::payment_audit::PaymentAuditService;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Where a refund came from; decides reason codes, suspension, and
/// whether we must call the gateway's refund API ourselves.
#[derive(Debug, Clone)]
pub enum RefundTrigger<'a> {
    Admin {
        admin_user_id: Uuid,
        gateway_refund_id: Option<&'a str>,
        note: Option<&'a str>,
    },
    Gateway {
        gateway_refund_id: Option<&'a str>,
    },
    Chargeback {
        reason: &'a str,
    },
}

impl RefundTrigger<'_> {
    fn reason_code(&self) -> &'static str {
        match self {
            RefundTrigger::Admin { .. } => "admin_initiated",
            RefundTrigger::Gateway { .. } => "gateway_refund",
            RefundTrigger::Chargeback { .. } => "chargeback",
        }
    }

    fn initiated_by(&self) -> &'static str {
        match self {
            RefundTrigger::Admin { .. } => "admin",
            RefundTrigger::Gateway { .. } | RefundTrigger::Chargeback { .. } => "gateway",
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            RefundTrigger::Admin { .. } => "admin_refund",
            RefundTrigger::Gateway { .. } => "refund_processed",
            RefundTrigger::Chargeback { .. } => "dispute_processed",
        }
    }

    fn gateway_refund_id(&self) -> Option<&str> {
        match self {
            RefundTrigger::Admin {
                gateway_refund_id, ..
            }
            | RefundTrigger::Gateway { gateway_refund_id } => *gateway_refund_id,
            RefundTrigger::Chargeback { .. } => None,
        }
    }

    fn human_reason(&self) -> String {
        match self {
            RefundTrigger::Admin { note, .. } => note
                .map(str::to_string)
                .unwrap_or_else(|| "Refund initiated by administrator".to_string()),
            RefundTrigger::Gateway { .. } => "Refund issued by payment gateway".to_string(),
            RefundTrigger::Chargeback { reason } => format!("Chargeback opened: {}", reason),
        }
    }
}

/// Result of applying a refund, including the no-op replay case
#[derive(Debug)]
pub struct RefundRecord {
    pub refund: Refund,
    pub credits_reversed: i64,
    pub user_suspended: bool,
    pub already_processed: bool,
}

pub struct RefundService {
    transaction_repo: TransactionRepository,
    refund_repo: RefundRepository,
    user_repo: UserRepository,
    credits: CreditLedgerService,
    audit: PaymentAuditService,
    effects: SideEffects,
    factory: Arc<GatewayFactory>,
}

impl RefundService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_repo: TransactionRepository,
        refund_repo: RefundRepository,
        user_repo: UserRepository,
        ledger_repo: CreditLedgerRepository,
        audit: PaymentAuditService,
        effects: SideEffects,
        factory: Arc<GatewayFactory>,
    ) -> Self {
        Self {
            transaction_repo,
            refund_repo,
            user_repo,
            credits: CreditLedgerService::new(ledger_repo),
            audit,
            effects,
            factory,
        }
    }

    /// Admin-initiated refund: create the refund at the gateway first,
    /// then run the same local application as a gateway-originated event.
    /// Replayed attempts fail with `AlreadyRefunded` instead of silently
    /// succeeding, so an operator sees the conflict.
    pub async fn initiate_refund(
        &self,
        transaction_id: Uuid,
        admin_user_id: Uuid,
        note: Option<&str>,
    ) -> AppResult<RefundRecord> {
        let tx = self
            .transaction_repo
            .find_by_id(&transaction_id.to_string())
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: transaction_id.to_string(),
                }))
            })?;

        if self.refund_repo.find_by_transaction(tx.id).await?.is_some()
            || tx.status == "refunded"
        {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::AlreadyRefunded {
                    transaction_id: transaction_id.to_string(),
                },
            )));
        }
        if tx.status != "completed" {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::RefundNotAllowed {
                    transaction_id: transaction_id.to_string(),
                    reason: format!("transaction status is {}", tx.status),
                },
            )));
        }

        let gateway_name = GatewayName::from_str(&tx.gateway)?;
        let gateway = self
            .factory
            .get(gateway_name)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::RefundNotAllowed {
                    transaction_id: transaction_id.to_string(),
                    reason: format!("gateway {} is not configured", tx.gateway),
                }))
            })?;

        let gateway_refund = gateway
            .create_refund(&tx.gateway_transaction_id, &tx.amount, &tx.currency)
            .await?;

        info!(
            transaction_id = %tx.id,
            admin = %admin_user_id,
            gateway_refund_id = ?gateway_refund.gateway_refund_id,
            "gateway accepted admin refund"
        );

        self.apply(
            tx,
            RefundTrigger::Admin {
                admin_user_id,
                gateway_refund_id: gateway_refund.gateway_refund_id.as_deref(),
                note,
            },
        )
        .await
    }

    /// Gateway-originated voluntary refund (issued from the provider's
    /// dashboard, or the echo of an admin refund we created).
    pub async fn apply_gateway_refund(
        &self,
        gateway: GatewayName,
        charge_ref: &str,
        gateway_refund_id: Option<&str>,
    ) -> AppResult<RefundRecord> {
        let tx = self.resolve(gateway, charge_ref).await?;
        self.apply(tx, RefundTrigger::Gateway { gateway_refund_id })
            .await
    }

    /// Chargeback: same ledger treatment as a refund, plus immediate
    /// account suspension.
    pub async fn apply_chargeback(
        &self,
        gateway: GatewayName,
        charge_ref: &str,
        reason: &str,
    ) -> AppResult<RefundRecord> {
        let tx = self.resolve(gateway, charge_ref).await?;
        self.apply(tx, RefundTrigger::Chargeback { reason }).await
    }

    async fn resolve(
        &self,
        gateway: GatewayName,
        charge_ref: &str,
    ) -> AppResult<PaymentTransaction> {
        self.transaction_repo
            .find_by_gateway_reference(gateway.as_str(), charge_ref)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: format!("{}:{}", gateway.as_str(), charge_ref),
                }))
            })
    }

    async fn apply(
        &self,
        tx: PaymentTransaction,
        trigger: RefundTrigger<'_>,
    ) -> AppResult<RefundRecord> {
        if let Some(existing) = self.refund_repo.find_by_transaction(tx.id).await? {
            // A crash between refund insert and status flip leaves the
            // transaction completed; finish the flip on replay.
            if tx.status == "completed" {
                self.transaction_repo.mark_refunded(tx.id).await?;
            }
            info!(transaction_id = %tx.id, "refund already processed");
            return Ok(RefundRecord {
                refund: existing,
                credits_reversed: 0,
                user_suspended: false,
                already_processed: true,
            });
        }
        if tx.status == "refunded" {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::AlreadyRefunded {
                    transaction_id: tx.id.to_string(),
                },
            )));
        }

        // Only credit purchases reverse credits; subscription payments
        // settle access time, not balance.
        let mut credits_reversed = 0i64;
        if tx.kind == "credits" && tx.credits_awarded > 0 {
            let key = format!("reversal:{}", tx.id);
            match self
                .credits
                .reverse(
                    tx.user_id,
                    tx.credits_awarded,
                    "reversal",
                    &format!("Reversal of {}", tx.description),
                    Some(&key),
                )
                .await?
            {
                LedgerOutcome::Applied(entry) => credits_reversed = -entry.delta,
                LedgerOutcome::AlreadyApplied => {
                    credits_reversed = self
                        .credits
                        .entry_for_key(&key)
                        .await?
                        .map(|entry| -entry.delta)
                        .unwrap_or(0);
                }
            }
        }

        let user_suspended = matches!(trigger, RefundTrigger::Chargeback { .. });
        let metadata = serde_json::json!({
            "user_suspended": user_suspended,
            "reason": trigger.human_reason(),
        });

        let refund = match self
            .refund_repo
            .create(NewRefund {
                transaction_id: tx.id,
                user_id: tx.user_id,
                amount: tx.amount.clone(),
                currency: &tx.currency,
                gateway: &tx.gateway,
                gateway_refund_id: trigger.gateway_refund_id(),
                reason: trigger.reason_code(),
                initiated_by: trigger.initiated_by(),
                credits_reversed,
                metadata,
            })
            .await
        {
            Ok(refund) => refund,
            Err(e) if e.is_unique_violation() => {
                // Lost a race against a concurrent delivery of the same
                // event; that delivery owns the remaining steps.
                warn!(transaction_id = %tx.id, "concurrent refund already recorded");
                let existing = self
                    .refund_repo
                    .find_by_transaction(tx.id)
                    .await?
                    .ok_or_else(|| {
                        AppError::new(AppErrorKind::Domain(DomainError::AlreadyRefunded {
                            transaction_id: tx.id.to_string(),
                        }))
                    })?;
                return Ok(RefundRecord {
                    refund: existing,
                    credits_reversed,
                    user_suspended: false,
                    already_processed: true,
                });
            }
            Err(e) => return Err(e.into()),
        };

        // None here means a concurrent path flipped it first; harmless.
        self.transaction_repo.mark_refunded(tx.id).await?;

        if let RefundTrigger::Chargeback { reason } = &trigger {
            self.user_repo.suspend(tx.user_id).await?;
            info!(user_id = %tx.user_id, transaction_id = %tx.id, "account suspended after chargeback");
            self.effects.account_suspended(tx.user_id, reason).await;
        } else {
            self.effects
                .refund_issued(tx.user_id, &tx.amount, &tx.currency)
                .await;
        }

        self.audit
            .record(
                &tx.gateway,
                Some(tx.user_id),
                trigger.audit_action(),
                Some(tx.amount.clone()),
                Some(&tx.currency),
                serde_json::json!({
                    "transaction_id": tx.id,
                    "refund_id": refund.id,
                    "reason": refund.reason,
                    "credits_reversed": credits_reversed,
                    "user_suspended": user_suspended,
                }),
            )
            .await;

        info!(
            transaction_id = %tx.id,
            refund_id = %refund.id,
            credits_reversed = credits_reversed,
            "refund recorded"
        );

        Ok(RefundRecord {
            refund,
            credits_reversed,
            user_suspended,
            already_processed: false,
        })
    }
}
