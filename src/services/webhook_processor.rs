//! Webhook processing pipeline
//!
//! Every gateway delivery funnels through here: verify the signature
//! against the raw body, reduce the payload to a canonical billing
//! event, then apply it to the ledger exactly once. Replayed deliveries
//! resolve to `*AlreadyProcessed` outcomes instead of double-charging,
//! and events that reference records we do not hold are acknowledged
//! and flagged for manual reconciliation rather than bounced back for
//! a retry that can never succeed.

use crate::config::BillingConfig;
use crate::database::transaction_repository::{
    NewPaymentTransaction, PaymentTransaction, TransactionRepository,
};
use crate::database::user_repository::UserRepository;
use crate::database::webhook_repository::WebhookRepository;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::gateways::error::GatewayError;
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::{
    BillingEvent, CheckoutMetadata, GatewayName, NormalizedEvent, PurchaseKind,
};
use crate::services::credits::{CreditLedgerService, LedgerOutcome};
use crate::services::dispatch::SideEffects;
use crate::services::payment_audit::PaymentAuditService;
use crate::services::refunds::RefundService;
use crate::services::subscriptions::SubscriptionService;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid checkout metadata: {0}")]
    InvalidMetadata(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

impl WebhookProcessorError {
    /// Transient failures are parked for replay; everything else is a
    /// terminal rejection of the delivery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookProcessorError::DatabaseError(_) | WebhookProcessorError::ProcessingError(_)
        )
    }
}

impl From<GatewayError> for WebhookProcessorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::VerificationFailed { .. } => WebhookProcessorError::InvalidSignature,
            GatewayError::UnknownGateway { name } => WebhookProcessorError::UnknownGateway(name),
            GatewayError::NotConfigured { gateway } => {
                WebhookProcessorError::NotConfigured(gateway)
            }
            GatewayError::InvalidPayload { message } => {
                WebhookProcessorError::InvalidPayload(message)
            }
            GatewayError::InvalidMetadata { message } => {
                WebhookProcessorError::InvalidMetadata(message)
            }
            GatewayError::StoreError { message } => WebhookProcessorError::DatabaseError(message),
            other => WebhookProcessorError::ProcessingError(other.to_string()),
        }
    }
}

impl From<crate::database::error::DatabaseError> for WebhookProcessorError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        WebhookProcessorError::DatabaseError(err.to_string())
    }
}

/// What applying an event did. Deliveries the ledger has already seen
/// resolve to the `*AlreadyProcessed` variants, still acknowledged as
/// success to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CreditsGranted,
    CreditsAlreadyProcessed,
    SubscriptionActivated,
    SubscriptionAlreadyProcessed,
    SubscriptionRenewed,
    RenewalAlreadyProcessed,
    SubscriptionPastDue,
    SubscriptionCancelled,
    SubscriptionUpdated,
    RefundProcessed,
    RefundAlreadyProcessed,
    DisputeProcessed,
    DisputeAlreadyProcessed,
    UnhandledEvent,
    ReconciliationRequired,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::CreditsGranted => "credits_granted",
            Outcome::CreditsAlreadyProcessed => "credits_already_processed",
            Outcome::SubscriptionActivated => "subscription_activated",
            Outcome::SubscriptionAlreadyProcessed => "subscription_already_processed",
            Outcome::SubscriptionRenewed => "subscription_renewed",
            Outcome::RenewalAlreadyProcessed => "renewal_already_processed",
            Outcome::SubscriptionPastDue => "subscription_past_due",
            Outcome::SubscriptionCancelled => "subscription_cancelled",
            Outcome::SubscriptionUpdated => "subscription_updated",
            Outcome::RefundProcessed => "refund_processed",
            Outcome::RefundAlreadyProcessed => "refund_already_processed",
            Outcome::DisputeProcessed => "dispute_processed",
            Outcome::DisputeAlreadyProcessed => "dispute_already_processed",
            Outcome::UnhandledEvent => "unhandled_event",
            Outcome::ReconciliationRequired => "reconciliation_required",
        }
    }
}

/// Longest wait between retry attempts
const MAX_BACKOFF_SECS: i64 = 86_400;

/// Exponential backoff for the retry queue, capped at one day.
/// `attempts` counts the tries already spent, so the first failure
/// schedules at twice the base.
pub(crate) fn backoff_delay(attempts: i32, base_secs: i64) -> Duration {
    let exponent = attempts.clamp(0, 16) as u32;
    let secs = base_secs.saturating_mul(2_i64.saturating_pow(exponent));
    Duration::seconds(secs.min(MAX_BACKOFF_SECS))
}

pub struct WebhookProcessor {
    factory: Arc<GatewayFactory>,
    user_repo: UserRepository,
    transaction_repo: TransactionRepository,
    webhook_repo: WebhookRepository,
    credits: CreditLedgerService,
    subscriptions: SubscriptionService,
    refunds: RefundService,
    audit: PaymentAuditService,
    effects: SideEffects,
    billing: BillingConfig,
}

impl WebhookProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<GatewayFactory>,
        user_repo: UserRepository,
        transaction_repo: TransactionRepository,
        webhook_repo: WebhookRepository,
        credits: CreditLedgerService,
        subscriptions: SubscriptionService,
        refunds: RefundService,
        audit: PaymentAuditService,
        effects: SideEffects,
        billing: BillingConfig,
    ) -> Self {
        Self {
            factory,
            user_repo,
            transaction_repo,
            webhook_repo,
            credits,
            subscriptions,
            refunds,
            audit,
            effects,
            billing,
        }
    }

    /// Process one live delivery end to end. A retryable failure parks
    /// the payload in the queue before the error propagates, so the
    /// gateway's own retries and ours never race on different state.
    pub async fn process(
        &self,
        gateway_name: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Outcome, WebhookProcessorError> {
        let name = GatewayName::from_str(gateway_name)
            .map_err(|_| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;
        let gateway = self
            .factory
            .get(name)
            .await?
            .ok_or_else(|| WebhookProcessorError::NotConfigured(name.to_string()))?;

        let verification = gateway.verify_webhook(body, headers)?;
        if !verification.valid {
            error!(
                gateway = %name,
                reason = verification.reason.as_deref().unwrap_or("signature mismatch"),
                "Invalid webhook signature"
            );
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = gateway.normalize_event(body)?;
        match self.apply(&event).await {
            Ok(outcome) => {
                info!(
                    gateway = %name,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    outcome = outcome.as_str(),
                    "webhook processed"
                );
                Ok(outcome)
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    gateway = %name,
                    event_id = %event.event_id,
                    error = %e,
                    "webhook processing failed; parking for retry"
                );
                self.park_for_retry(name, &event, body, &e).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a normalized event to the ledger. Shared between the live
    /// path and queue replays.
    pub async fn apply(&self, event: &NormalizedEvent) -> Result<Outcome, WebhookProcessorError> {
        match &event.event {
            BillingEvent::CheckoutCompleted {
                metadata,
                amount,
                currency,
                external_ref,
                subscription_ref,
                customer_ref,
            } => {
                self.handle_checkout(
                    event,
                    metadata,
                    amount,
                    currency,
                    external_ref,
                    subscription_ref.as_deref(),
                    customer_ref.as_deref(),
                )
                .await
            }
            BillingEvent::InvoicePaid {
                subscription_ref,
                external_ref,
                amount,
                currency,
                period_start,
                period_end,
            } => {
                self.handle_invoice_paid(
                    event,
                    subscription_ref,
                    external_ref,
                    amount,
                    currency,
                    *period_start,
                    *period_end,
                )
                .await
            }
            BillingEvent::InvoicePaymentFailed { subscription_ref } => {
                self.handle_invoice_failed(event, subscription_ref).await
            }
            BillingEvent::SubscriptionCancelled { subscription_ref } => {
                self.handle_cancelled(event, subscription_ref).await
            }
            BillingEvent::SubscriptionUpdated {
                subscription_ref,
                cancel_at_period_end,
                period_end,
            } => {
                self.handle_updated(event, subscription_ref, *cancel_at_period_end, *period_end)
                    .await
            }
            BillingEvent::RefundProcessed {
                charge_ref,
                refund_ref,
                ..
            } => {
                self.handle_refund(event, charge_ref, refund_ref.as_deref())
                    .await
            }
            BillingEvent::DisputeCreated {
                charge_ref, reason, ..
            } => self.handle_dispute(event, charge_ref, reason).await,
            BillingEvent::Unhandled => {
                info!(
                    gateway = %event.gateway,
                    event_type = %event.event_type,
                    "unhandled event type acknowledged"
                );
                self.audit
                    .record(
                        event.gateway.as_str(),
                        None,
                        "unhandled_event",
                        None,
                        None,
                        serde_json::json!({
                            "event_id": event.event_id,
                            "event_type": event.event_type,
                        }),
                    )
                    .await;
                Ok(Outcome::UnhandledEvent)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_checkout(
        &self,
        event: &NormalizedEvent,
        metadata: &CheckoutMetadata,
        amount: &BigDecimal,
        currency: &str,
        external_ref: &str,
        subscription_ref: Option<&str>,
        customer_ref: Option<&str>,
    ) -> Result<Outcome, WebhookProcessorError> {
        let gateway = event.gateway;

        // Fast path for replays: once the transaction row exists, all of
        // this checkout's effects have been applied.
        if let Some(existing) = self
            .transaction_repo
            .find_by_gateway_reference(gateway.as_str(), external_ref)
            .await?
        {
            info!(
                gateway = %gateway,
                reference = %external_ref,
                transaction_id = %existing.id,
                "checkout already recorded"
            );
            return Ok(match &metadata.purchase {
                PurchaseKind::Credits { .. } => Outcome::CreditsAlreadyProcessed,
                PurchaseKind::Subscription { .. } => Outcome::SubscriptionAlreadyProcessed,
            });
        }

        let user = match self.user_repo.find_by_user_id(metadata.user_id).await? {
            Some(user) => user,
            None => {
                warn!(
                    gateway = %gateway,
                    user_id = %metadata.user_id,
                    reference = %external_ref,
                    "checkout references an unknown user"
                );
                self.audit
                    .flag_for_reconciliation(
                        gateway.as_str(),
                        &event.event_type,
                        external_ref,
                        "checkout references an unknown user",
                    )
                    .await;
                return Ok(Outcome::ReconciliationRequired);
            }
        };

        if let Some(customer_ref) = customer_ref {
            self.user_repo
                .set_gateway_customer_id(user.id, gateway.as_str(), customer_ref)
                .await?;
        }

        let idempotency_key = format!("{}:{}", gateway.as_str(), external_ref);

        match &metadata.purchase {
            PurchaseKind::Credits { package_id, credits } => {
                let credits_to_award = credits
                    .or_else(|| self.billing.credit_package(package_id).map(|p| p.credits))
                    .ok_or_else(|| {
                        WebhookProcessorError::InvalidMetadata(format!(
                            "unknown credit package '{}' and no credit amount in metadata",
                            package_id
                        ))
                    })?;
                let description = format!("Credit purchase ({})", package_id);

                // Credits land first, keyed by the gateway reference; the
                // transaction insert behind them is the idempotency
                // barrier. A crash between the two self-heals on replay:
                // the grant dedupes on its key and the insert completes.
                self.credits
                    .grant(
                        user.id,
                        credits_to_award,
                        "purchase",
                        &description,
                        Some(&idempotency_key),
                    )
                    .await?;

                match self
                    .transaction_repo
                    .record_completed(NewPaymentTransaction {
                        user_id: user.id,
                        kind: "credits",
                        gateway: gateway.as_str(),
                        gateway_transaction_id: external_ref,
                        gateway_subscription_id: None,
                        amount: amount.clone(),
                        currency,
                        plan_id: None,
                        credit_package_id: Some(package_id),
                        description: &description,
                        credits_awarded: credits_to_award,
                    })
                    .await
                {
                    Ok(tx) => {
                        self.record_payment_audit(
                            &tx,
                            "credits_granted",
                            serde_json::json!({
                                "transaction_id": tx.id,
                                "package_id": package_id,
                                "credits": credits_to_award,
                            }),
                        )
                        .await;
                        self.effects
                            .payment_confirmation(user.id, tx.id, &description, amount, currency)
                            .await;
                        Ok(Outcome::CreditsGranted)
                    }
                    Err(e) if e.is_unique_violation() => {
                        info!(
                            gateway = %gateway,
                            reference = %external_ref,
                            "concurrent delivery already recorded this checkout"
                        );
                        Ok(Outcome::CreditsAlreadyProcessed)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            PurchaseKind::Subscription { plan_id } => {
                let plan = self.subscriptions.plan(plan_id).cloned().ok_or_else(|| {
                    WebhookProcessorError::InvalidMetadata(format!("unknown plan '{}'", plan_id))
                })?;

                let change = self
                    .subscriptions
                    .activate(
                        user.id,
                        &plan,
                        gateway,
                        subscription_ref,
                        &idempotency_key,
                        Utc::now(),
                    )
                    .await?;
                let description = format!("{} plan subscription", plan.name);

                match self
                    .transaction_repo
                    .record_completed(NewPaymentTransaction {
                        user_id: user.id,
                        kind: "subscription",
                        gateway: gateway.as_str(),
                        gateway_transaction_id: external_ref,
                        gateway_subscription_id: subscription_ref,
                        amount: amount.clone(),
                        currency,
                        plan_id: Some(plan_id),
                        credit_package_id: None,
                        description: &description,
                        credits_awarded: plan.monthly_credits,
                    })
                    .await
                {
                    Ok(tx) => {
                        self.record_payment_audit(
                            &tx,
                            "subscription_activated",
                            serde_json::json!({
                                "transaction_id": tx.id,
                                "subscription_id": change.subscription.id,
                                "plan_id": plan.id,
                                "credits": plan.monthly_credits,
                            }),
                        )
                        .await;
                        self.effects
                            .payment_confirmation(user.id, tx.id, &description, amount, currency)
                            .await;
                        Ok(Outcome::SubscriptionActivated)
                    }
                    Err(e) if e.is_unique_violation() => {
                        info!(
                            gateway = %gateway,
                            reference = %external_ref,
                            "concurrent delivery already recorded this checkout"
                        );
                        Ok(Outcome::SubscriptionAlreadyProcessed)
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_invoice_paid(
        &self,
        event: &NormalizedEvent,
        subscription_ref: &str,
        external_ref: &str,
        amount: &BigDecimal,
        currency: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Outcome, WebhookProcessorError> {
        let gateway = event.gateway;

        if let Some(existing) = self
            .transaction_repo
            .find_by_gateway_reference(gateway.as_str(), external_ref)
            .await?
        {
            info!(
                gateway = %gateway,
                reference = %external_ref,
                transaction_id = %existing.id,
                "renewal already recorded"
            );
            return Ok(Outcome::RenewalAlreadyProcessed);
        }

        let idempotency_key = format!("{}:{}", gateway.as_str(), external_ref);
        let change = match self
            .subscriptions
            .renew(
                gateway,
                subscription_ref,
                &idempotency_key,
                period_start,
                period_end,
                Utc::now(),
            )
            .await?
        {
            Some(change) => change,
            None => {
                warn!(
                    gateway = %gateway,
                    subscription_ref = %subscription_ref,
                    "renewal invoice for an unknown subscription"
                );
                self.audit
                    .flag_for_reconciliation(
                        gateway.as_str(),
                        &event.event_type,
                        subscription_ref,
                        "renewal invoice for an unknown subscription",
                    )
                    .await;
                return Ok(Outcome::ReconciliationRequired);
            }
        };

        let subscription = &change.subscription;
        // When the grant deduped (a crash after the grant but before the
        // insert, or a plan no longer in the catalog) the original ledger
        // row still tells us what this invoice awarded.
        let credits_awarded = match &change.credits {
            LedgerOutcome::Applied(entry) => entry.delta,
            LedgerOutcome::AlreadyApplied => self
                .credits
                .entry_for_key(&idempotency_key)
                .await?
                .map(|entry| entry.delta)
                .unwrap_or(0),
        };
        let description = format!("Subscription renewal ({})", subscription.plan_id);

        match self
            .transaction_repo
            .record_completed(NewPaymentTransaction {
                user_id: subscription.user_id,
                kind: "subscription_renewal",
                gateway: gateway.as_str(),
                gateway_transaction_id: external_ref,
                gateway_subscription_id: Some(subscription_ref),
                amount: amount.clone(),
                currency,
                plan_id: Some(&subscription.plan_id),
                credit_package_id: None,
                description: &description,
                credits_awarded,
            })
            .await
        {
            Ok(tx) => {
                self.record_payment_audit(
                    &tx,
                    "subscription_renewed",
                    serde_json::json!({
                        "transaction_id": tx.id,
                        "subscription_id": subscription.id,
                        "plan_id": subscription.plan_id,
                        "period_end": subscription.current_period_end,
                        "credits": credits_awarded,
                    }),
                )
                .await;
                self.effects
                    .subscription_renewed(subscription.user_id, &subscription.plan_id)
                    .await;
                Ok(Outcome::SubscriptionRenewed)
            }
            Err(e) if e.is_unique_violation() => {
                info!(
                    gateway = %gateway,
                    reference = %external_ref,
                    "concurrent delivery already recorded this renewal"
                );
                Ok(Outcome::RenewalAlreadyProcessed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_invoice_failed(
        &self,
        event: &NormalizedEvent,
        subscription_ref: &str,
    ) -> Result<Outcome, WebhookProcessorError> {
        let gateway = event.gateway;
        match self
            .subscriptions
            .mark_past_due(gateway, subscription_ref)
            .await?
        {
            Some(subscription) => {
                self.audit
                    .record(
                        gateway.as_str(),
                        Some(subscription.user_id),
                        "subscription_past_due",
                        None,
                        None,
                        serde_json::json!({
                            "subscription_id": subscription.id,
                            "gateway_subscription_id": subscription_ref,
                        }),
                    )
                    .await;
                self.effects
                    .payment_failed(subscription.user_id, &subscription.plan_id)
                    .await;
                Ok(Outcome::SubscriptionPastDue)
            }
            None => {
                self.flag_unknown_subscription(event, subscription_ref, "payment failure")
                    .await;
                Ok(Outcome::ReconciliationRequired)
            }
        }
    }

    async fn handle_cancelled(
        &self,
        event: &NormalizedEvent,
        subscription_ref: &str,
    ) -> Result<Outcome, WebhookProcessorError> {
        let gateway = event.gateway;
        match self.subscriptions.cancel(gateway, subscription_ref).await? {
            Some(subscription) => {
                self.audit
                    .record(
                        gateway.as_str(),
                        Some(subscription.user_id),
                        "subscription_cancelled",
                        None,
                        None,
                        serde_json::json!({
                            "subscription_id": subscription.id,
                            "gateway_subscription_id": subscription_ref,
                            "plan_id": subscription.plan_id,
                        }),
                    )
                    .await;
                Ok(Outcome::SubscriptionCancelled)
            }
            None => {
                self.flag_unknown_subscription(event, subscription_ref, "cancellation")
                    .await;
                Ok(Outcome::ReconciliationRequired)
            }
        }
    }

    async fn handle_updated(
        &self,
        event: &NormalizedEvent,
        subscription_ref: &str,
        cancel_at_period_end: bool,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Outcome, WebhookProcessorError> {
        let gateway = event.gateway;
        match self
            .subscriptions
            .apply_update(gateway, subscription_ref, cancel_at_period_end, period_end)
            .await?
        {
            Some(subscription) => {
                self.audit
                    .record(
                        gateway.as_str(),
                        Some(subscription.user_id),
                        "subscription_updated",
                        None,
                        None,
                        serde_json::json!({
                            "subscription_id": subscription.id,
                            "cancel_at_period_end": cancel_at_period_end,
                        }),
                    )
                    .await;
                Ok(Outcome::SubscriptionUpdated)
            }
            None => {
                self.flag_unknown_subscription(event, subscription_ref, "settings update")
                    .await;
                Ok(Outcome::ReconciliationRequired)
            }
        }
    }

    async fn handle_refund(
        &self,
        event: &NormalizedEvent,
        charge_ref: &str,
        refund_ref: Option<&str>,
    ) -> Result<Outcome, WebhookProcessorError> {
        match self
            .refunds
            .apply_gateway_refund(event.gateway, charge_ref, refund_ref)
            .await
        {
            Ok(record) if record.already_processed => Ok(Outcome::RefundAlreadyProcessed),
            Ok(_) => Ok(Outcome::RefundProcessed),
            Err(e) => {
                self.resolve_refund_error(
                    e,
                    event,
                    charge_ref,
                    "refund references an unknown transaction",
                    Outcome::RefundAlreadyProcessed,
                )
                .await
            }
        }
    }

    async fn handle_dispute(
        &self,
        event: &NormalizedEvent,
        charge_ref: &str,
        reason: &str,
    ) -> Result<Outcome, WebhookProcessorError> {
        match self
            .refunds
            .apply_chargeback(event.gateway, charge_ref, reason)
            .await
        {
            Ok(record) if record.already_processed => Ok(Outcome::DisputeAlreadyProcessed),
            Ok(_) => Ok(Outcome::DisputeProcessed),
            Err(e) => {
                self.resolve_refund_error(
                    e,
                    event,
                    charge_ref,
                    "dispute references an unknown transaction",
                    Outcome::DisputeAlreadyProcessed,
                )
                .await
            }
        }
    }

    /// A refund or dispute we cannot act on. An unknown reference is
    /// acknowledged and flagged: the gateway would replay it forever,
    /// and no retry conjures up the missing row.
    async fn resolve_refund_error(
        &self,
        e: AppError,
        event: &NormalizedEvent,
        charge_ref: &str,
        note: &str,
        already: Outcome,
    ) -> Result<Outcome, WebhookProcessorError> {
        match &e.kind {
            AppErrorKind::Domain(DomainError::TransactionNotFound { .. }) => {
                warn!(
                    gateway = %event.gateway,
                    charge_ref = %charge_ref,
                    event_type = %event.event_type,
                    "{}",
                    note
                );
                self.audit
                    .flag_for_reconciliation(
                        event.gateway.as_str(),
                        &event.event_type,
                        charge_ref,
                        note,
                    )
                    .await;
                Ok(Outcome::ReconciliationRequired)
            }
            AppErrorKind::Domain(DomainError::AlreadyRefunded { .. }) => Ok(already),
            AppErrorKind::Infrastructure(_) => {
                Err(WebhookProcessorError::DatabaseError(e.to_string()))
            }
            _ => Err(WebhookProcessorError::ProcessingError(e.to_string())),
        }
    }

    async fn flag_unknown_subscription(
        &self,
        event: &NormalizedEvent,
        subscription_ref: &str,
        context: &str,
    ) {
        warn!(
            gateway = %event.gateway,
            subscription_ref = %subscription_ref,
            "{} for an unknown subscription",
            context
        );
        self.audit
            .flag_for_reconciliation(
                event.gateway.as_str(),
                &event.event_type,
                subscription_ref,
                &format!("{} for an unknown subscription", context),
            )
            .await;
    }

    async fn record_payment_audit(&self, tx: &PaymentTransaction, action: &str, detail: JsonValue) {
        self.audit
            .record(
                &tx.gateway,
                Some(tx.user_id),
                action,
                Some(tx.amount.clone()),
                Some(&tx.currency),
                detail,
            )
            .await;
    }

    async fn park_for_retry(
        &self,
        gateway: GatewayName,
        event: &NormalizedEvent,
        body: &[u8],
        cause: &WebhookProcessorError,
    ) {
        let payload: JsonValue = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    gateway = %gateway,
                    event_id = %event.event_id,
                    error = %e,
                    "cannot park non-JSON payload for retry"
                );
                return;
            }
        };
        if let Err(store_err) = self
            .webhook_repo
            .enqueue(
                gateway.as_str(),
                &event.event_id,
                &event.event_type,
                &payload,
                &cause.to_string(),
            )
            .await
        {
            error!(
                gateway = %gateway,
                event_id = %event.event_id,
                error = %store_err,
                "failed to park webhook for retry"
            );
        }
    }

    /// Replay parked deliveries whose backoff has elapsed. Called by the
    /// retry worker; returns how many deliveries completed.
    pub async fn retry_due(&self, limit: i64) -> Result<usize, WebhookProcessorError> {
        let due = self.webhook_repo.claim_due(limit).await?;
        let mut replayed = 0;

        for delivery in due {
            let name = match GatewayName::from_str(&delivery.gateway) {
                Ok(name) => name,
                Err(_) => {
                    let _ = self
                        .webhook_repo
                        .record_failure(delivery.id, "unknown gateway", Utc::now(), true)
                        .await;
                    continue;
                }
            };

            let gateway = match self.factory.get(name).await {
                Ok(Some(gateway)) => gateway,
                Ok(None) | Err(_) => {
                    // Configuration may come back; keep the delivery pending.
                    let next = Utc::now()
                        + backoff_delay(delivery.attempts, self.billing.retry_backoff_base_secs);
                    let _ = self
                        .webhook_repo
                        .record_failure(delivery.id, "gateway unavailable", next, false)
                        .await;
                    continue;
                }
            };

            let body = match serde_json::to_vec(&delivery.payload) {
                Ok(body) => body,
                Err(e) => {
                    let _ = self
                        .webhook_repo
                        .record_failure(delivery.id, &e.to_string(), Utc::now(), true)
                        .await;
                    continue;
                }
            };

            // Normalization is deterministic, so a payload that fails it
            // now will fail it forever.
            let event = match gateway.normalize_event(&body) {
                Ok(event) => event,
                Err(e) => {
                    let _ = self
                        .webhook_repo
                        .record_failure(delivery.id, &e.to_string(), Utc::now(), true)
                        .await;
                    continue;
                }
            };

            match self.apply(&event).await {
                Ok(outcome) => {
                    info!(
                        gateway = %delivery.gateway,
                        event_id = %delivery.event_id,
                        attempts = delivery.attempts,
                        outcome = outcome.as_str(),
                        "parked webhook replayed"
                    );
                    let _ = self.webhook_repo.mark_completed(delivery.id).await;
                    replayed += 1;
                }
                Err(e) if e.is_retryable() => {
                    let exhausted = delivery.attempts >= self.billing.retry_max_attempts;
                    let next = Utc::now()
                        + backoff_delay(delivery.attempts, self.billing.retry_backoff_base_secs);
                    if exhausted {
                        error!(
                            gateway = %delivery.gateway,
                            event_id = %delivery.event_id,
                            attempts = delivery.attempts,
                            error = %e,
                            "webhook retries exhausted; manual intervention required"
                        );
                    }
                    let _ = self
                        .webhook_repo
                        .record_failure(delivery.id, &e.to_string(), next, exhausted)
                        .await;
                }
                Err(e) => {
                    // Terminal rejection: replaying cannot change the verdict.
                    let _ = self
                        .webhook_repo
                        .record_failure(delivery.id, &e.to_string(), Utc::now(), true)
                        .await;
                }
            }
        }

        Ok(replayed)
    }
}
