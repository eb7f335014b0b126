//! Outbound side effects: transactional email, invoice records and push
//! notifications. Everything here is best effort. A failure is reported
//! through one sink and never rolls back the ledger write that triggered
//! it.

use async_trait::async_trait;
use sqlx::types::BigDecimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SideEffectError(pub String);

#[derive(Debug, Clone)]
pub enum EmailTemplate {
    PaymentConfirmation {
        description: String,
        amount: BigDecimal,
        currency: String,
    },
    SubscriptionRenewed {
        plan_id: String,
    },
    PaymentFailed {
        plan_id: String,
    },
    AccountSuspended {
        reason: String,
    },
    RefundIssued {
        amount: BigDecimal,
        currency: String,
    },
}

impl EmailTemplate {
    fn kind(&self) -> &'static str {
        match self {
            EmailTemplate::PaymentConfirmation { .. } => "payment_confirmation",
            EmailTemplate::SubscriptionRenewed { .. } => "subscription_renewed",
            EmailTemplate::PaymentFailed { .. } => "payment_failed",
            EmailTemplate::AccountSuspended { .. } => "account_suspended",
            EmailTemplate::RefundIssued { .. } => "refund_issued",
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, user_id: Uuid, template: EmailTemplate) -> Result<(), SideEffectError>;
}

#[async_trait]
pub trait InvoiceIssuer: Send + Sync {
    async fn issue(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        description: &str,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<(), SideEffectError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        message: &str,
    ) -> Result<(), SideEffectError>;
}

/// Default sender that only logs. A real mail integration replaces this
/// behind the same trait.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, user_id: Uuid, template: EmailTemplate) -> Result<(), SideEffectError> {
        match &template {
            EmailTemplate::PaymentConfirmation {
                description,
                amount,
                currency,
            } => {
                info!(
                    user_id = %user_id,
                    amount = %amount,
                    currency = %currency,
                    "📧 EMAIL: Payment Confirmation - {}", description
                );
            }
            EmailTemplate::SubscriptionRenewed { plan_id } => {
                info!(
                    user_id = %user_id,
                    plan = %plan_id,
                    "📧 EMAIL: Subscription Renewed"
                );
            }
            EmailTemplate::PaymentFailed { plan_id } => {
                info!(
                    user_id = %user_id,
                    plan = %plan_id,
                    "📧 EMAIL: Payment Failed - subscription is past due"
                );
            }
            EmailTemplate::AccountSuspended { reason } => {
                info!(
                    user_id = %user_id,
                    "📧 EMAIL: Account Suspended - {}", reason
                );
            }
            EmailTemplate::RefundIssued { amount, currency } => {
                info!(
                    user_id = %user_id,
                    amount = %amount,
                    currency = %currency,
                    "📧 EMAIL: Refund Issued"
                );
            }
        }
        Ok(())
    }
}

pub struct LogInvoiceIssuer;

#[async_trait]
impl InvoiceIssuer for LogInvoiceIssuer {
    async fn issue(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        description: &str,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<(), SideEffectError> {
        info!(
            user_id = %user_id,
            transaction_id = %transaction_id,
            amount = %amount,
            currency = %currency,
            "🧾 INVOICE: Issued - {}", description
        );
        Ok(())
    }
}

/// Default notifier that only logs, same placeholder contract as the
/// email sender.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        message: &str,
    ) -> Result<(), SideEffectError> {
        info!(
            user_id = %user_id,
            event = %event,
            "🔔 NOTIFICATION: {}", message
        );
        Ok(())
    }
}

/// Single entry point for all post-ledger side effects.
#[derive(Clone)]
pub struct SideEffects {
    email: Arc<dyn EmailSender>,
    invoices: Arc<dyn InvoiceIssuer>,
    notifier: Arc<dyn Notifier>,
}

impl SideEffects {
    pub fn new(
        email: Arc<dyn EmailSender>,
        invoices: Arc<dyn InvoiceIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            email,
            invoices,
            notifier,
        }
    }

    pub fn logging() -> Self {
        Self::new(
            Arc::new(LogEmailSender),
            Arc::new(LogInvoiceIssuer),
            Arc::new(LogNotifier),
        )
    }

    pub async fn payment_confirmation(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        description: &str,
        amount: &BigDecimal,
        currency: &str,
    ) {
        if let Err(e) = self
            .invoices
            .issue(user_id, transaction_id, description, amount, currency)
            .await
        {
            report_failure("invoice", user_id, &e);
        }
        self.send(
            user_id,
            EmailTemplate::PaymentConfirmation {
                description: description.to_string(),
                amount: amount.clone(),
                currency: currency.to_string(),
            },
        )
        .await;
        self.push(
            user_id,
            "payment_confirmation",
            &format!("Payment received: {}", description),
        )
        .await;
    }

    pub async fn subscription_renewed(&self, user_id: Uuid, plan_id: &str) {
        self.send(
            user_id,
            EmailTemplate::SubscriptionRenewed {
                plan_id: plan_id.to_string(),
            },
        )
        .await;
        self.push(
            user_id,
            "subscription_renewed",
            &format!("Subscription renewed on plan {}", plan_id),
        )
        .await;
    }

    pub async fn payment_failed(&self, user_id: Uuid, plan_id: &str) {
        self.send(
            user_id,
            EmailTemplate::PaymentFailed {
                plan_id: plan_id.to_string(),
            },
        )
        .await;
        self.push(
            user_id,
            "payment_failed",
            &format!("Payment failed; plan {} is past due", plan_id),
        )
        .await;
    }

    pub async fn account_suspended(&self, user_id: Uuid, reason: &str) {
        self.send(
            user_id,
            EmailTemplate::AccountSuspended {
                reason: reason.to_string(),
            },
        )
        .await;
        self.push(
            user_id,
            "account_suspended",
            &format!("Account suspended: {}", reason),
        )
        .await;
    }

    pub async fn refund_issued(&self, user_id: Uuid, amount: &BigDecimal, currency: &str) {
        self.send(
            user_id,
            EmailTemplate::RefundIssued {
                amount: amount.clone(),
                currency: currency.to_string(),
            },
        )
        .await;
        self.push(
            user_id,
            "refund_issued",
            &format!("Refund issued: {} {}", amount, currency),
        )
        .await;
    }

    async fn send(&self, user_id: Uuid, template: EmailTemplate) {
        let kind = template.kind();
        if let Err(e) = self.email.send(user_id, template).await {
            report_failure(kind, user_id, &e);
        }
    }

    async fn push(&self, user_id: Uuid, event: &str, message: &str) {
        if let Err(e) = self.notifier.notify(user_id, event, message).await {
            report_failure("notification", user_id, &e);
        }
    }
}

/// The one sink every swallowed side-effect failure goes through, so they
/// stay observable without being load bearing.
fn report_failure(kind: &str, user_id: Uuid, error: &SideEffectError) {
    warn!(
        side_effect = %kind,
        user_id = %user_id,
        error = %error,
        "side effect failed; ledger state is unaffected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSender(AtomicUsize);

    #[async_trait]
    impl EmailSender for FailingSender {
        async fn send(
            &self,
            _user_id: Uuid,
            _template: EmailTemplate,
        ) -> Result<(), SideEffectError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SideEffectError("smtp unreachable".to_string()))
        }
    }

    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(
            &self,
            _user_id: Uuid,
            _event: &str,
            _message: &str,
        ) -> Result<(), SideEffectError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn email_failures_are_swallowed() {
        let sender = Arc::new(FailingSender(AtomicUsize::new(0)));
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let effects = SideEffects::new(
            sender.clone(),
            Arc::new(LogInvoiceIssuer),
            notifier.clone(),
        );

        // Must not panic or propagate
        effects
            .subscription_renewed(Uuid::new_v4(), "pro")
            .await;
        effects
            .account_suspended(Uuid::new_v4(), "chargeback opened")
            .await;
        assert_eq!(sender.0.load(Ordering::SeqCst), 2);
        // A dead mailbox must not stop the push notifications
        assert_eq!(notifier.0.load(Ordering::SeqCst), 2);
    }
}
