//! Services module for billing business logic

pub mod credits;
pub mod currency;
pub mod dispatch;
pub mod payment_audit;
pub mod refunds;
pub mod subscriptions;
pub mod webhook_processor;

#[cfg(test)]
mod webhook_processor_tests;

// Re-export the types handlers and workers wire together
pub use crate::services::credits::{CreditLedgerService, LedgerOutcome};
pub use crate::services::currency::CurrencyService;
pub use crate::services::dispatch::SideEffects;
pub use crate::services::payment_audit::PaymentAuditService;
pub use crate::services::refunds::{RefundRecord, RefundService, RefundTrigger};
pub use crate::services::subscriptions::{SubscriptionChange, SubscriptionService};
pub use crate::services::webhook_processor::{Outcome, WebhookProcessor, WebhookProcessorError};
