//! Comprehensive error handling for the Vocira billing backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Billing-specific error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "ALREADY_REFUNDED")]
    AlreadyRefunded,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "CURRENCY_LOCKED")]
    CurrencyLocked,
    #[serde(rename = "ADMIN_REQUIRED")]
    AdminRequired,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// User with given id doesn't exist
    UserNotFound { user_id: String },
    /// Transaction with given reference doesn't exist
    TransactionNotFound { reference: String },
    /// A refund already exists for this transaction
    AlreadyRefunded { transaction_id: String },
    /// Transaction is not in a refundable state
    RefundNotAllowed {
        transaction_id: String,
        reason: String,
    },
    /// Platform currency has been locked and cannot change
    CurrencyLocked { currency: String },
    /// Caller lacks admin privileges
    AdminRequired { user_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment gateway (Stripe, Mercado Pago, Lemon Squeezy) error
    Gateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Unsupported or invalid currency
    InvalidCurrency { currency: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required header missing
    MissingHeader { name: String },
    /// Malformed identifier (user id, transaction id)
    InvalidIdentifier { value: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::AlreadyRefunded { .. } => 409, // Conflict
                DomainError::RefundNotAllowed { .. } => 422, // Unprocessable Entity
                DomainError::CurrencyLocked { .. } => 409,
                DomainError::AdminRequired { .. } => 403,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 502, // Bad Gateway
                ExternalError::RateLimit { .. } => 429, // Too Many Requests
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::AlreadyRefunded { .. } => ErrorCode::AlreadyRefunded,
                DomainError::RefundNotAllowed { .. } => ErrorCode::RefundNotAllowed,
                DomainError::CurrencyLocked { .. } => ErrorCode::CurrencyLocked,
                DomainError::AdminRequired { .. } => ErrorCode::AdminRequired,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { user_id } => {
                    format!("User '{}' not found", user_id)
                }
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::AlreadyRefunded { transaction_id } => {
                    format!("Transaction '{}' has already been refunded", transaction_id)
                }
                DomainError::RefundNotAllowed {
                    transaction_id,
                    reason,
                } => {
                    format!("Transaction '{}' cannot be refunded: {}", transaction_id, reason)
                }
                DomainError::CurrencyLocked { currency } => {
                    format!(
                        "Platform currency is locked to '{}' and cannot be changed",
                        currency
                    )
                }
                DomainError::AdminRequired { .. } => {
                    "This operation requires admin privileges".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway {
                    gateway,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingHeader { name } => {
                    format!("Required header '{}' is missing", name)
                }
                ValidationError::InvalidIdentifier { value, reason } => {
                    format!("Invalid identifier '{}': {}", value, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from specific error types
// Note: From<DatabaseError> is implemented in database/error.rs and
// From<GatewayError> in gateways/error.rs to avoid circular dependencies.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_refunded_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::AlreadyRefunded {
            transaction_id: "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::AlreadyRefunded);
        assert!(error.user_message().contains("already been refunded"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_currency_locked_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::CurrencyLocked {
            currency: "USD".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::CurrencyLocked);
        assert!(error.user_message().contains("locked"));
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "Stripe".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_admin_required_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::AdminRequired {
            user_id: "2b6f9a7e-13aa-4a70-93e4-6f6e9b1c2a41".to_string(),
        }));

        assert_eq!(error.status_code(), 403);
        assert_eq!(error.error_code(), ErrorCode::AdminRequired);
    }
}
