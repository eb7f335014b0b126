use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Unknown gateway: {name}")]
    UnknownGateway { name: String },

    #[error("Gateway not configured: {gateway}")]
    NotConfigured { gateway: String },

    #[error("Webhook verification failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Invalid checkout metadata: {message}")]
    InvalidMetadata { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: gateway={gateway}, message={message}")]
    ApiError {
        gateway: String,
        message: String,
        gateway_code: Option<String>,
        retryable: bool,
    },

    #[error("Configuration store error: {message}")]
    StoreError { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UnknownGateway { .. } => false,
            GatewayError::NotConfigured { .. } => false,
            GatewayError::VerificationFailed { .. } => false,
            GatewayError::InvalidPayload { .. } => false,
            GatewayError::InvalidMetadata { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::ApiError { retryable, .. } => *retryable,
            GatewayError::StoreError { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::UnknownGateway { .. } => 400,
            GatewayError::NotConfigured { .. } => 400,
            GatewayError::VerificationFailed { .. } => 400,
            GatewayError::InvalidPayload { .. } => 400,
            GatewayError::InvalidMetadata { .. } => 400,
            GatewayError::NetworkError { .. } => 503,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::ApiError { .. } => 502,
            GatewayError::StoreError { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::UnknownGateway { name } => format!("Unknown payment gateway '{}'", name),
            GatewayError::NotConfigured { gateway } => {
                format!("Payment gateway '{}' is not configured", gateway)
            }
            GatewayError::VerificationFailed { .. } => "Invalid webhook signature".to_string(),
            GatewayError::InvalidPayload { .. } => "Webhook payload could not be parsed".to_string(),
            GatewayError::InvalidMetadata { .. } => {
                "Checkout metadata is missing or malformed".to_string()
            }
            GatewayError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            GatewayError::ApiError { .. } => "Payment gateway returned an error".to_string(),
            GatewayError::StoreError { .. } => {
                "Gateway configuration is temporarily unavailable".to_string()
            }
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, InfrastructureError};

        let kind = match &err {
            GatewayError::NotConfigured { .. } | GatewayError::StoreError { .. } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: err.to_string(),
                })
            }
            GatewayError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment gateway".to_string(),
                retry_after: *retry_after_seconds,
            }),
            GatewayError::ApiError { gateway, .. } => {
                AppErrorKind::External(ExternalError::Gateway {
                    gateway: gateway.clone(),
                    message: err.to_string(),
                    is_retryable: err.is_retryable(),
                })
            }
            _ => AppErrorKind::External(ExternalError::Gateway {
                gateway: "gateway".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            GatewayError::VerificationFailed {
                reason: "bad signature".to_string()
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            GatewayError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            GatewayError::ApiError {
                gateway: "stripe".to_string(),
                message: "boom".to_string(),
                gateway_code: None,
                retryable: true
            }
            .http_status_code(),
            502
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(GatewayError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::VerificationFailed {
            reason: "mismatch".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::InvalidMetadata {
            message: "missing user_id".to_string()
        }
        .is_retryable());
    }
}
