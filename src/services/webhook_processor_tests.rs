use crate::gateways::error::GatewayError;
use crate::services::webhook_processor::{backoff_delay, Outcome, WebhookProcessorError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        let err = WebhookProcessorError::InvalidSignature;
        assert_eq!(err.to_string(), "Invalid signature");

        let err = WebhookProcessorError::UnknownGateway("paypal".to_string());
        assert_eq!(err.to_string(), "Unknown gateway: paypal");

        let err = WebhookProcessorError::NotConfigured("stripe".to_string());
        assert_eq!(err.to_string(), "Gateway not configured: stripe");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(WebhookProcessorError::DatabaseError("pool timeout".to_string()).is_retryable());
        assert!(WebhookProcessorError::ProcessingError("503".to_string()).is_retryable());

        assert!(!WebhookProcessorError::InvalidSignature.is_retryable());
        assert!(!WebhookProcessorError::InvalidPayload("bad json".to_string()).is_retryable());
        assert!(!WebhookProcessorError::InvalidMetadata("no user".to_string()).is_retryable());
        assert!(!WebhookProcessorError::UnknownGateway("paypal".to_string()).is_retryable());
        assert!(!WebhookProcessorError::NotConfigured("stripe".to_string()).is_retryable());
    }

    #[test]
    fn gateway_errors_map_onto_processor_errors() {
        let err: WebhookProcessorError = GatewayError::VerificationFailed {
            reason: "timestamp outside tolerance".to_string(),
        }
        .into();
        assert!(matches!(err, WebhookProcessorError::InvalidSignature));

        let err: WebhookProcessorError = GatewayError::StoreError {
            message: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, WebhookProcessorError::DatabaseError(_)));
        assert!(err.is_retryable());

        let err: WebhookProcessorError = GatewayError::NetworkError {
            message: "dns failure".to_string(),
        }
        .into();
        assert!(matches!(err, WebhookProcessorError::ProcessingError(_)));
        assert!(err.is_retryable());

        let err: WebhookProcessorError = GatewayError::InvalidMetadata {
            message: "missing user_id".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn outcome_tags_match_audit_vocabulary() {
        assert_eq!(Outcome::CreditsGranted.as_str(), "credits_granted");
        assert_eq!(
            Outcome::CreditsAlreadyProcessed.as_str(),
            "credits_already_processed"
        );
        assert_eq!(
            Outcome::ReconciliationRequired.as_str(),
            "reconciliation_required"
        );
        assert_eq!(Outcome::UnhandledEvent.as_str(), "unhandled_event");
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0, 60).num_seconds(), 60);
        assert_eq!(backoff_delay(1, 60).num_seconds(), 120);
        assert_eq!(backoff_delay(2, 60).num_seconds(), 240);
        assert_eq!(backoff_delay(5, 60).num_seconds(), 1920);
    }

    #[test]
    fn backoff_is_capped_at_one_day() {
        assert_eq!(backoff_delay(30, 3_600).num_seconds(), 86_400);
        assert_eq!(backoff_delay(i32::MAX, i64::MAX).num_seconds(), 86_400);
    }
}
