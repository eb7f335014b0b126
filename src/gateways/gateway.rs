use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    GatewayName, GatewayRefund, NormalizedEvent, WebhookVerificationResult,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;

/// One payment gateway integration. Verification and normalization are
/// pure functions of the raw request so they stay testable offline;
/// only refunds reach out to the gateway's API.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    /// Publishable key for client-side SDK initialization, when the
    /// gateway has one. Never a secret.
    fn public_key(&self) -> Option<&str>;

    fn supported_currencies(&self) -> &'static [&'static str];

    /// Check the webhook signature against the raw body. Fail closed: any
    /// missing header, parse failure or mismatch comes back invalid.
    fn verify_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> GatewayResult<WebhookVerificationResult>;

    /// Reduce a verified payload to the canonical event model
    fn normalize_event(&self, payload: &[u8]) -> GatewayResult<NormalizedEvent>;

    /// Ask the gateway to refund a charge
    async fn create_refund(
        &self,
        charge_ref: &str,
        amount: &BigDecimal,
        currency: &str,
    ) -> GatewayResult<GatewayRefund>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::BillingEvent;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn name(&self) -> GatewayName {
            GatewayName::Stripe
        }

        fn public_key(&self) -> Option<&str> {
            Some("pk_test_mock")
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["USD"]
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _headers: &HeaderMap,
        ) -> GatewayResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult {
                valid: true,
                reason: None,
            })
        }

        fn normalize_event(&self, _payload: &[u8]) -> GatewayResult<NormalizedEvent> {
            Ok(NormalizedEvent {
                gateway: GatewayName::Stripe,
                event_id: "evt_mock".to_string(),
                event_type: "mock".to_string(),
                event: BillingEvent::Unhandled,
            })
        }

        async fn create_refund(
            &self,
            charge_ref: &str,
            _amount: &BigDecimal,
            _currency: &str,
        ) -> GatewayResult<GatewayRefund> {
            Ok(GatewayRefund {
                gateway_refund_id: Some(format!("re_{}", charge_ref)),
                status: "succeeded".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);

        let verification = gateway
            .verify_webhook(b"{}", &HeaderMap::new())
            .expect("verification should not error");
        assert!(verification.valid);

        let normalized = gateway
            .normalize_event(b"{}")
            .expect("normalization should succeed");
        assert_eq!(normalized.event, BillingEvent::Unhandled);

        let refund = gateway
            .create_refund("ch_1", &BigDecimal::from(10), "USD")
            .await
            .expect("refund should succeed");
        assert_eq!(refund.gateway_refund_id.as_deref(), Some("re_ch_1"));
    }
}
