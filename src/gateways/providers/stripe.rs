use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::providers::{
    amount_to_minor_units, minor_units_to_amount, unix_timestamp, verification_failure,
};
use crate::gateways::types::{
    BillingEvent, CheckoutMetadata, GatewayName, GatewayRefund, NormalizedEvent,
    WebhookVerificationResult,
};
use crate::gateways::verify::{
    hmac_sha256_hex, parse_signature_pairs, secure_eq, timestamp_within_tolerance,
    GatewayHttpClient,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub public_key: Option<String>,
    pub webhook_secret: String,
    pub base_url: String,
    /// Maximum age of a signed webhook before it is rejected as a replay
    pub tolerance_secs: i64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            public_key: None,
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            tolerance_secs: 300,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl StripeConfig {
    /// Build from environment variables, then overlay any per-gateway
    /// settings stored in the database. Stored values win over env so
    /// credentials can be rotated without a redeploy.
    pub fn from_sources(settings: Option<&JsonValue>) -> GatewayResult<Self> {
        let defaults = Self::default();
        let mut config = Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            public_key: std::env::var("STRIPE_PUBLIC_KEY").ok(),
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            base_url: std::env::var("STRIPE_API_BASE").unwrap_or(defaults.base_url),
            tolerance_secs: std::env::var("STRIPE_SIGNATURE_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.tolerance_secs),
            timeout_secs: defaults.timeout_secs,
            max_retries: defaults.max_retries,
        };

        if let Some(settings) = settings {
            config = config.apply_settings(settings);
        }

        if config.secret_key.trim().is_empty() || config.webhook_secret.trim().is_empty() {
            return Err(GatewayError::NotConfigured {
                gateway: "stripe".to_string(),
            });
        }

        Ok(config)
    }

    fn apply_settings(mut self, settings: &JsonValue) -> Self {
        if let Some(value) = settings.get("secret_key").and_then(|v| v.as_str()) {
            self.secret_key = value.to_string();
        }
        if let Some(value) = settings.get("public_key").and_then(|v| v.as_str()) {
            self.public_key = Some(value.to_string());
        }
        if let Some(value) = settings.get("webhook_secret").and_then(|v| v.as_str()) {
            self.webhook_secret = value.to_string();
        }
        if let Some(value) = settings.get("base_url").and_then(|v| v.as_str()) {
            self.base_url = value.to_string();
        }
        self
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    http: GatewayHttpClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    fn public_key(&self) -> Option<&str> {
        self.config.public_key.as_deref()
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "BRL", "MXN"]
    }

    /// Checks the `Stripe-Signature` header: `t=<unix>,v1=<hex>` where the
    /// hex digest is HMAC-SHA256 over `"{t}.{raw_body}"`. Headers may carry
    /// several `v1` entries during secret rotation; any match passes.
    fn verify_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> GatewayResult<WebhookVerificationResult> {
        let header = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(value) => value,
            None => return Ok(verification_failure("missing Stripe-Signature header")),
        };

        let pairs = parse_signature_pairs(header);
        let timestamp = pairs
            .iter()
            .find(|(key, _)| *key == "t")
            .and_then(|(_, value)| value.parse::<i64>().ok());
        let timestamp = match timestamp {
            Some(value) => value,
            None => return Ok(verification_failure("malformed Stripe-Signature header")),
        };

        if !timestamp_within_tolerance(timestamp, self.config.tolerance_secs) {
            return Ok(verification_failure("signature timestamp outside tolerance"));
        }

        let mut signed_payload = format!("{}.", timestamp).into_bytes();
        signed_payload.extend_from_slice(payload);
        let expected = hmac_sha256_hex(&signed_payload, &self.config.webhook_secret);

        let valid = pairs
            .iter()
            .any(|(key, value)| *key == "v1" && secure_eq(expected.as_bytes(), value.as_bytes()));

        if valid {
            Ok(WebhookVerificationResult {
                valid: true,
                reason: None,
            })
        } else {
            Ok(verification_failure("no matching v1 signature"))
        }
    }

    fn normalize_event(&self, payload: &[u8]) -> GatewayResult<NormalizedEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::InvalidPayload {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_id = parsed
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let object = parsed
            .get("data")
            .and_then(|v| v.get("object"))
            .cloned()
            .unwrap_or(JsonValue::Null);

        let event = match event_type.as_str() {
            "checkout.session.completed" => {
                let metadata =
                    CheckoutMetadata::from_value(object.get("metadata").unwrap_or(&JsonValue::Null))?;
                let amount = object
                    .get("amount_total")
                    .and_then(|v| v.as_i64())
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("checkout session missing amount_total"))?;
                let currency = currency_field(&object)?;
                // Refund and dispute events reference the payment intent,
                // so that is what gets stored as the transaction reference.
                let external_ref = object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .or_else(|| object.get("id").and_then(|v| v.as_str()))
                    .ok_or_else(|| invalid_payload("checkout session missing payment reference"))?
                    .to_string();
                let subscription_ref = object
                    .get("subscription")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let customer_ref = object
                    .get("customer")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                BillingEvent::CheckoutCompleted {
                    metadata,
                    amount,
                    currency,
                    external_ref,
                    subscription_ref,
                    customer_ref,
                }
            }
            // The first invoice of a subscription settles inside the
            // checkout session that is already handled above; treating it
            // as a renewal would double-award the first period.
            "invoice.paid" | "invoice.payment_succeeded"
                if object.get("billing_reason").and_then(|v| v.as_str())
                    == Some("subscription_create") =>
            {
                BillingEvent::Unhandled
            }
            "invoice.paid" | "invoice.payment_succeeded" => {
                let subscription_ref = object
                    .get("subscription")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid_payload("invoice missing subscription reference"))?
                    .to_string();
                let external_ref = object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .or_else(|| object.get("id").and_then(|v| v.as_str()))
                    .ok_or_else(|| invalid_payload("invoice missing payment reference"))?
                    .to_string();
                let amount = object
                    .get("amount_paid")
                    .and_then(|v| v.as_i64())
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("invoice missing amount_paid"))?;
                let currency = currency_field(&object)?;
                let period = object
                    .get("lines")
                    .and_then(|v| v.get("data"))
                    .and_then(|v| v.get(0))
                    .and_then(|v| v.get("period"));
                let period_start = period
                    .and_then(|p| p.get("start"))
                    .and_then(unix_timestamp)
                    .or_else(|| object.get("period_start").and_then(unix_timestamp));
                let period_end = period
                    .and_then(|p| p.get("end"))
                    .and_then(unix_timestamp)
                    .or_else(|| object.get("period_end").and_then(unix_timestamp));
                BillingEvent::InvoicePaid {
                    subscription_ref,
                    external_ref,
                    amount,
                    currency,
                    period_start,
                    period_end,
                }
            }
            "invoice.payment_failed" => {
                let subscription_ref = object
                    .get("subscription")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid_payload("invoice missing subscription reference"))?
                    .to_string();
                BillingEvent::InvoicePaymentFailed { subscription_ref }
            }
            "customer.subscription.deleted" => {
                let subscription_ref = object
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid_payload("subscription object missing id"))?
                    .to_string();
                BillingEvent::SubscriptionCancelled { subscription_ref }
            }
            "customer.subscription.updated" => {
                let subscription_ref = object
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid_payload("subscription object missing id"))?
                    .to_string();
                let cancel_at_period_end = object
                    .get("cancel_at_period_end")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let period_end = object.get("current_period_end").and_then(unix_timestamp);
                BillingEvent::SubscriptionUpdated {
                    subscription_ref,
                    cancel_at_period_end,
                    period_end,
                }
            }
            "charge.dispute.created" => {
                let charge_ref = object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .or_else(|| object.get("charge").and_then(|v| v.as_str()))
                    .ok_or_else(|| invalid_payload("dispute missing charge reference"))?
                    .to_string();
                let reason = object
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let amount = object
                    .get("amount")
                    .and_then(|v| v.as_i64())
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("dispute missing amount"))?;
                let currency = currency_field(&object)?;
                BillingEvent::DisputeCreated {
                    charge_ref,
                    reason,
                    amount,
                    currency,
                }
            }
            "charge.refunded" => {
                let charge_ref = object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .or_else(|| object.get("id").and_then(|v| v.as_str()))
                    .ok_or_else(|| invalid_payload("charge object missing id"))?
                    .to_string();
                let amount = object
                    .get("amount_refunded")
                    .and_then(|v| v.as_i64())
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("charge missing amount_refunded"))?;
                let currency = currency_field(&object)?;
                let refund_ref = object
                    .get("refunds")
                    .and_then(|v| v.get("data"))
                    .and_then(|v| v.get(0))
                    .and_then(|v| v.get("id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                BillingEvent::RefundProcessed {
                    charge_ref,
                    amount,
                    currency,
                    refund_ref,
                }
            }
            _ => BillingEvent::Unhandled,
        };

        Ok(NormalizedEvent {
            gateway: GatewayName::Stripe,
            event_id,
            event_type,
            event,
        })
    }

    async fn create_refund(
        &self,
        charge_ref: &str,
        amount: &BigDecimal,
        _currency: &str,
    ) -> GatewayResult<GatewayRefund> {
        let minor = amount_to_minor_units(amount).ok_or_else(|| GatewayError::InvalidPayload {
            message: format!("refund amount out of range: {}", amount),
        })?;

        info!(charge = %charge_ref, amount_minor = minor, "creating stripe refund");

        // Stored references are payment intents, not charge ids
        let form = [
            ("payment_intent", charge_ref.to_string()),
            ("amount", minor.to_string()),
        ];
        let refund: StripeRefund = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                Some(&self.config.secret_key),
                &form,
                &[],
            )
            .await?;

        info!(refund_id = %refund.id, charge = %charge_ref, "stripe refund created");

        Ok(GatewayRefund {
            gateway_refund_id: Some(refund.id),
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}

fn invalid_payload(message: &str) -> GatewayError {
    GatewayError::InvalidPayload {
        message: message.to_string(),
    }
}

fn currency_field(object: &JsonValue) -> GatewayResult<String> {
    object
        .get("currency")
        .and_then(|v| v.as_str())
        .map(str::to_uppercase)
        .ok_or_else(|| invalid_payload("event object missing currency"))
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test_abc".to_string(),
            public_key: Some("pk_test_abc".to_string()),
            webhook_secret: "whsec_test".to_string(),
            ..StripeConfig::default()
        })
        .expect("test gateway")
    }

    fn signed_headers(body: &str, secret: &str) -> HeaderMap {
        let timestamp = chrono::Utc::now().timestamp();
        let signed_payload = format!("{}.{}", timestamp, body);
        let signature = hmac_sha256_hex(signed_payload.as_bytes(), secret);
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            format!("t={},v1={}", timestamp, signature)
                .parse()
                .expect("header value"),
        );
        headers
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let gateway = gateway();
        let body = r#"{"id":"evt_1","type":"charge.refunded"}"#;
        let headers = signed_headers(body, "whsec_test");

        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(result.valid, "reason: {:?}", result.reason);
    }

    #[test]
    fn rejects_wrong_secret_and_missing_header() {
        let gateway = gateway();
        let body = r#"{"id":"evt_1"}"#;

        let headers = signed_headers(body, "whsec_other");
        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(!result.valid);

        let result = gateway
            .verify_webhook(body.as_bytes(), &HeaderMap::new())
            .expect("verification runs");
        assert!(!result.valid);
        assert_eq!(
            result.reason.as_deref(),
            Some("missing Stripe-Signature header")
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let gateway = gateway();
        let body = r#"{"id":"evt_1"}"#;
        let timestamp = chrono::Utc::now().timestamp() - 3600;
        let signed_payload = format!("{}.{}", timestamp, body);
        let signature = hmac_sha256_hex(signed_payload.as_bytes(), "whsec_test");
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            format!("t={},v1={}", timestamp, signature)
                .parse()
                .expect("header value"),
        );

        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(!result.valid);
        assert_eq!(
            result.reason.as_deref(),
            Some("signature timestamp outside tolerance")
        );
    }

    #[test]
    fn accepts_any_matching_v1_during_rotation() {
        let gateway = gateway();
        let body = r#"{"id":"evt_1"}"#;
        let timestamp = chrono::Utc::now().timestamp();
        let signed_payload = format!("{}.{}", timestamp, body);
        let good = hmac_sha256_hex(signed_payload.as_bytes(), "whsec_test");
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            format!("t={},v1={},v1={}", timestamp, "0".repeat(64), good)
                .parse()
                .expect("header value"),
        );

        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(result.valid);
    }

    #[test]
    fn normalizes_checkout_session() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": "evt_check_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_123",
                "payment_intent": "pi_777",
                "amount_total": 1999,
                "currency": "usd",
                "customer": "cus_9",
                "metadata": {
                    "userId": "7b0e0b9c-9d3e-4c5f-8a2b-1f2e3d4c5b6a",
                    "type": "credits",
                    "packageId": "pack_medium",
                    "credits": "1500"
                }
            }}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert_eq!(normalized.gateway, GatewayName::Stripe);
        assert_eq!(normalized.event_id, "evt_check_1");
        match normalized.event {
            BillingEvent::CheckoutCompleted {
                metadata,
                amount,
                currency,
                external_ref,
                subscription_ref,
                customer_ref,
            } => {
                assert_eq!(currency, "USD");
                assert_eq!(amount, minor_units_to_amount(1999));
                assert_eq!(external_ref, "pi_777");
                assert_eq!(subscription_ref, None);
                assert_eq!(customer_ref.as_deref(), Some("cus_9"));
                assert_eq!(
                    metadata.user_id.to_string(),
                    "7b0e0b9c-9d3e-4c5f-8a2b-1f2e3d4c5b6a"
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn first_subscription_invoice_is_not_a_renewal() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": "evt_inv_0",
            "type": "invoice.paid",
            "data": {"object": {
                "id": "in_first",
                "billing_reason": "subscription_create",
                "subscription": "sub_88",
                "amount_paid": 2900,
                "currency": "usd"
            }}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert!(matches!(normalized.event, BillingEvent::Unhandled));
    }

    #[test]
    fn normalizes_invoice_paid_with_line_period() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": "evt_inv_1",
            "type": "invoice.paid",
            "data": {"object": {
                "id": "in_77",
                "billing_reason": "subscription_cycle",
                "subscription": "sub_88",
                "amount_paid": 2900,
                "currency": "usd",
                "lines": {"data": [{"period": {"start": 1750000000, "end": 1752678400}}]}
            }}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        match normalized.event {
            BillingEvent::InvoicePaid {
                subscription_ref,
                external_ref,
                period_start,
                period_end,
                ..
            } => {
                assert_eq!(subscription_ref, "sub_88");
                assert_eq!(external_ref, "in_77");
                assert!(period_start.is_some());
                assert!(period_end.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn checkout_without_metadata_is_rejected() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": "evt_check_2",
            "type": "checkout.session.completed",
            "data": {"object": {"amount_total": 500, "currency": "usd"}}
        });

        let err = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect_err("must reject");
        assert!(matches!(err, GatewayError::InvalidMetadata { .. }));
    }

    #[test]
    fn unknown_event_type_is_unhandled() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": "evt_x",
            "type": "payment_intent.created",
            "data": {"object": {}}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert_eq!(normalized.event_type, "payment_intent.created");
        assert!(matches!(normalized.event, BillingEvent::Unhandled));
    }
}
