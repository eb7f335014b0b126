use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::providers::{
    amount_to_minor_units, json_to_string, minor_units_to_amount, rfc3339_timestamp,
    verification_failure,
};
use crate::gateways::types::{
    BillingEvent, CheckoutMetadata, GatewayName, GatewayRefund, NormalizedEvent,
    WebhookVerificationResult,
};
use crate::gateways::verify::{hmac_sha256_hex, secure_eq, GatewayHttpClient};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const SIGNATURE_HEADER: &str = "x-signature";
const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

#[derive(Debug, Clone)]
pub struct LemonSqueezyConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LemonSqueezyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.lemonsqueezy.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl LemonSqueezyConfig {
    /// Env first, database settings overlaid on top. See
    /// [`StripeConfig::from_sources`](super::stripe::StripeConfig::from_sources).
    pub fn from_sources(settings: Option<&JsonValue>) -> GatewayResult<Self> {
        let defaults = Self::default();
        let mut config = Self {
            api_key: std::env::var("LEMON_SQUEEZY_API_KEY").unwrap_or_default(),
            webhook_secret: std::env::var("LEMON_SQUEEZY_WEBHOOK_SECRET").unwrap_or_default(),
            base_url: std::env::var("LEMON_SQUEEZY_API_BASE").unwrap_or(defaults.base_url),
            timeout_secs: defaults.timeout_secs,
            max_retries: defaults.max_retries,
        };

        if let Some(settings) = settings {
            if let Some(value) = settings.get("api_key").and_then(|v| v.as_str()) {
                config.api_key = value.to_string();
            }
            if let Some(value) = settings.get("webhook_secret").and_then(|v| v.as_str()) {
                config.webhook_secret = value.to_string();
            }
            if let Some(value) = settings.get("base_url").and_then(|v| v.as_str()) {
                config.base_url = value.to_string();
            }
        }

        if config.api_key.trim().is_empty() || config.webhook_secret.trim().is_empty() {
            return Err(GatewayError::NotConfigured {
                gateway: "lemon_squeezy".to_string(),
            });
        }

        Ok(config)
    }
}

pub struct LemonSqueezyGateway {
    config: LemonSqueezyConfig,
    http: GatewayHttpClient,
}

impl LemonSqueezyGateway {
    pub fn new(config: LemonSqueezyConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for LemonSqueezyGateway {
    fn name(&self) -> GatewayName {
        GatewayName::LemonSqueezy
    }

    /// Lemon Squeezy has no publishable client key; checkout links are
    /// generated server side.
    fn public_key(&self) -> Option<&str> {
        None
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP"]
    }

    /// `X-Signature` is a plain hex HMAC-SHA256 of the raw body. There is
    /// no timestamp component, so replay protection rests entirely on the
    /// delivery table's unique (gateway, event_id) key.
    fn verify_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> GatewayResult<WebhookVerificationResult> {
        let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(value) => value.trim(),
            None => return Ok(verification_failure("missing X-Signature header")),
        };

        let expected = hmac_sha256_hex(payload, &self.config.webhook_secret);
        if secure_eq(expected.as_bytes(), signature.to_lowercase().as_bytes()) {
            Ok(WebhookVerificationResult {
                valid: true,
                reason: None,
            })
        } else {
            Ok(verification_failure("signature mismatch"))
        }
    }

    fn normalize_event(&self, payload: &[u8]) -> GatewayResult<NormalizedEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::InvalidPayload {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let meta = parsed.get("meta").cloned().unwrap_or(JsonValue::Null);
        let event_name = meta
            .get("event_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data").cloned().unwrap_or(JsonValue::Null);
        let data_ref = data
            .get("id")
            .map(json_to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let attributes = data.get("attributes").cloned().unwrap_or(JsonValue::Null);
        // No webhook id in the payload, so the composite has to stand in
        let event_id = format!("{}:{}", event_name, data_ref);

        let event = match event_name.as_str() {
            "order_created" => {
                let metadata = CheckoutMetadata::from_value(
                    meta.get("custom_data").unwrap_or(&JsonValue::Null),
                )?;
                let amount = attributes
                    .get("total")
                    .and_then(|v| v.as_i64())
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("order missing total"))?;
                let currency = currency_field(&attributes)?;
                let subscription_ref = attributes
                    .get("first_subscription_item")
                    .and_then(|item| item.get("subscription_id"))
                    .map(json_to_string);
                let customer_ref = attributes.get("customer_id").map(json_to_string);
                BillingEvent::CheckoutCompleted {
                    metadata,
                    amount,
                    currency,
                    external_ref: data_ref.clone(),
                    subscription_ref,
                    customer_ref,
                }
            }
            "subscription_payment_success" => {
                let subscription_ref = attributes
                    .get("subscription_id")
                    .map(json_to_string)
                    .ok_or_else(|| invalid_payload("invoice missing subscription_id"))?;
                let amount = attributes
                    .get("total")
                    .and_then(|v| v.as_i64())
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("invoice missing total"))?;
                let currency = currency_field(&attributes)?;
                BillingEvent::InvoicePaid {
                    subscription_ref,
                    external_ref: data_ref.clone(),
                    amount,
                    currency,
                    period_start: None,
                    period_end: None,
                }
            }
            "subscription_payment_failed" => {
                let subscription_ref = attributes
                    .get("subscription_id")
                    .map(json_to_string)
                    .ok_or_else(|| invalid_payload("invoice missing subscription_id"))?;
                BillingEvent::InvoicePaymentFailed { subscription_ref }
            }
            "subscription_cancelled" | "subscription_expired" => {
                BillingEvent::SubscriptionCancelled {
                    subscription_ref: data_ref.clone(),
                }
            }
            "subscription_updated" => {
                let cancel_at_period_end = attributes
                    .get("cancelled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let period_end = attributes
                    .get("renews_at")
                    .and_then(rfc3339_timestamp);
                BillingEvent::SubscriptionUpdated {
                    subscription_ref: data_ref.clone(),
                    cancel_at_period_end,
                    period_end,
                }
            }
            "order_refunded" => {
                let amount = attributes
                    .get("refunded_amount")
                    .and_then(|v| v.as_i64())
                    .filter(|minor| *minor > 0)
                    .or_else(|| attributes.get("total").and_then(|v| v.as_i64()))
                    .map(minor_units_to_amount)
                    .ok_or_else(|| invalid_payload("refunded order missing amount fields"))?;
                let currency = currency_field(&attributes)?;
                BillingEvent::RefundProcessed {
                    charge_ref: data_ref.clone(),
                    amount,
                    currency,
                    refund_ref: None,
                }
            }
            _ => BillingEvent::Unhandled,
        };

        Ok(NormalizedEvent {
            gateway: GatewayName::LemonSqueezy,
            event_id,
            event_type: event_name,
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

        info!(order = %charge_ref, amount_minor = minor, "creating lemon squeezy refund");

        let body = serde_json::json!({
            "data": {
                "type": "orders",
                "id": charge_ref,
                "attributes": { "amount": minor }
            }
        });
        let response: LemonSqueezyRefundResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/orders/{}/refund", charge_ref)),
                Some(&self.config.api_key),
                Some(&body),
                &[
                    ("Accept", JSON_API_CONTENT_TYPE),
                    ("Content-Type", JSON_API_CONTENT_TYPE),
                ],
            )
            .await?;

        info!(order = %charge_ref, "lemon squeezy refund created");

        Ok(GatewayRefund {
            gateway_refund_id: Some(response.data.id),
            status: response
                .data
                .attributes
                .and_then(|a| a.status)
                .unwrap_or_else(|| "refunded".to_string()),
        })
    }
}

fn invalid_payload(message: &str) -> GatewayError {
    GatewayError::InvalidPayload {
        message: message.to_string(),
    }
}

fn currency_field(attributes: &JsonValue) -> GatewayResult<String> {
    attributes
        .get("currency")
        .and_then(|v| v.as_str())
        .map(str::to_uppercase)
        .ok_or_else(|| invalid_payload("order attributes missing currency"))
}

#[derive(Debug, Deserialize)]
struct LemonSqueezyRefundResponse {
    data: LemonSqueezyRefundData,
}

#[derive(Debug, Deserialize)]
struct LemonSqueezyRefundData {
    id: String,
    attributes: Option<LemonSqueezyRefundAttributes>,
}

#[derive(Debug, Deserialize)]
struct LemonSqueezyRefundAttributes {
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> LemonSqueezyGateway {
        LemonSqueezyGateway::new(LemonSqueezyConfig {
            api_key: "lsq_test".to_string(),
            webhook_secret: "ls_secret".to_string(),
            ..LemonSqueezyConfig::default()
        })
        .expect("test gateway")
    }

    #[test]
    fn accepts_body_hmac_and_rejects_tampering() {
        let gateway = gateway();
        let body = r#"{"meta":{"event_name":"order_created"},"data":{"id":"1"}}"#;
        let signature = hmac_sha256_hex(body.as_bytes(), "ls_secret");
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, signature.parse().expect("header value"));

        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(result.valid);

        let tampered = body.replace("order_created", "order_refunded");
        let result = gateway
            .verify_webhook(tampered.as_bytes(), &headers)
            .expect("verification runs");
        assert!(!result.valid);
    }

    #[test]
    fn normalizes_order_with_custom_data() {
        let gateway = gateway();
        let body = serde_json::json!({
            "meta": {
                "event_name": "order_created",
                "custom_data": {
                    "user_id": "7b0e0b9c-9d3e-4c5f-8a2b-1f2e3d4c5b6a",
                    "type": "subscription",
                    "plan_id": "pro"
                }
            },
            "data": {
                "id": "ord_42",
                "attributes": {
                    "total": 2900,
                    "currency": "usd",
                    "customer_id": 998877
                }
            }
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert_eq!(normalized.gateway, GatewayName::LemonSqueezy);
        assert_eq!(normalized.event_id, "order_created:ord_42");
        match normalized.event {
            BillingEvent::CheckoutCompleted {
                currency,
                customer_ref,
                ..
            } => {
                assert_eq!(currency, "USD");
                assert_eq!(customer_ref.as_deref(), Some("998877"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn subscription_update_carries_renewal_date() {
        let gateway = gateway();
        let body = serde_json::json!({
            "meta": {"event_name": "subscription_updated"},
            "data": {
                "id": "sub_7",
                "attributes": {
                    "cancelled": true,
                    "renews_at": "2026-09-21T00:00:00Z"
                }
            }
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        match normalized.event {
            BillingEvent::SubscriptionUpdated {
                subscription_ref,
                cancel_at_period_end,
                period_end,
            } => {
                assert_eq!(subscription_ref, "sub_7");
                assert!(cancel_at_period_end);
                assert!(period_end.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn refund_prefers_refunded_amount_over_total() {
        let gateway = gateway();
        let body = serde_json::json!({
            "meta": {"event_name": "order_refunded"},
            "data": {
                "id": "ord_42",
                "attributes": {
                    "total": 2900,
                    "refunded_amount": 1450,
                    "currency": "usd"
                }
            }
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        match normalized.event {
            BillingEvent::RefundProcessed { amount, .. } => {
                assert_eq!(amount, minor_units_to_amount(1450));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn expired_subscription_maps_to_cancellation() {
        let gateway = gateway();
        let body = serde_json::json!({
            "meta": {"event_name": "subscription_expired"},
            "data": {"id": "sub_7", "attributes": {}}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert!(matches!(
            normalized.event,
            BillingEvent::SubscriptionCancelled { ref subscription_ref }
                if subscription_ref == "sub_7"
        ));
    }
}
