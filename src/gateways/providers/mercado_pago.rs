use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::providers::{decimal_field, json_to_string, verification_failure};
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

const SIGNATURE_HEADER: &str = "x-signature";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub public_key: Option<String>,
    pub webhook_secret: String,
    pub base_url: String,
    pub tolerance_secs: i64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            public_key: None,
            webhook_secret: String::new(),
            base_url: "https://api.mercadopago.com".to_string(),
            tolerance_secs: 300,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl MercadoPagoConfig {
    /// Env first, database settings overlaid on top. See
    /// [`StripeConfig::from_sources`](super::stripe::StripeConfig::from_sources).
    pub fn from_sources(settings: Option<&JsonValue>) -> GatewayResult<Self> {
        let defaults = Self::default();
        let mut config = Self {
            access_token: std::env::var("MERCADO_PAGO_ACCESS_TOKEN").unwrap_or_default(),
            public_key: std::env::var("MERCADO_PAGO_PUBLIC_KEY").ok(),
            webhook_secret: std::env::var("MERCADO_PAGO_WEBHOOK_SECRET").unwrap_or_default(),
            base_url: std::env::var("MERCADO_PAGO_API_BASE").unwrap_or(defaults.base_url),
            tolerance_secs: defaults.tolerance_secs,
            timeout_secs: defaults.timeout_secs,
            max_retries: defaults.max_retries,
        };

        if let Some(settings) = settings {
            if let Some(value) = settings.get("access_token").and_then(|v| v.as_str()) {
                config.access_token = value.to_string();
            }
            if let Some(value) = settings.get("public_key").and_then(|v| v.as_str()) {
                config.public_key = Some(value.to_string());
            }
            if let Some(value) = settings.get("webhook_secret").and_then(|v| v.as_str()) {
                config.webhook_secret = value.to_string();
            }
            if let Some(value) = settings.get("base_url").and_then(|v| v.as_str()) {
                config.base_url = value.to_string();
            }
        }

        if config.access_token.trim().is_empty() || config.webhook_secret.trim().is_empty() {
            return Err(GatewayError::NotConfigured {
                gateway: "mercado_pago".to_string(),
            });
        }

        Ok(config)
    }
}

pub struct MercadoPagoGateway {
    config: MercadoPagoConfig,
    http: GatewayHttpClient,
}

impl MercadoPagoGateway {
    pub fn new(config: MercadoPagoConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn name(&self) -> GatewayName {
        GatewayName::MercadoPago
    }

    fn public_key(&self) -> Option<&str> {
        self.config.public_key.as_deref()
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["BRL", "ARS", "MXN", "CLP", "COP", "PEN", "UYU"]
    }

    /// Mercado Pago signs a manifest rather than the body itself:
    /// `id:{data.id};request-id:{x-request-id};ts:{ts};` keyed by the
    /// webhook secret, with `ts` and the digest carried in `x-signature`.
    fn verify_webhook(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> GatewayResult<WebhookVerificationResult> {
        let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(value) => value,
            None => return Ok(verification_failure("missing x-signature header")),
        };
        let request_id = match headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
            Some(value) => value,
            None => return Ok(verification_failure("missing x-request-id header")),
        };

        let pairs = parse_signature_pairs(signature);
        let ts = pairs
            .iter()
            .find(|(key, _)| *key == "ts")
            .map(|(_, value)| *value);
        let v1 = pairs
            .iter()
            .find(|(key, _)| *key == "v1")
            .map(|(_, value)| *value);
        let (ts, v1) = match (ts, v1) {
            (Some(ts), Some(v1)) => (ts, v1),
            _ => return Ok(verification_failure("malformed x-signature header")),
        };

        match ts.parse::<i64>() {
            Ok(timestamp) if timestamp_within_tolerance(timestamp, self.config.tolerance_secs) => {}
            Ok(_) => return Ok(verification_failure("signature timestamp outside tolerance")),
            Err(_) => return Ok(verification_failure("malformed x-signature header")),
        }

        let parsed: JsonValue = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(_) => return Ok(verification_failure("unparseable webhook body")),
        };
        let data_id = match data_id(&parsed) {
            Some(id) => id,
            None => return Ok(verification_failure("webhook body missing data.id")),
        };

        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        let expected = hmac_sha256_hex(manifest.as_bytes(), &self.config.webhook_secret);

        if secure_eq(expected.as_bytes(), v1.as_bytes()) {
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

        let action = parsed
            .get("action")
            .or_else(|| parsed.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data").cloned().unwrap_or(JsonValue::Null);
        let event_id = match parsed.get("id") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => format!(
                "{}:{}",
                action,
                data_id(&parsed).unwrap_or_else(|| "unknown".to_string())
            ),
        };

        let event = match action.as_str() {
            "payment.created" | "payment.updated" => {
                let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("");
                match status {
                    "approved" => {
                        let metadata = CheckoutMetadata::from_value(
                            data.get("metadata").unwrap_or(&JsonValue::Null),
                        )?;
                        let amount = data
                            .get("transaction_amount")
                            .and_then(decimal_field)
                            .ok_or_else(|| {
                                invalid_payload("payment missing transaction_amount")
                            })?;
                        let currency = currency_field(&data)?;
                        let external_ref = data_id(&parsed)
                            .ok_or_else(|| invalid_payload("payment missing data.id"))?;
                        let subscription_ref = data
                            .get("preapproval_id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string);
                        let customer_ref = data
                            .get("payer")
                            .and_then(|p| p.get("id"))
                            .map(json_to_string);
                        BillingEvent::CheckoutCompleted {
                            metadata,
                            amount,
                            currency,
                            external_ref,
                            subscription_ref,
                            customer_ref,
                        }
                    }
                    "refunded" => {
                        let charge_ref = data_id(&parsed)
                            .ok_or_else(|| invalid_payload("payment missing data.id"))?;
                        let amount = data
                            .get("transaction_amount_refunded")
                            .and_then(decimal_field)
                            .or_else(|| data.get("transaction_amount").and_then(decimal_field))
                            .ok_or_else(|| {
                                invalid_payload("refunded payment missing amount fields")
                            })?;
                        let currency = currency_field(&data)?;
                        BillingEvent::RefundProcessed {
                            charge_ref,
                            amount,
                            currency,
                            refund_ref: None,
                        }
                    }
                    // Pending, in_process and rejected payments grant nothing
                    _ => BillingEvent::Unhandled,
                }
            }
            "subscription_authorized_payment.created" => {
                let subscription_ref = data
                    .get("preapproval_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid_payload("authorized payment missing preapproval_id"))?
                    .to_string();
                let external_ref = data_id(&parsed)
                    .ok_or_else(|| invalid_payload("authorized payment missing data.id"))?;
                let amount = data
                    .get("transaction_amount")
                    .and_then(decimal_field)
                    .ok_or_else(|| invalid_payload("payment missing transaction_amount"))?;
                let currency = currency_field(&data)?;
                // Mercado Pago does not send period bounds with recurring
                // charges; the renewal path falls back to a 30 day window.
                BillingEvent::InvoicePaid {
                    subscription_ref,
                    external_ref,
                    amount,
                    currency,
                    period_start: None,
                    period_end: None,
                }
            }
            "subscription_preapproval.updated" => {
                let subscription_ref = data_id(&parsed)
                    .ok_or_else(|| invalid_payload("preapproval update missing data.id"))?;
                let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("");
                match status {
                    "cancelled" => BillingEvent::SubscriptionCancelled { subscription_ref },
                    "paused" => BillingEvent::InvoicePaymentFailed { subscription_ref },
                    _ => BillingEvent::SubscriptionUpdated {
                        subscription_ref,
                        cancel_at_period_end: false,
                        period_end: None,
                    },
                }
            }
            action if action.starts_with("chargeback") => {
                let charge_ref = data
                    .get("payment_id")
                    .map(json_to_string)
                    .or_else(|| data_id(&parsed))
                    .ok_or_else(|| invalid_payload("chargeback missing payment reference"))?;
                let amount = data
                    .get("amount")
                    .and_then(decimal_field)
                    .or_else(|| data.get("transaction_amount").and_then(decimal_field))
                    .ok_or_else(|| invalid_payload("chargeback missing amount"))?;
                let currency = currency_field(&data)?;
                let reason = data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("chargeback")
                    .to_string();
                BillingEvent::DisputeCreated {
                    charge_ref,
                    reason,
                    amount,
                    currency,
                }
            }
            _ => BillingEvent::Unhandled,
        };

        Ok(NormalizedEvent {
            gateway: GatewayName::MercadoPago,
            event_id,
            event_type: action,
            event,
        })
    }

    async fn create_refund(
        &self,
        charge_ref: &str,
        amount: &BigDecimal,
        _currency: &str,
    ) -> GatewayResult<GatewayRefund> {
        use bigdecimal::ToPrimitive;

        let major = amount.to_f64().ok_or_else(|| GatewayError::InvalidPayload {
            message: format!("refund amount out of range: {}", amount),
        })?;

        info!(payment = %charge_ref, amount = major, "creating mercado pago refund");

        let body = serde_json::json!({ "amount": major });
        let refund: MercadoPagoRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/payments/{}/refunds", charge_ref)),
                Some(&self.config.access_token),
                Some(&body),
                &[],
            )
            .await?;

        info!(refund_id = refund.id, payment = %charge_ref, "mercado pago refund created");

        Ok(GatewayRefund {
            gateway_refund_id: Some(refund.id.to_string()),
            status: refund.status.unwrap_or_else(|| "approved".to_string()),
        })
    }
}

/// `data.id` arrives as a string for preapprovals and as a bare number
/// for payments
fn data_id(payload: &JsonValue) -> Option<String> {
    match payload.get("data").and_then(|d| d.get("id")) {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn invalid_payload(message: &str) -> GatewayError {
    GatewayError::InvalidPayload {
        message: message.to_string(),
    }
}

fn currency_field(data: &JsonValue) -> GatewayResult<String> {
    data.get("currency_id")
        .and_then(|v| v.as_str())
        .map(str::to_uppercase)
        .ok_or_else(|| invalid_payload("event data missing currency_id"))
}

#[derive(Debug, Deserialize)]
struct MercadoPagoRefund {
    id: i64,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> MercadoPagoGateway {
        MercadoPagoGateway::new(MercadoPagoConfig {
            access_token: "APP_USR-test".to_string(),
            webhook_secret: "mp_secret".to_string(),
            ..MercadoPagoConfig::default()
        })
        .expect("test gateway")
    }

    fn signed_headers(data_id: &str, request_id: &str, secret: &str) -> HeaderMap {
        let ts = chrono::Utc::now().timestamp();
        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        let signature = hmac_sha256_hex(manifest.as_bytes(), secret);
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            format!("ts={},v1={}", ts, signature)
                .parse()
                .expect("header value"),
        );
        headers.insert(REQUEST_ID_HEADER, request_id.parse().expect("header value"));
        headers
    }

    #[test]
    fn accepts_correctly_signed_manifest() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": 101,
            "action": "payment.updated",
            "data": {"id": 555666}
        })
        .to_string();
        let headers = signed_headers("555666", "req-abc", "mp_secret");

        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(result.valid, "reason: {:?}", result.reason);
    }

    #[test]
    fn rejects_missing_request_id_and_bad_secret() {
        let gateway = gateway();
        let body = serde_json::json!({"id": 1, "data": {"id": 9}}).to_string();

        let mut headers = signed_headers("9", "req-1", "mp_secret");
        headers.remove(REQUEST_ID_HEADER);
        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("missing x-request-id header"));

        let headers = signed_headers("9", "req-1", "wrong_secret");
        let result = gateway
            .verify_webhook(body.as_bytes(), &headers)
            .expect("verification runs");
        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("signature mismatch"));
    }

    #[test]
    fn normalizes_approved_payment_with_float_amount() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": 77,
            "action": "payment.updated",
            "data": {
                "id": 555666,
                "status": "approved",
                "transaction_amount": 100.10,
                "currency_id": "BRL",
                "payer": {"id": 12345},
                "metadata": {
                    "user_id": "7b0e0b9c-9d3e-4c5f-8a2b-1f2e3d4c5b6a",
                    "type": "credits",
                    "package_id": "pack_small",
                    "credits": 500
                }
            }
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert_eq!(normalized.gateway, GatewayName::MercadoPago);
        assert_eq!(normalized.event_id, "77");
        match normalized.event {
            BillingEvent::CheckoutCompleted {
                amount,
                currency,
                customer_ref,
                ..
            } => {
                use std::str::FromStr;
                assert_eq!(amount, BigDecimal::from_str("100.1").expect("parses"));
                assert_eq!(currency, "BRL");
                assert_eq!(customer_ref.as_deref(), Some("12345"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn recurring_charge_has_no_period_bounds() {
        let gateway = gateway();
        let body = serde_json::json!({
            "action": "subscription_authorized_payment.created",
            "data": {
                "id": 900,
                "preapproval_id": "preap_31",
                "transaction_amount": 29.0,
                "currency_id": "ARS"
            }
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert_eq!(normalized.event_id, "subscription_authorized_payment.created:900");
        match normalized.event {
            BillingEvent::InvoicePaid {
                subscription_ref,
                period_start,
                period_end,
                ..
            } => {
                assert_eq!(subscription_ref, "preap_31");
                assert!(period_start.is_none());
                assert!(period_end.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn paused_preapproval_maps_to_payment_failure() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": 3,
            "action": "subscription_preapproval.updated",
            "data": {"id": "preap_31", "status": "paused"}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert!(matches!(
            normalized.event,
            BillingEvent::InvoicePaymentFailed { ref subscription_ref }
                if subscription_ref == "preap_31"
        ));
    }

    #[test]
    fn pending_payment_is_unhandled() {
        let gateway = gateway();
        let body = serde_json::json!({
            "id": 4,
            "action": "payment.created",
            "data": {"id": 1, "status": "pending"}
        });

        let normalized = gateway
            .normalize_event(body.to_string().as_bytes())
            .expect("normalizes");
        assert!(matches!(normalized.event, BillingEvent::Unhandled));
    }
}
