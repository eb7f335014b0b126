use crate::gateways::error::GatewayError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Stripe,
    MercadoPago,
    LemonSqueezy,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Stripe => "stripe",
            GatewayName::MercadoPago => "mercado_pago",
            GatewayName::LemonSqueezy => "lemon_squeezy",
        }
    }

    pub fn all() -> &'static [GatewayName] {
        &[
            GatewayName::Stripe,
            GatewayName::MercadoPago,
            GatewayName::LemonSqueezy,
        ]
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(GatewayName::Stripe),
            "mercado_pago" | "mercadopago" => Ok(GatewayName::MercadoPago),
            "lemon_squeezy" | "lemonsqueezy" => Ok(GatewayName::LemonSqueezy),
            _ => Err(GatewayError::UnknownGateway {
                name: value.to_string(),
            }),
        }
    }
}

/// What the user paid for at checkout, carried in gateway metadata.
/// Gateways deliver metadata values as strings, so numeric fields accept
/// both shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutMetadata {
    #[serde(alias = "userId")]
    pub user_id: Uuid,
    #[serde(flatten)]
    pub purchase: PurchaseKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PurchaseKind {
    Credits {
        #[serde(alias = "packageId")]
        package_id: String,
        #[serde(default, deserialize_with = "lenient_i64")]
        credits: Option<i64>,
    },
    Subscription {
        #[serde(alias = "planId")]
        plan_id: String,
    },
}

impl CheckoutMetadata {
    /// Parse the metadata object a gateway attached to a checkout. A
    /// missing or malformed object is an explicit error, never a silent
    /// no-op: money changed hands and we cannot tell for what.
    pub fn from_value(value: &JsonValue) -> Result<Self, GatewayError> {
        if value.is_null() {
            return Err(GatewayError::InvalidMetadata {
                message: "metadata object is missing".to_string(),
            });
        }
        serde_json::from_value(value.clone()).map_err(|e| GatewayError::InvalidMetadata {
            message: e.to_string(),
        })
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Canonical billing event, the single shape every gateway payload is
/// reduced to before any handler runs.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BillingEvent {
    CheckoutCompleted {
        metadata: CheckoutMetadata,
        amount: BigDecimal,
        currency: String,
        /// Gateway-side transaction reference; becomes the idempotency key
        external_ref: String,
        /// Gateway-side subscription id, when the checkout opened one
        subscription_ref: Option<String>,
        customer_ref: Option<String>,
    },
    InvoicePaid {
        subscription_ref: String,
        /// Gateway-side reference for this specific charge
        external_ref: String,
        amount: BigDecimal,
        currency: String,
        period_start: Option<chrono::DateTime<chrono::Utc>>,
        period_end: Option<chrono::DateTime<chrono::Utc>>,
    },
    InvoicePaymentFailed {
        subscription_ref: String,
    },
    SubscriptionCancelled {
        subscription_ref: String,
    },
    SubscriptionUpdated {
        subscription_ref: String,
        cancel_at_period_end: bool,
        period_end: Option<chrono::DateTime<chrono::Utc>>,
    },
    DisputeCreated {
        charge_ref: String,
        reason: String,
        amount: BigDecimal,
        currency: String,
    },
    RefundProcessed {
        charge_ref: String,
        amount: BigDecimal,
        currency: String,
        refund_ref: Option<String>,
    },
    Unhandled,
}

/// A gateway payload after normalization
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizedEvent {
    pub gateway: GatewayName,
    pub event_id: String,
    pub event_type: String,
    pub event: BillingEvent,
}

/// Outcome of asking a gateway to refund a charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub gateway_refund_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_name_parsing_works() {
        assert!(matches!(
            GatewayName::from_str("stripe"),
            Ok(GatewayName::Stripe)
        ));
        assert!(matches!(
            GatewayName::from_str("MercadoPago"),
            Ok(GatewayName::MercadoPago)
        ));
        assert!(GatewayName::from_str("paypal").is_err());
    }

    #[test]
    fn credits_metadata_parses_with_string_values() {
        // Stripe metadata values are always strings
        let value = serde_json::json!({
            "user_id": "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3",
            "type": "credits",
            "package_id": "pack_small",
            "credits": "500"
        });
        let metadata = CheckoutMetadata::from_value(&value).expect("metadata should parse");
        assert!(matches!(
            metadata.purchase,
            PurchaseKind::Credits { credits: Some(500), .. }
        ));
    }

    #[test]
    fn subscription_metadata_parses_with_camel_case_keys() {
        let value = serde_json::json!({
            "userId": "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3",
            "type": "subscription",
            "planId": "pro"
        });
        let metadata = CheckoutMetadata::from_value(&value).expect("metadata should parse");
        match metadata.purchase {
            PurchaseKind::Subscription { plan_id } => assert_eq!(plan_id, "pro"),
            other => panic!("unexpected purchase kind: {:?}", other),
        }
    }

    #[test]
    fn metadata_without_user_id_is_rejected() {
        let value = serde_json::json!({
            "type": "credits",
            "package_id": "pack_small",
            "credits": 500
        });
        assert!(matches!(
            CheckoutMetadata::from_value(&value),
            Err(GatewayError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn null_metadata_is_rejected() {
        assert!(matches!(
            CheckoutMetadata::from_value(&JsonValue::Null),
            Err(GatewayError::InvalidMetadata { .. })
        ));
    }
}
