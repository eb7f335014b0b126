pub mod lemon_squeezy;
pub mod mercado_pago;
pub mod stripe;

pub use lemon_squeezy::LemonSqueezyGateway;
pub use mercado_pago::MercadoPagoGateway;
pub use stripe::StripeGateway;

use crate::gateways::types::WebhookVerificationResult;
use bigdecimal::BigDecimal;
use chrono::TimeZone;
use serde_json::Value as JsonValue;

/// Convert an integer minor-unit amount (cents) to a major-unit decimal
pub(crate) fn minor_units_to_amount(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

/// Convert a major-unit decimal back to integer cents
pub(crate) fn amount_to_minor_units(amount: &BigDecimal) -> Option<i64> {
    use bigdecimal::ToPrimitive;
    (amount * BigDecimal::from(100)).with_scale(0).to_i64()
}

/// Read a JSON number or numeric string as a decimal amount. String
/// amounts parse exactly; plain JSON numbers take serde's shortest
/// decimal form, so `100.10` arrives as `100.1`.
pub(crate) fn decimal_field(value: &JsonValue) -> Option<BigDecimal> {
    use std::str::FromStr;
    match value {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Unix-seconds JSON field to a UTC timestamp
pub(crate) fn unix_timestamp(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .as_i64()
        .and_then(|secs| chrono::Utc.timestamp_opt(secs, 0).single())
}

/// RFC 3339 JSON string field to a UTC timestamp
pub(crate) fn rfc3339_timestamp(value: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Render a JSON scalar as a string reference. Gateways disagree on
/// whether ids are numbers or strings, even between their own events.
pub(crate) fn json_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn verification_failure(reason: &str) -> WebhookVerificationResult {
    WebhookVerificationResult {
        valid: false,
        reason: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn minor_units_round_trip() {
        let amount = minor_units_to_amount(1999);
        assert_eq!(amount, BigDecimal::from_str("19.99").expect("19.99 parses"));
        assert_eq!(amount_to_minor_units(&amount), Some(1999));
    }

    #[test]
    fn decimal_field_preserves_precision() {
        let value = serde_json::json!(100.10);
        assert_eq!(
            decimal_field(&value),
            Some(BigDecimal::from_str("100.1").expect("100.1 parses"))
        );
        assert_eq!(
            decimal_field(&serde_json::json!("49.90")),
            Some(BigDecimal::from_str("49.90").expect("49.90 parses"))
        );
        assert_eq!(decimal_field(&serde_json::json!(null)), None);
    }

    #[test]
    fn timestamps_parse_from_both_shapes() {
        assert!(unix_timestamp(&serde_json::json!(1712000000)).is_some());
        assert!(unix_timestamp(&serde_json::json!("not-a-number")).is_none());
        assert!(rfc3339_timestamp(&serde_json::json!("2026-03-01T00:00:00Z")).is_some());
        assert!(rfc3339_timestamp(&serde_json::json!(1712000000)).is_none());
    }
}
