#[cfg(test)]
mod billing_contract_tests {
    use serde_json::json;

    use Vocira_billing::api::billing::{
        CurrencyResponse, CurrencyUpdateRequest, GatewayConfigResponse,
    };
    use Vocira_billing::api::refunds::{RefundRequest, RefundResponse};
    use Vocira_billing::config::BillingConfig;

    // Admin clients bind against these JSON shapes; key renames are
    // breaking changes even when the Rust side still compiles.

    #[test]
    fn gateway_config_uses_camel_case_keys_and_carries_no_secrets() {
        let response = GatewayConfigResponse {
            gateway: "stripe".to_string(),
            enabled: true,
            configured: true,
            public_key: Some("pk_live_abc".to_string()),
            currency: "USD".to_string(),
            supported_currencies: vec!["USD".to_string(), "EUR".to_string()],
        };

        let value = serde_json::to_value(&response).expect("serializes");
        let object = value.as_object().expect("object");

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "configured",
                "currency",
                "enabled",
                "gateway",
                "publicKey",
                "supportedCurrencies",
            ]
        );
        assert_eq!(value["publicKey"], json!("pk_live_abc"));
        assert_eq!(value["supportedCurrencies"], json!(["USD", "EUR"]));
        for key in object.keys() {
            let lowered = key.to_lowercase();
            assert!(
                !lowered.contains("secret") && !lowered.contains("token"),
                "credential-shaped key leaked: {}",
                key
            );
        }
    }

    #[test]
    fn unconfigured_gateway_reports_null_public_key() {
        let response = GatewayConfigResponse {
            gateway: "mercado_pago".to_string(),
            enabled: false,
            configured: false,
            public_key: None,
            currency: "USD".to_string(),
            supported_currencies: Vec::new(),
        };

        let value = serde_json::to_value(&response).expect("serializes");
        // The key stays present so clients need no existence checks
        assert!(value["publicKey"].is_null());
        assert_eq!(value["enabled"], json!(false));
        assert_eq!(value["configured"], json!(false));
        assert_eq!(value["supportedCurrencies"], json!([]));
    }

    #[test]
    fn refund_request_parses_camel_case_with_optional_reason() {
        let bare: RefundRequest = serde_json::from_value(json!({
            "transactionId": "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3"
        }))
        .expect("parses without reason");
        assert_eq!(bare.transaction_id, "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3");
        assert!(bare.reason.is_none());

        let with_reason: RefundRequest = serde_json::from_value(json!({
            "transactionId": "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3",
            "reason": "duplicate charge"
        }))
        .expect("parses with reason");
        assert_eq!(with_reason.reason.as_deref(), Some("duplicate charge"));

        assert!(serde_json::from_value::<RefundRequest>(json!({})).is_err());
    }

    #[test]
    fn refund_response_serializes_refund_id_key() {
        let response = RefundResponse {
            refund_id: "2b6f9a7e-13aa-4a70-93e4-6f6e9b1c2a41".to_string(),
        };
        let value = serde_json::to_value(&response).expect("serializes");
        assert_eq!(
            value,
            json!({"refundId": "2b6f9a7e-13aa-4a70-93e4-6f6e9b1c2a41"})
        );
    }

    #[test]
    fn currency_payload_shapes_are_stable() {
        let response = CurrencyResponse {
            currency: "EUR".to_string(),
            locked: true,
        };
        let value = serde_json::to_value(&response).expect("serializes");
        assert_eq!(value, json!({"currency": "EUR", "locked": true}));

        let request: CurrencyUpdateRequest =
            serde_json::from_value(json!({"code": "brl"})).expect("parses");
        assert_eq!(request.code, "brl");
    }

    #[test]
    fn default_plan_catalog_resolves_known_ids() {
        let config = BillingConfig::from_env().expect("defaults load");
        config.validate().expect("defaults validate");

        let pro = config.plan("pro").expect("pro plan exists");
        assert_eq!(pro.monthly_credits, 2_000);
        assert!(config.plan("enterprise").is_none());

        let pack = config.credit_package("pack_medium").expect("package exists");
        assert_eq!(pack.credits, 1_500);
        assert!(config.credit_package("pack_giant").is_none());
    }
}
