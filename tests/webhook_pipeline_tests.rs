#[cfg(test)]
mod webhook_pipeline_tests {
    use bigdecimal::BigDecimal;
    use http::HeaderMap;
    use serde_json::json;
    use std::str::FromStr;

    use Vocira_billing::gateways::error::GatewayError;
    use Vocira_billing::gateways::gateway::PaymentGateway;
    use Vocira_billing::gateways::providers::lemon_squeezy::{
        LemonSqueezyConfig, LemonSqueezyGateway,
    };
    use Vocira_billing::gateways::providers::mercado_pago::{
        MercadoPagoConfig, MercadoPagoGateway,
    };
    use Vocira_billing::gateways::providers::stripe::{StripeConfig, StripeGateway};
    use Vocira_billing::gateways::types::{BillingEvent, GatewayName, PurchaseKind};
    use Vocira_billing::gateways::verify::hmac_sha256_hex;

    const WEBHOOK_SECRET: &str = "whsec_pipeline_test";
    const USER_ID: &str = "7f0c6f1a-9a4e-4f87-a6cb-1df2b4c0d9f3";

    fn stripe() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test_123".to_string(),
            public_key: Some("pk_test_123".to_string()),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            ..StripeConfig::default()
        })
        .expect("stripe gateway builds")
    }

    fn mercado_pago() -> MercadoPagoGateway {
        MercadoPagoGateway::new(MercadoPagoConfig {
            access_token: "TEST-token".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            ..MercadoPagoConfig::default()
        })
        .expect("mercado pago gateway builds")
    }

    fn lemon_squeezy() -> LemonSqueezyGateway {
        LemonSqueezyGateway::new(LemonSqueezyConfig {
            api_key: "lsq_test_key".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            ..LemonSqueezyConfig::default()
        })
        .expect("lemon squeezy gateway builds")
    }

    fn stripe_headers(body: &[u8]) -> HeaderMap {
        let timestamp = chrono::Utc::now().timestamp();
        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(body);
        let signature = hmac_sha256_hex(&signed, WEBHOOK_SECRET);

        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            format!("t={},v1={}", timestamp, signature)
                .parse()
                .expect("header value"),
        );
        headers
    }

    // One end-to-end per gateway: the exact bytes that were signed flow
    // through verification and into the canonical event, the same path
    // the webhook endpoint drives in production.

    #[test]
    fn stripe_signed_checkout_flows_to_canonical_event() {
        let gateway = stripe();
        let body = json!({
            "id": "evt_1NirvanaTest",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_a1b2c3",
                    "payment_intent": "pi_3OaXYZ",
                    "customer": "cus_9qwerty",
                    "amount_total": 1999,
                    "currency": "usd",
                    "metadata": {
                        "user_id": USER_ID,
                        "type": "credits",
                        "package_id": "pack_small",
                        "credits": "500"
                    }
                }
            }
        })
        .to_string()
        .into_bytes();
        let headers = stripe_headers(&body);

        let verification = gateway
            .verify_webhook(&body, &headers)
            .expect("verification runs");
        assert!(verification.valid, "reason: {:?}", verification.reason);

        let event = gateway.normalize_event(&body).expect("normalizes");
        assert_eq!(event.gateway, GatewayName::Stripe);
        assert_eq!(event.event_id, "evt_1NirvanaTest");
        assert_eq!(event.event_type, "checkout.session.completed");
        match event.event {
            BillingEvent::CheckoutCompleted {
                metadata,
                amount,
                currency,
                external_ref,
                customer_ref,
                ..
            } => {
                assert_eq!(metadata.user_id.to_string(), USER_ID);
                assert!(matches!(
                    metadata.purchase,
                    PurchaseKind::Credits { credits: Some(500), .. }
                ));
                assert_eq!(amount, BigDecimal::from_str("19.99").expect("19.99"));
                assert_eq!(currency, "USD");
                assert_eq!(external_ref, "pi_3OaXYZ");
                assert_eq!(customer_ref.as_deref(), Some("cus_9qwerty"));
            }
            other => panic!("expected CheckoutCompleted, got {:?}", other),
        }
    }

    #[test]
    fn mercado_pago_signed_payment_flows_to_canonical_event() {
        let gateway = mercado_pago();
        let body = json!({
            "id": 918273,
            "action": "payment.created",
            "data": {
                "id": 5544332211i64,
                "status": "approved",
                "transaction_amount": "49.90",
                "currency_id": "BRL",
                "payer": {"id": 12345},
                "metadata": {
                    "user_id": USER_ID,
                    "type": "credits",
                    "package_id": "pack_large",
                    "credits": 2000
                }
            }
        })
        .to_string()
        .into_bytes();

        let ts = chrono::Utc::now().timestamp();
        let request_id = "req-abc-123";
        let manifest = format!("id:{};request-id:{};ts:{};", "5544332211", request_id, ts);
        let signature = hmac_sha256_hex(manifest.as_bytes(), WEBHOOK_SECRET);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-signature",
            format!("ts={},v1={}", ts, signature).parse().expect("header"),
        );
        headers.insert("x-request-id", request_id.parse().expect("header"));

        let verification = gateway
            .verify_webhook(&body, &headers)
            .expect("verification runs");
        assert!(verification.valid, "reason: {:?}", verification.reason);

        let event = gateway.normalize_event(&body).expect("normalizes");
        assert_eq!(event.gateway, GatewayName::MercadoPago);
        assert_eq!(event.event_id, "918273");
        match event.event {
            BillingEvent::CheckoutCompleted {
                metadata,
                amount,
                currency,
                external_ref,
                ..
            } => {
                assert!(matches!(
                    metadata.purchase,
                    PurchaseKind::Credits { credits: Some(2000), .. }
                ));
                assert_eq!(amount, BigDecimal::from_str("49.90").expect("49.90"));
                assert_eq!(currency, "BRL");
                assert_eq!(external_ref, "5544332211");
            }
            other => panic!("expected CheckoutCompleted, got {:?}", other),
        }
    }

    #[test]
    fn lemon_squeezy_signed_order_flows_to_canonical_event() {
        let gateway = lemon_squeezy();
        let body = json!({
            "meta": {
                "event_name": "order_created",
                "custom_data": {
                    "user_id": USER_ID,
                    "type": "subscription",
                    "plan_id": "pro"
                }
            },
            "data": {
                "id": "1234567",
                "attributes": {
                    "total": 2900,
                    "currency": "USD",
                    "customer_id": 31337,
                    "first_subscription_item": { "subscription_id": 271828 }
                }
            }
        })
        .to_string()
        .into_bytes();

        let signature = hmac_sha256_hex(&body, WEBHOOK_SECRET);
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", signature.parse().expect("header"));

        let verification = gateway
            .verify_webhook(&body, &headers)
            .expect("verification runs");
        assert!(verification.valid, "reason: {:?}", verification.reason);

        let event = gateway.normalize_event(&body).expect("normalizes");
        assert_eq!(event.event_id, "order_created:1234567");
        match event.event {
            BillingEvent::CheckoutCompleted {
                metadata,
                external_ref,
                subscription_ref,
                ..
            } => {
                assert!(matches!(
                    metadata.purchase,
                    PurchaseKind::Subscription { ref plan_id } if plan_id == "pro"
                ));
                assert_eq!(external_ref, "1234567");
                assert_eq!(subscription_ref.as_deref(), Some("271828"));
            }
            other => panic!("expected CheckoutCompleted, got {:?}", other),
        }
    }

    #[test]
    fn every_gateway_rejects_unsigned_requests() {
        let gateways: Vec<Box<dyn PaymentGateway>> = vec![
            Box::new(stripe()),
            Box::new(mercado_pago()),
            Box::new(lemon_squeezy()),
        ];

        for gateway in &gateways {
            let result = gateway
                .verify_webhook(b"{}", &HeaderMap::new())
                .expect("verification runs");
            assert!(!result.valid, "{} accepted unsigned request", gateway.name());
            assert!(result.reason.is_some());
        }
    }

    #[test]
    fn blank_stored_webhook_secret_fails_closed() {
        // A stored blank overrides whatever the environment holds, so a
        // half-configured gateway can never reach the verification path.
        let err = StripeConfig::from_sources(Some(
            &json!({ "secret_key": "sk_test", "webhook_secret": "" }),
        ))
        .expect_err("stripe must fail");
        assert!(matches!(err, GatewayError::NotConfigured { .. }));

        let err = MercadoPagoConfig::from_sources(Some(
            &json!({ "access_token": "TEST-token", "webhook_secret": "" }),
        ))
        .expect_err("mercado pago must fail");
        assert!(matches!(err, GatewayError::NotConfigured { .. }));

        let err = LemonSqueezyConfig::from_sources(Some(
            &json!({ "api_key": "lsq_test", "webhook_secret": "" }),
        ))
        .expect_err("lemon squeezy must fail");
        assert!(matches!(err, GatewayError::NotConfigured { .. }));
    }

    #[test]
    fn stripe_dispute_normalizes_to_chargeback() {
        let gateway = stripe();
        let body = json!({
            "id": "evt_dispute",
            "type": "charge.dispute.created",
            "data": {
                "object": {
                    "id": "dp_1",
                    "payment_intent": "pi_3OaXYZ",
                    "reason": "fraudulent",
                    "amount": 1999,
                    "currency": "usd"
                }
            }
        })
        .to_string()
        .into_bytes();

        let event = gateway.normalize_event(&body).expect("normalizes");
        match event.event {
            BillingEvent::DisputeCreated {
                charge_ref,
                reason,
                amount,
                currency,
            } => {
                assert_eq!(charge_ref, "pi_3OaXYZ");
                assert_eq!(reason, "fraudulent");
                assert_eq!(amount, BigDecimal::from_str("19.99").expect("19.99"));
                assert_eq!(currency, "USD");
            }
            other => panic!("expected DisputeCreated, got {:?}", other),
        }
    }

    #[test]
    fn stripe_charge_refund_carries_gateway_refund_id() {
        let gateway = stripe();
        let body = json!({
            "id": "evt_refund",
            "type": "charge.refunded",
            "data": {
                "object": {
                    "id": "ch_1A2b3C",
                    "payment_intent": "pi_3OaXYZ",
                    "amount_refunded": 1999,
                    "currency": "usd",
                    "refunds": { "data": [ { "id": "re_9z8y7x" } ] }
                }
            }
        })
        .to_string()
        .into_bytes();

        let event = gateway.normalize_event(&body).expect("normalizes");
        match event.event {
            BillingEvent::RefundProcessed {
                charge_ref,
                refund_ref,
                ..
            } => {
                // The payment intent, not the charge id, keys the lookup
                // back to the original transaction.
                assert_eq!(charge_ref, "pi_3OaXYZ");
                assert_eq!(refund_ref.as_deref(), Some("re_9z8y7x"));
            }
            other => panic!("expected RefundProcessed, got {:?}", other),
        }
    }

    #[test]
    fn stripe_subscription_lifecycle_maps_to_canonical_variants() {
        let gateway = stripe();

        let failed = json!({
            "id": "evt_f",
            "type": "invoice.payment_failed",
            "data": { "object": { "id": "in_x", "subscription": "sub_123" } }
        })
        .to_string()
        .into_bytes();
        let event = gateway.normalize_event(&failed).expect("normalizes");
        assert!(matches!(
            event.event,
            BillingEvent::InvoicePaymentFailed { ref subscription_ref }
                if subscription_ref == "sub_123"
        ));

        let deleted = json!({
            "id": "evt_d",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_123" } }
        })
        .to_string()
        .into_bytes();
        let event = gateway.normalize_event(&deleted).expect("normalizes");
        assert!(matches!(
            event.event,
            BillingEvent::SubscriptionCancelled { ref subscription_ref }
                if subscription_ref == "sub_123"
        ));

        let updated = json!({
            "id": "evt_u",
            "type": "customer.subscription.updated",
            "data": {
                "object": {
                    "id": "sub_123",
                    "cancel_at_period_end": true,
                    "current_period_end": 1767225600
                }
            }
        })
        .to_string()
        .into_bytes();
        let event = gateway.normalize_event(&updated).expect("normalizes");
        match event.event {
            BillingEvent::SubscriptionUpdated {
                subscription_ref,
                cancel_at_period_end,
                period_end,
            } => {
                assert_eq!(subscription_ref, "sub_123");
                assert!(cancel_at_period_end);
                assert!(period_end.is_some());
            }
            other => panic!("expected SubscriptionUpdated, got {:?}", other),
        }
    }

    #[test]
    fn mercado_pago_refunded_payment_prefers_refunded_amount() {
        let gateway = mercado_pago();
        let body = json!({
            "id": 5,
            "action": "payment.updated",
            "data": {
                "id": 5544332211i64,
                "status": "refunded",
                "transaction_amount": 49.9,
                "transaction_amount_refunded": 20.0,
                "currency_id": "BRL"
            }
        })
        .to_string()
        .into_bytes();

        let event = gateway.normalize_event(&body).expect("normalizes");
        match event.event {
            BillingEvent::RefundProcessed {
                charge_ref,
                amount,
                currency,
                refund_ref,
            } => {
                assert_eq!(charge_ref, "5544332211");
                assert_eq!(amount, BigDecimal::from_str("20.0").expect("20.0"));
                assert_eq!(currency, "BRL");
                assert!(refund_ref.is_none());
            }
            other => panic!("expected RefundProcessed, got {:?}", other),
        }
    }

    #[test]
    fn lemon_squeezy_subscription_renewal_normalizes() {
        let gateway = lemon_squeezy();
        let body = json!({
            "meta": { "event_name": "subscription_payment_success" },
            "data": {
                "id": "9988",
                "attributes": {
                    "subscription_id": 271828,
                    "total": 2900,
                    "currency": "USD"
                }
            }
        })
        .to_string()
        .into_bytes();

        let event = gateway.normalize_event(&body).expect("normalizes");
        assert_eq!(event.event_id, "subscription_payment_success:9988");
        match event.event {
            BillingEvent::InvoicePaid {
                subscription_ref,
                external_ref,
                amount,
                period_start,
                period_end,
                ..
            } => {
                assert_eq!(subscription_ref, "271828");
                assert_eq!(external_ref, "9988");
                assert_eq!(amount, BigDecimal::from_str("29.00").expect("29.00"));
                assert!(period_start.is_none());
                assert!(period_end.is_none());
            }
            other => panic!("expected InvoicePaid, got {:?}", other),
        }
    }

    #[test]
    fn lemon_squeezy_refund_falls_back_to_order_total() {
        let gateway = lemon_squeezy();
        let body = json!({
            "meta": { "event_name": "order_refunded" },
            "data": {
                "id": "1234567",
                "attributes": {
                    "total": 2900,
                    "refunded_amount": 0,
                    "currency": "USD"
                }
            }
        })
        .to_string()
        .into_bytes();

        let event = gateway.normalize_event(&body).expect("normalizes");
        match event.event {
            BillingEvent::RefundProcessed {
                charge_ref, amount, ..
            } => {
                assert_eq!(charge_ref, "1234567");
                assert_eq!(amount, BigDecimal::from_str("29.00").expect("29.00"));
            }
            other => panic!("expected RefundProcessed, got {:?}", other),
        }
    }
}
