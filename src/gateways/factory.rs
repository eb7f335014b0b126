use crate::database::gateway_config_repository::{GatewayConfig, GatewayConfigRepository};
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::providers::lemon_squeezy::{LemonSqueezyConfig, LemonSqueezyGateway};
use crate::gateways::providers::mercado_pago::{MercadoPagoConfig, MercadoPagoGateway};
use crate::gateways::providers::stripe::{StripeConfig, StripeGateway};
use crate::gateways::types::GatewayName;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Resolves gateway names to live [`PaymentGateway`] instances.
///
/// Credentials come from the environment with per-gateway overrides from
/// the `gateway_configs` table, so an operator can rotate a webhook secret
/// or disable a gateway without restarting the service. Built instances
/// are cached until [`GatewayFactory::reset`] is called.
pub struct GatewayFactory {
    config_repo: Option<Arc<GatewayConfigRepository>>,
    cache: RwLock<HashMap<GatewayName, Arc<dyn PaymentGateway>>>,
}

/// What a gateway looks like from the outside: is it usable, and what
/// does a client need to start a checkout against it. Secret credentials
/// never appear here.
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub gateway: GatewayName,
    pub configured: bool,
    pub enabled: bool,
    pub public_key: Option<String>,
    pub supported_currencies: Vec<String>,
}

impl GatewayFactory {
    pub fn new(config_repo: Arc<GatewayConfigRepository>) -> Self {
        Self {
            config_repo: Some(config_repo),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Factory that reads credentials from the environment only. Used by
    /// tests and tooling that run without a database.
    pub fn without_store() -> Self {
        Self {
            config_repo: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `Ok(None)` when the gateway is disabled or missing
    /// credentials, and an error only when the config store itself fails.
    /// Callers decide whether `None` is a 400 (webhook for an unconfigured
    /// gateway) or an empty config response.
    pub async fn get(
        &self,
        name: GatewayName,
    ) -> GatewayResult<Option<Arc<dyn PaymentGateway>>> {
        if let Some(gateway) = self.cache.read().await.get(&name) {
            return Ok(Some(gateway.clone()));
        }

        let row = self.stored_row(name).await?;
        if let Some(row) = &row {
            // NULL is_enabled means "enabled whenever credentials exist"
            if row.is_enabled == Some(false) {
                return Ok(None);
            }
        }

        let settings = row.as_ref().map(|r| &r.settings);
        let gateway = match build_gateway(name, settings) {
            Ok(gateway) => gateway,
            Err(GatewayError::NotConfigured { gateway }) => {
                warn!(
                    gateway = %gateway,
                    "gateway has no credentials; its webhooks will be rejected"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.cache.write().await.insert(name, gateway.clone());
        Ok(Some(gateway))
    }

    /// Gateways that are currently enabled and fully configured.
    pub async fn enabled_gateways(&self) -> Vec<GatewayName> {
        let mut enabled = Vec::new();
        for name in GatewayName::all() {
            if let Ok(Some(_)) = self.get(*name).await {
                enabled.push(*name);
            }
        }
        enabled
    }

    /// Drop cached instances so the next lookup re-reads credentials.
    /// Called after the admin config endpoints change a gateway row.
    pub async fn reset(&self) {
        self.cache.write().await.clear();
    }

    /// Wiring snapshot for the public config endpoint. Unlike [`get`],
    /// this distinguishes "credentials present but switched off" from
    /// "no credentials at all", and it never caches what it builds.
    ///
    /// [`get`]: GatewayFactory::get
    pub async fn status(&self, name: GatewayName) -> GatewayResult<GatewayStatus> {
        let row = self.stored_row(name).await?;
        let switched_off = row
            .as_ref()
            .map(|r| r.is_enabled == Some(false))
            .unwrap_or(false);

        let settings = row.as_ref().map(|r| &r.settings);
        match build_gateway(name, settings) {
            Ok(gateway) => Ok(GatewayStatus {
                gateway: name,
                configured: true,
                enabled: !switched_off,
                public_key: gateway.public_key().map(str::to_string),
                supported_currencies: gateway
                    .supported_currencies()
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            }),
            Err(GatewayError::NotConfigured { .. }) => Ok(GatewayStatus {
                gateway: name,
                configured: false,
                enabled: false,
                public_key: None,
                supported_currencies: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn stored_row(&self, name: GatewayName) -> GatewayResult<Option<GatewayConfig>> {
        match &self.config_repo {
            Some(repo) => repo
                .find_by_gateway(name.as_str())
                .await
                .map_err(|e| GatewayError::StoreError {
                    message: format!("failed to load gateway config: {}", e),
                }),
            None => Ok(None),
        }
    }
}

fn build_gateway(
    name: GatewayName,
    settings: Option<&JsonValue>,
) -> GatewayResult<Arc<dyn PaymentGateway>> {
    match name {
        GatewayName::Stripe => {
            let config = StripeConfig::from_sources(settings)?;
            Ok(Arc::new(StripeGateway::new(config)?))
        }
        GatewayName::MercadoPago => {
            let config = MercadoPagoConfig::from_sources(settings)?;
            Ok(Arc::new(MercadoPagoGateway::new(config)?))
        }
        GatewayName::LemonSqueezy => {
            let config = LemonSqueezyConfig::from_sources(settings)?;
            Ok(Arc::new(LemonSqueezyGateway::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stripe_from_stored_settings() {
        let settings = serde_json::json!({
            "secret_key": "sk_test_row",
            "public_key": "pk_test_row",
            "webhook_secret": "whsec_row"
        });
        let gateway = build_gateway(GatewayName::Stripe, Some(&settings)).expect("builds");
        assert_eq!(gateway.name(), GatewayName::Stripe);
        assert_eq!(gateway.public_key(), Some("pk_test_row"));
    }

    #[test]
    fn builds_each_gateway_from_stored_settings() {
        let mp = serde_json::json!({"access_token": "tok", "webhook_secret": "sec"});
        let ls = serde_json::json!({"api_key": "key", "webhook_secret": "sec"});
        assert!(build_gateway(GatewayName::MercadoPago, Some(&mp)).is_ok());
        assert!(build_gateway(GatewayName::LemonSqueezy, Some(&ls)).is_ok());
    }

    #[tokio::test]
    async fn reset_forces_instances_to_rebuild() {
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_cache");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_cache");

        let factory = GatewayFactory::without_store();
        let first = factory
            .get(GatewayName::Stripe)
            .await
            .expect("no store in play")
            .expect("credentials set above");
        let cached = factory
            .get(GatewayName::Stripe)
            .await
            .expect("no store in play")
            .expect("credentials set above");
        assert!(Arc::ptr_eq(&first, &cached), "second lookup must hit the cache");

        factory.reset().await;
        let rebuilt = factory
            .get(GatewayName::Stripe)
            .await
            .expect("no store in play")
            .expect("credentials set above");
        assert!(!Arc::ptr_eq(&cached, &rebuilt), "reset must drop the cached instance");
    }
}
