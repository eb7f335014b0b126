//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub billing: BillingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Billing behaviour: plan/package catalogs and retry policy
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub default_currency: String,
    pub plans: Vec<PlanConfig>,
    pub credit_packages: Vec<CreditPackageConfig>,
    pub retry_interval_secs: u64,
    pub retry_max_attempts: i32,
    pub retry_backoff_base_secs: i64,
    pub gateway_timeout_secs: u64,
    pub gateway_max_retries: u32,
}

/// A recurring subscription plan and its monthly credit allowance
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlanConfig {
    pub id: String,
    pub name: String,
    pub monthly_credits: i64,
}

/// A one-off credit package
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreditPackageConfig {
    pub id: String,
    pub credits: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            billing: BillingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.billing.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let plans = match env::var("BILLING_PLANS") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|_| ConfigError::InvalidValue("BILLING_PLANS".to_string()))?,
            Err(_) => Self::default_plans(),
        };

        let credit_packages = match env::var("BILLING_CREDIT_PACKAGES") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|_| ConfigError::InvalidValue("BILLING_CREDIT_PACKAGES".to_string()))?,
            Err(_) => Self::default_credit_packages(),
        };

        Ok(BillingConfig {
            default_currency: env::var("BILLING_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            plans,
            credit_packages,
            retry_interval_secs: env::var("WEBHOOK_RETRY_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_RETRY_INTERVAL_SECS".to_string()))?,
            retry_max_attempts: env::var("WEBHOOK_RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_RETRY_MAX_ATTEMPTS".to_string()))?,
            retry_backoff_base_secs: env::var("WEBHOOK_RETRY_BACKOFF_BASE_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("WEBHOOK_RETRY_BACKOFF_BASE_SECS".to_string())
                })?,
            gateway_timeout_secs: env::var("GATEWAY_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_HTTP_TIMEOUT_SECS".to_string()))?,
            gateway_max_retries: env::var("GATEWAY_HTTP_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_HTTP_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue(
                "BILLING_CURRENCY must be a 3-letter ISO code".to_string(),
            ));
        }

        if self.plans.is_empty() {
            return Err(ConfigError::InvalidValue(
                "BILLING_PLANS cannot be empty".to_string(),
            ));
        }

        if self.retry_max_attempts <= 0 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_RETRY_MAX_ATTEMPTS must be positive".to_string(),
            ));
        }

        if self.gateway_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_HTTP_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Find a subscription plan by id
    pub fn plan(&self, plan_id: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Find a credit package by id
    pub fn credit_package(&self, package_id: &str) -> Option<&CreditPackageConfig> {
        self.credit_packages.iter().find(|p| p.id == package_id)
    }

    fn default_plans() -> Vec<PlanConfig> {
        vec![
            PlanConfig {
                id: "starter".to_string(),
                name: "Starter".to_string(),
                monthly_credits: 500,
            },
            PlanConfig {
                id: "pro".to_string(),
                name: "Pro".to_string(),
                monthly_credits: 2_000,
            },
            PlanConfig {
                id: "scale".to_string(),
                name: "Scale".to_string(),
                monthly_credits: 6_000,
            },
        ]
    }

    fn default_credit_packages() -> Vec<CreditPackageConfig> {
        vec![
            CreditPackageConfig {
                id: "pack_small".to_string(),
                credits: 500,
            },
            CreditPackageConfig {
                id: "pack_medium".to_string(),
                credits: 1_500,
            },
            CreditPackageConfig {
                id: "pack_large".to_string(),
                credits: 5_000,
            },
        ]
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn billing_defaults() -> BillingConfig {
        BillingConfig {
            default_currency: "USD".to_string(),
            plans: BillingConfig::default_plans(),
            credit_packages: BillingConfig::default_credit_packages(),
            retry_interval_secs: 60,
            retry_max_attempts: 5,
            retry_backoff_base_secs: 60,
            gateway_timeout_secs: 15,
            gateway_max_retries: 3,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_billing_defaults_validate() {
        let config = billing_defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.plan("pro").map(|p| p.monthly_credits), Some(2_000));
        assert_eq!(
            config.credit_package("pack_small").map(|p| p.credits),
            Some(500)
        );
        assert!(config.plan("enterprise").is_none());
    }

    #[test]
    fn test_currency_must_be_three_letters() {
        let mut config = billing_defaults();
        config.default_currency = "USDT".to_string();
        assert!(config.validate().is_err());
    }
}
