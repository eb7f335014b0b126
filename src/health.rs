//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::webhook_repository::WebhookRepository;

/// Pending webhook deliveries above this mark the queue component as a
/// warning: the worker is falling behind or a gateway is misbehaving.
const QUEUE_DEPTH_WARNING: i64 = 100;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::PgPool,
    webhook_repo: Arc<WebhookRepository>,
}

impl HealthChecker {
    pub fn new(db_pool: sqlx::PgPool, webhook_repo: Arc<WebhookRepository>) -> Self {
        Self {
            db_pool,
            webhook_repo,
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut database_up = true;
        let mut degraded = false;

        // Check database health
        match timeout(Duration::from_secs(5), check_database_health(&self.db_pool)).await {
            Ok(db_result) => match db_result {
                Ok(response_time) => {
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::up(Some(response_time)),
                    );
                    info!("Database health check: OK ({}ms)", response_time);
                }
                Err(e) => {
                    database_up = false;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some(e.to_string())),
                    );
                    error!("Database health check failed: {}", e);
                }
            },
            Err(_) => {
                database_up = false;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Database health check timed out");
            }
        }

        // Check webhook retry queue depth. The queue lives in the same
        // database, so when that is down this reports a warning rather
        // than double-counting the outage.
        if database_up {
            match timeout(Duration::from_secs(5), self.check_queue_depth()).await {
                Ok(Ok((response_time, depth))) => {
                    if depth > QUEUE_DEPTH_WARNING {
                        degraded = true;
                        health_status.checks.insert(
                            "webhook_queue".to_string(),
                            ComponentHealth::warning(
                                Some(response_time),
                                Some(format!("{} deliveries awaiting retry", depth)),
                            ),
                        );
                        warn!(depth, "Webhook retry queue is backing up");
                    } else {
                        health_status.checks.insert(
                            "webhook_queue".to_string(),
                            ComponentHealth::up(Some(response_time)),
                        );
                    }
                }
                Ok(Err(e)) => {
                    degraded = true;
                    health_status.checks.insert(
                        "webhook_queue".to_string(),
                        ComponentHealth::warning(None, Some(e.to_string())),
                    );
                    error!("Webhook queue health check failed: {}", e);
                }
                Err(_) => {
                    degraded = true;
                    health_status.checks.insert(
                        "webhook_queue".to_string(),
                        ComponentHealth::warning(None, Some("Timeout".to_string())),
                    );
                    error!("Webhook queue health check timed out");
                }
            }
        }

        health_status.status = if !database_up {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }

    async fn check_queue_depth(
        &self,
    ) -> Result<(u128, i64), crate::database::error::DatabaseError> {
        let start = Instant::now();
        let depth = self.webhook_repo.pending_count().await?;
        Ok((start.elapsed().as_millis(), depth))
    }
}

pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
        assert_eq!(warning_health.details, Some("Slow response".to_string()));
    }
}
