use axum::{
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use Vocira_billing::api;
use Vocira_billing::api::billing::BillingState;
use Vocira_billing::api::refunds::RefundsState;
use Vocira_billing::api::webhooks::WebhookState;
use Vocira_billing::config::AppConfig;
use Vocira_billing::database::audit_repository::AuditRepository;
use Vocira_billing::database::credit_ledger_repository::CreditLedgerRepository;
use Vocira_billing::database::gateway_config_repository::GatewayConfigRepository;
use Vocira_billing::database::refund_repository::RefundRepository;
use Vocira_billing::database::settings_repository::SettingsRepository;
use Vocira_billing::database::subscription_repository::SubscriptionRepository;
use Vocira_billing::database::transaction_repository::TransactionRepository;
use Vocira_billing::database::user_repository::UserRepository;
use Vocira_billing::database::webhook_repository::WebhookRepository;
use Vocira_billing::database::{init_pool_from_config, run_migrations};
use Vocira_billing::gateways::factory::GatewayFactory;
use Vocira_billing::health::{HealthChecker, HealthState, HealthStatus};
use Vocira_billing::logging::init_tracing;
use Vocira_billing::middleware::logging::{request_logging_middleware, UuidRequestId};
use Vocira_billing::services::{
    CreditLedgerService, CurrencyService, PaymentAuditService, RefundService, SideEffects,
    SubscriptionService, WebhookProcessor,
};
use Vocira_billing::workers::webhook_retry::WebhookRetryWorker;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize advanced tracing
    init_tracing();

    dotenv().ok();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Vocira billing service"
    );

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        e
    })?;
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        currency = %config.billing.default_currency,
        plans = config.billing.plans.len(),
        credit_packages = config.billing.credit_packages.len(),
        "Server configuration loaded"
    );

    // Initialize database connection pool
    info!("📊 Initializing database connection pool...");
    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!("✅ Database connection pool initialized");

    run_migrations(&pool).await?;

    // Gateway factory: credentials come from the environment with
    // per-gateway overrides from the gateway_configs table.
    let gateway_config_repo = Arc::new(GatewayConfigRepository::new(pool.clone()));
    let factory = Arc::new(GatewayFactory::new(gateway_config_repo));
    let enabled = factory.enabled_gateways().await;
    info!(gateways = ?enabled, "✅ Payment gateways configured");

    // Webhook processor and its collaborators
    let refunds = RefundService::new(
        TransactionRepository::new(pool.clone()),
        RefundRepository::new(pool.clone()),
        UserRepository::new(pool.clone()),
        CreditLedgerRepository::new(pool.clone()),
        PaymentAuditService::new(AuditRepository::new(pool.clone())),
        SideEffects::logging(),
        factory.clone(),
    );
    let subscriptions = SubscriptionService::new(
        SubscriptionRepository::new(pool.clone()),
        UserRepository::new(pool.clone()),
        CreditLedgerRepository::new(pool.clone()),
        config.billing.plans.clone(),
    );
    let processor = Arc::new(WebhookProcessor::new(
        factory.clone(),
        UserRepository::new(pool.clone()),
        TransactionRepository::new(pool.clone()),
        WebhookRepository::new(pool.clone()),
        CreditLedgerService::new(CreditLedgerRepository::new(pool.clone())),
        subscriptions,
        refunds,
        PaymentAuditService::new(AuditRepository::new(pool.clone())),
        SideEffects::logging(),
        config.billing.clone(),
    ));

    // Health checker watches the database and the webhook retry queue
    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(
        pool.clone(),
        Arc::new(WebhookRepository::new(pool.clone())),
    );
    info!("✅ Health checker initialized");

    // Webhook retry worker
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let retry_enabled = std::env::var("WEBHOOK_RETRY_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let mut retry_handle = None;
    if retry_enabled {
        let worker =
            WebhookRetryWorker::new(processor.clone(), config.billing.retry_interval_secs);
        retry_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
        info!("✅ Webhook retry worker started");
    } else {
        info!("Webhook retry worker disabled (WEBHOOK_RETRY_ENABLED=false)");
    }

    // Route groups, each with its own state
    info!("🛣️  Setting up application routes...");

    let webhook_routes = Router::new()
        .route("/api/webhooks/{gateway}", post(api::webhooks::handle_webhook))
        .with_state(Arc::new(WebhookState {
            processor: processor.clone(),
        }));

    let currency_service = Arc::new(CurrencyService::new(
        SettingsRepository::new(pool.clone()),
        PaymentAuditService::new(AuditRepository::new(pool.clone())),
    ));
    let user_repo = Arc::new(UserRepository::new(pool.clone()));

    let billing_routes = Router::new()
        .route(
            "/api/billing/{gateway}/config",
            get(api::billing::get_gateway_config),
        )
        .route(
            "/api/billing/currency",
            get(api::billing::get_currency).put(api::billing::update_currency),
        )
        .route(
            "/api/billing/currency/lock",
            post(api::billing::lock_currency),
        )
        .with_state(Arc::new(BillingState {
            factory: factory.clone(),
            currency: currency_service,
            user_repo: user_repo.clone(),
        }));

    let refund_routes = Router::new()
        .route("/api/billing/refunds", post(api::refunds::create_refund))
        .with_state(Arc::new(RefundsState {
            refunds: Arc::new(RefundService::new(
                TransactionRepository::new(pool.clone()),
                RefundRepository::new(pool.clone()),
                UserRepository::new(pool.clone()),
                CreditLedgerRepository::new(pool.clone()),
                PaymentAuditService::new(AuditRepository::new(pool.clone())),
                SideEffects::logging(),
                factory.clone(),
            )),
            user_repo,
        }));

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(webhook_routes)
        .merge(billing_routes)
        .merge(refund_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                                                              ║");
    println!("║          🚀 VOCIRA BILLING SERVER IS RUNNING 🚀              ║");
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!(
        "║  🌐 Server Address:  http://{}                    ║",
        addr
    );
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║                                                              ║");
    println!("║  GET  /                            - Root endpoint           ║");
    println!("║  GET  /health                      - Health check            ║");
    println!("║  GET  /health/ready                - Readiness probe         ║");
    println!("║  GET  /health/live                 - Liveness probe          ║");
    println!("║  POST /api/webhooks/{{gateway}}      - Gateway webhooks       ║");
    println!("║  GET  /api/billing/{{gateway}}/config - Gateway config        ║");
    println!("║  GET  /api/billing/currency        - Platform currency      ║");
    println!("║  POST /api/billing/refunds         - Admin refunds          ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = retry_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for retry worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    "Welcome to Vocira Billing API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(axum::extract::State(state)).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> Result<&'static str, (axum::http::StatusCode, String)> {
    Ok("OK")
}
