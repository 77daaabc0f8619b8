//! Booking Payments - API Server Binary
//!
//! This binary starts the HTTP API for the seat-booking payment flow and
//! the gateway settlement webhook.
//!
//! # Usage
//!
//! ```bash
//! APP_ENVIRONMENT=test \
//! APP_GATEWAY_API_KEY=sk_test_... \
//! APP_DATABASE_URL=postgres://localhost/booking \
//! APP_WEBHOOK_SECRET=whsec_... \
//! APP_INVENTORY_URL=http://inventory:8081 \
//! cargo run --bin booking-payments-api
//! ```
//!
//! # Environment Variables
//!
//! Required:
//! * `APP_ENVIRONMENT` - Gateway mode: `test` or `live`
//! * `APP_GATEWAY_API_KEY` - Gateway bearer token
//! * `APP_DATABASE_URL` - PostgreSQL connection string
//! * `APP_WEBHOOK_SECRET` - Webhook signing secret (`whsec_...`)
//! * `APP_INVENTORY_URL` - Base URL of the seat inventory service
//!
//! Optional:
//! * `APP_HOST` / `APP_PORT` - Bind address (default: 0.0.0.0:8080)
//! * `APP_LOG_LEVEL` - Log filter when `RUST_LOG` is unset (default: info)
//! * `APP_LOG_FORMAT` - `text` or `json` (default: text)
//! * `APP_GATEWAY_BASE_URL` - Overrides the gateway URL of the environment
//! * `APP_DEADLINE_MS` - Bound on each external call (default: 10000)
//! * `APP_KEY_TTL_HOURS` - Idempotency record lifetime (default: 24)
//! * `APP_RETURN_URL`, `APP_BILLING_CURRENCY`, `APP_BILLING_*` - Payment defaults

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use core_kernel::HealthCheckable;
use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresIdempotencyStore, PostgresLedgerStore};
use infra_gateway::{GatewayClient, InventoryClient};
use interface_api::config::{AppConfig, LogFormat, Settings};
use interface_api::{create_router, AppState, Ports, ServiceOptions};

/// Main entry point for the API server.
///
/// Loads and validates configuration, initializes logging, connects to the
/// database, applies migrations and serves until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is missing or invalid (all problems are listed)
/// - Database connection or migrations fail
/// - Server fails to bind to the configured address
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let settings = AppConfig::from_env()?.validate()?;

    init_tracing(&settings);

    tracing::info!(
        addr = %settings.server_addr(),
        environment = %settings.gateway.environment,
        "Starting booking payments API server"
    );

    let pool = create_pool(
        DatabaseConfig::new(settings.database_url.clone()).max_connections(settings.database_max_connections),
    )
    .await?;
    run_migrations(&pool).await?;

    let state = build_state(&settings, pool)?;
    let app = create_router(state);

    let addr: SocketAddr = settings.server_addr().parse()?;
    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wires the adapters into the application state
fn build_state(settings: &Settings, pool: infra_db::DatabasePool) -> Result<AppState, Box<dyn std::error::Error>> {
    let store = Arc::new(PostgresIdempotencyStore::new(pool.clone()));
    let ledger = Arc::new(PostgresLedgerStore::new(pool));
    let gateway = Arc::new(GatewayClient::new(settings.gateway.clone())?);
    let inventory = Arc::new(InventoryClient::with_timeout(
        settings.inventory_url.clone(),
        settings.currency(),
        settings.deadline,
    )?);

    let probes: Vec<Arc<dyn HealthCheckable>> = vec![
        store.clone() as Arc<dyn HealthCheckable>,
        gateway.clone() as Arc<dyn HealthCheckable>,
        inventory.clone() as Arc<dyn HealthCheckable>,
    ];
    let ports = Ports {
        store,
        ledger,
        inventory,
        gateway: gateway.clone(),
        settlements: gateway,
        probes,
    };

    Ok(AppState::new(ports, ServiceOptions::from(settings))?)
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer().with_target(true)).init(),
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
