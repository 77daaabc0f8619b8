//! HTTP API Layer
//!
//! This crate exposes the booking payment flow and the gateway settlement
//! webhook over HTTP using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: idempotency keys, booking flow, webhooks, health
//! - **Middleware**: request ids, request logging, tracing
//! - **DTOs**: request bodies and the `{..., status}` response envelope
//! - **Error Handling**: one mapping from domain errors to HTTP statuses
//!
//! The router is built from an `AppState` holding the orchestrator, the
//! reconciler and the webhook verifier; ports are injected as `Arc<dyn _>`
//! so tests can run the router against in-memory adapters.
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState, Ports, ServiceOptions};
//!
//! let state = AppState::new(ports, ServiceOptions::from(&settings))?;
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use core_kernel::HealthCheckable;
use domain_billing::{LedgerStore, SettlementReconciler, SettlementSource, WebhookError, WebhookVerifier};
use domain_booking::{
    CheckoutGateway, IdempotencyKeyManager, IdempotencyStore, InventoryPort, OrchestratorConfig, PaymentOrchestrator,
};

use crate::config::Settings;
use crate::handlers::{booking, health, keys, webhooks};
use crate::middleware::request_logging;

/// Adapters the API runs on
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn IdempotencyStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub inventory: Arc<dyn InventoryPort>,
    pub gateway: Arc<dyn CheckoutGateway>,
    pub settlements: Arc<dyn SettlementSource>,
    /// Collaborators checked by the readiness probe
    pub probes: Vec<Arc<dyn HealthCheckable>>,
}

/// Service settings the state is built from
#[derive(Clone)]
pub struct ServiceOptions {
    pub orchestrator: OrchestratorConfig,
    pub key_ttl: chrono::Duration,
    pub webhook_secret: String,
}

impl From<&Settings> for ServiceOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            orchestrator: settings.orchestrator.clone(),
            key_ttl: settings.key_ttl,
            webhook_secret: settings.webhook_secret.clone(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub keys: IdempotencyKeyManager,
    pub orchestrator: PaymentOrchestrator,
    pub reconciler: SettlementReconciler,
    pub verifier: Arc<WebhookVerifier>,
    pub probes: Arc<Vec<Arc<dyn HealthCheckable>>>,
}

impl AppState {
    pub fn new(ports: Ports, options: ServiceOptions) -> Result<Self, WebhookError> {
        let verifier = WebhookVerifier::new(&options.webhook_secret)?;
        let keys = IdempotencyKeyManager::new(ports.store, options.key_ttl);
        let deadline = options.orchestrator.deadline;

        let orchestrator = PaymentOrchestrator::new(keys.clone(), ports.inventory, ports.gateway, options.orchestrator);
        let reconciler = SettlementReconciler::new(ports.settlements, ports.ledger, keys.clone()).with_deadline(deadline);

        Ok(Self {
            keys,
            orchestrator,
            reconciler,
            verifier: Arc::new(verifier),
            probes: Arc::new(ports.probes),
        })
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let key_routes = Router::new()
        .route("/", post(keys::commit_key))
        .route("/:key", get(keys::key_status))
        .route("/:key/customer", put(keys::commit_customer))
        .route("/:key/orders", put(keys::commit_orders))
        .route("/:key/payment-link", post(keys::generate_payment_link));

    let api_routes = Router::new()
        .nest("/idempotency-keys", key_routes)
        .route("/orders", post(booking::create_order))
        .route("/customers", post(booking::create_customer))
        .route("/payment-links", post(booking::create_payment_link));

    let webhook_routes = Router::new().route("/payments", post(webhooks::payment_webhook));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .nest("/webhooks", webhook_routes)
        .layer(axum_middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
