//! Domain Adapters
//!
//! Implementations of the domain storage ports over the repositories.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresIdempotencyStore;
//! use domain_booking::IdempotencyStore;
//!
//! let store: Arc<dyn IdempotencyStore> = Arc::new(PostgresIdempotencyStore::new(pool));
//! ```

pub mod idempotency;
pub mod ledger;

use std::time::Instant;

use core_kernel::HealthCheckResult;
use sqlx::PgPool;

pub use idempotency::PostgresIdempotencyStore;
pub use ledger::PostgresLedgerStore;

/// Runs `SELECT 1` and reports the outcome as `adapter_id`
pub(crate) async fn ping(pool: &PgPool, adapter_id: &str) -> HealthCheckResult {
    let start = Instant::now();
    let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(_) => HealthCheckResult::healthy(adapter_id, latency_ms),
        Err(e) => HealthCheckResult::unhealthy(adapter_id, latency_ms, format!("Database error: {}", e)),
    }
}
