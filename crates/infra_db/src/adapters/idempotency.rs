//! PostgreSQL idempotency store
//!
//! Implements `IdempotencyStore` over `IdempotencyRepository`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, instrument};

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_booking::{IdempotencyKey, IdempotencyRecord, IdempotencyStore, RecordPatch, StepClaim, StepLease};

use crate::error::DatabaseError;
use crate::repositories::{ClaimedRow, IdempotencyRepository};

use super::ping;

/// PostgreSQL-backed `IdempotencyStore`
#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    repository: IdempotencyRepository,
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: IdempotencyRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn repository(&self) -> &IdempotencyRepository {
        &self.repository
    }
}

impl DomainPort for PostgresIdempotencyStore {}

#[async_trait]
impl HealthCheckable for PostgresIdempotencyStore {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-idempotency-store").await
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, PortError> {
        let row = self.repository.find(key.as_str()).await.map_err(to_port_error)?;
        row.map(|r| r.into_record()).transpose().map_err(to_port_error)
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, PortError> {
        self.repository.insert(record).await.map_err(to_port_error)
    }

    #[instrument(skip(self, patch), fields(key = %key))]
    async fn update(&self, key: &IdempotencyKey, patch: &RecordPatch) -> Result<IdempotencyRecord, PortError> {
        self.repository
            .update(key.as_str(), patch)
            .await
            .map_err(to_port_error)
    }

    #[instrument(skip(self, lease), fields(key = %key, step = %lease.step))]
    async fn claim_step(&self, key: &IdempotencyKey, lease: &StepLease) -> Result<StepClaim, PortError> {
        let claimed = self
            .repository
            .claim_step(key.as_str(), lease, Utc::now())
            .await
            .map_err(to_port_error)?;

        match claimed {
            ClaimedRow::Claimed(row) => {
                let record = row.into_record().map_err(to_port_error)?;
                Ok(StepClaim::Claimed(Box::new(record)))
            }
            // A lease released between the two statements still counts as
            // busy; the caller retries
            ClaimedRow::Held(row) => {
                let held = row.lease().map_err(to_port_error)?.unwrap_or(*lease);
                Ok(StepClaim::Busy(held))
            }
        }
    }

    async fn release_step(&self, key: &IdempotencyKey, lease: &StepLease) -> Result<(), PortError> {
        self.repository
            .release_step(key.as_str(), lease)
            .await
            .map(|_| ())
            .map_err(to_port_error)
    }
}

fn to_port_error(e: DatabaseError) -> PortError {
    if !e.is_not_found() && !matches!(e, DatabaseError::Conflict(_)) {
        error!(error = %e, "Idempotency store failure");
    }
    e.into()
}
