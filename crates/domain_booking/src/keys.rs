//! Idempotency key manager
//!
//! Thin service over an `IdempotencyStore` that owns the key lifecycle:
//! lookup, idempotent commit, and the field updates each orchestration step
//! performs.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};

use core_kernel::{CustomerId, ProductId};

use crate::error::BookingError;
use crate::idempotency::{
    CommitOutcome, IdempotencyKey, IdempotencyRecord, IdempotencyStore, KeyStatus, OrderStep, PaymentStatus,
    RecordPatch, StepClaim, StepLease,
};
use crate::validation::{check_seat_selection, ValidationErrors};

/// Service managing the idempotency key lifecycle
#[derive(Clone)]
pub struct IdempotencyKeyManager {
    store: Arc<dyn IdempotencyStore>,
    key_ttl: Duration,
}

impl IdempotencyKeyManager {
    /// Creates a manager whose new records expire after `key_ttl`
    pub fn new(store: Arc<dyn IdempotencyStore>, key_ttl: Duration) -> Self {
        Self { store, key_ttl }
    }

    /// Looks a key up; absence means it was never committed
    #[instrument(skip(self), fields(key = %key))]
    pub async fn check_key(&self, key: &IdempotencyKey) -> Result<KeyStatus, BookingError> {
        match self.store.find(key).await.map_err(BookingError::from_store)? {
            Some(record) => Ok(KeyStatus::InUse(Box::new(record))),
            None => Ok(KeyStatus::Unused),
        }
    }

    /// Returns true if the key is still unused
    pub async fn is_valid_key(&self, key: &IdempotencyKey) -> Result<bool, BookingError> {
        Ok(matches!(self.check_key(key).await?, KeyStatus::Unused))
    }

    /// Commits a key, creating its empty record
    ///
    /// A key that is already committed, including one inserted by a racing
    /// request, is reported as `AlreadyCommitted` rather than an error.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn commit_key(&self, key: &IdempotencyKey) -> Result<CommitOutcome, BookingError> {
        let record = IdempotencyRecord::new(key.clone(), self.key_ttl);
        let inserted = self.store.insert(&record).await.map_err(BookingError::from_store)?;

        if inserted {
            info!("Idempotency key committed");
            return Ok(CommitOutcome::Committed(Box::new(record)));
        }

        let existing = self
            .store
            .find(key)
            .await
            .map_err(BookingError::from_store)?
            .ok_or_else(|| BookingError::NotFound(key.to_string()))?;
        info!(stage = ?existing.stage(), "Idempotency key already committed");
        Ok(CommitOutcome::AlreadyCommitted(Box::new(existing)))
    }

    /// Loads the record of a committed key
    ///
    /// Fails with `PreconditionFailed` when the key was never committed.
    pub async fn require_record(&self, key: &IdempotencyKey) -> Result<IdempotencyRecord, BookingError> {
        match self.store.find(key).await.map_err(BookingError::from_store)? {
            Some(record) => Ok(record),
            None => {
                warn!(key = %key, "Operation attempted with uncommitted idempotency key");
                Err(BookingError::precondition(format!("idempotency key {} has not been committed", key)))
            }
        }
    }

    /// Claims `step` for this caller for at most `ttl`
    ///
    /// Fails with `InProgress` while another request holds a live lease on
    /// the key. The returned record is read under the claim, so a step that
    /// finished while this caller was waiting is visible in it.
    #[instrument(skip(self), fields(key = %key, step = %step))]
    pub async fn claim_step(
        &self,
        key: &IdempotencyKey,
        step: OrderStep,
        ttl: Duration,
    ) -> Result<(StepLease, IdempotencyRecord), BookingError> {
        let lease = StepLease::new(step, ttl);
        match self.store.claim_step(key, &lease).await.map_err(BookingError::from_store)? {
            StepClaim::Claimed(record) => Ok((lease, *record)),
            StepClaim::Busy(held) => {
                info!(running = %held.step, until = %held.until, "Step lease held by another request");
                Err(BookingError::InProgress(format!(
                    "idempotency key {} is busy with the {} step",
                    key, held.step
                )))
            }
        }
    }

    /// Gives the lease back; a failure only delays the next claim until the
    /// lease expires
    pub async fn release_step(&self, key: &IdempotencyKey, lease: &StepLease) {
        if let Err(e) = self.store.release_step(key, lease).await {
            warn!(key = %key, step = %lease.step, error = %e, "Failed to release step lease");
        }
    }

    /// Merges a partial update into the key's record
    #[instrument(skip(self, patch), fields(key = %key))]
    pub async fn update_field(&self, key: &IdempotencyKey, patch: &RecordPatch) -> Result<IdempotencyRecord, BookingError> {
        let record = self.store.update(key, patch).await.map_err(BookingError::from_store)?;
        info!(stage = ?record.stage(), status = %record.payment_status, "Idempotency record updated");
        Ok(record)
    }

    /// Binds the gateway customer to the key
    pub async fn commit_customer_id(
        &self,
        key: &IdempotencyKey,
        customer_id: CustomerId,
    ) -> Result<IdempotencyRecord, BookingError> {
        if customer_id.as_str().trim().is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add("customer_id", "must not be empty");
            return Err(errors.into());
        }
        self.update_field(key, &RecordPatch::customer(customer_id)).await
    }

    /// Records the catalog products created for the booked seats and
    /// moves the payment to `INITIATED`
    pub async fn commit_order_ids(
        &self,
        key: &IdempotencyKey,
        order_ids: Vec<ProductId>,
        movie_time_slot_id: i32,
        booked_seat_ids: Vec<i32>,
    ) -> Result<IdempotencyRecord, BookingError> {
        let mut errors = ValidationErrors::new();
        if order_ids.is_empty() {
            errors.add("order_ids", "at least one order id is required");
        }
        if order_ids.iter().any(|id| id.as_str().trim().is_empty()) {
            errors.add("order_ids", "order ids must not be empty");
        }
        check_seat_selection(movie_time_slot_id, &booked_seat_ids, &mut errors);
        errors.into_result()?;

        self.update_field(key, &RecordPatch::orders(order_ids, movie_time_slot_id, booked_seat_ids))
            .await
    }

    /// Marks the payment behind the key as settled
    pub async fn mark_settled(&self, key: &IdempotencyKey) -> Result<IdempotencyRecord, BookingError> {
        self.update_field(key, &RecordPatch::status(PaymentStatus::Settled)).await
    }

    /// Marks the payment behind the key as failed
    pub async fn mark_failed(&self, key: &IdempotencyKey) -> Result<IdempotencyRecord, BookingError> {
        self.update_field(key, &RecordPatch::status(PaymentStatus::Failed)).await
    }
}
