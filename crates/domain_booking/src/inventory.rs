//! Seat inventory port
//!
//! The inventory service owns seat reservations. Before any catalog product
//! is created the orchestrator asks it whether the requested seats of a
//! time slot can be committed, and gets back a price quote per seat.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use core_kernel::{with_deadline, DomainPort, Money, PortError};

/// Quote for one seat that can be booked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatQuote {
    pub seat_id: i32,
    pub seat_number: String,
    pub price: Money,
    pub movie_name: String,
}

/// Answer of the inventory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatValidation {
    pub is_valid: bool,
    pub to_be_booked: Vec<SeatQuote>,
    /// Why the seats were refused, when they were
    pub reason: Option<String>,
}

impl SeatValidation {
    pub fn accepted(to_be_booked: Vec<SeatQuote>) -> Self {
        Self {
            is_valid: true,
            to_be_booked,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            to_be_booked: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    /// Returns true if the quotes name exactly the requested seats, once each
    pub fn covers_exactly(&self, requested: &[i32]) -> bool {
        let quoted: Vec<i32> = self.to_be_booked.iter().map(|q| q.seat_id).collect();
        let quoted_set: BTreeSet<i32> = quoted.iter().copied().collect();
        let requested_set: BTreeSet<i32> = requested.iter().copied().collect();
        quoted.len() == quoted_set.len() && quoted_set == requested_set
    }
}

/// Port to the external seat inventory service
#[async_trait]
pub trait InventoryPort: DomainPort {
    /// Checks and provisionally reserves `seat_ids` for a time slot
    async fn validate_seats(&self, time_slot_id: i32, seat_ids: &[i32]) -> Result<SeatValidation, PortError>;
}

/// Deadline-bounded client over an `InventoryPort`
#[derive(Clone)]
pub struct InventoryValidator {
    port: Arc<dyn InventoryPort>,
    deadline: Duration,
}

impl InventoryValidator {
    pub fn new(port: Arc<dyn InventoryPort>, deadline: Duration) -> Self {
        Self { port, deadline }
    }

    /// Validates and reserves seats within the deadline
    ///
    /// A positive answer whose quotes do not match the requested seats is
    /// reported as `PortError::Transformation`. A negative answer is
    /// returned as-is.
    #[instrument(skip(self), fields(deadline_ms = self.deadline.as_millis() as u64))]
    pub async fn validate_and_reserve(&self, time_slot_id: i32, seat_ids: &[i32]) -> Result<SeatValidation, PortError> {
        let validation = with_deadline(
            "inventory.validate_seats",
            self.deadline,
            self.port.validate_seats(time_slot_id, seat_ids),
        )
        .await?;

        if validation.is_valid && !validation.covers_exactly(seat_ids) {
            return Err(PortError::transformation(format!(
                "inventory quoted {} seats for {} requested",
                validation.to_be_booked.len(),
                seat_ids.len()
            )));
        }

        debug!(is_valid = validation.is_valid, quoted = validation.to_be_booked.len(), "Inventory answered");
        Ok(validation)
    }
}
