//! Idempotency records
//!
//! A record is created the first time a client commits an idempotency key
//! and is then filled in as each orchestration step finishes. Fields are
//! write-once: re-writing the value already stored is a no-op, replacing it
//! with a different value is a conflict. `payment_status` only moves
//! forward.
//!
//! # Payment status
//!
//! ```text
//! Unset -> Initiated -> Settled
//!                   \-> Failed
//! ```
//!
//! # Step leases
//!
//! Before a step calls the inventory service or the gateway it claims the
//! record with a `StepLease`. At most one unexpired lease exists per key, so
//! two requests racing on the same key never both reach the outside world.
//! A holder that disappears without releasing keeps the key busy until its
//! lease runs out.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use core_kernel::{CustomerId, DomainPort, PaymentId, PortError, ProductId};

use crate::validation::{validate_idempotent_key, ValidationErrors};

/// Default lifetime of an idempotency record
pub const DEFAULT_KEY_TTL_HOURS: i64 = 24;

/// A validated, caller-supplied idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parses a raw key, rejecting empty, oversized or padded values
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationErrors> {
        let raw = raw.into();
        validate_idempotent_key(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Payment progress of the order behind a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unset,
    Initiated,
    Settled,
    Failed,
}

impl PaymentStatus {
    /// Returns true if moving to `next` is allowed; staying put always is
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Unset, Unset)
                | (Initiated, Initiated)
                | (Settled, Settled)
                | (Failed, Failed)
                | (Unset, Initiated)
                | (Initiated, Settled)
                | (Initiated, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unset => "UNSET",
            PaymentStatus::Initiated => "INITIATED",
            PaymentStatus::Settled => "SETTLED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestration stage derived from what a record already carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStage {
    New,
    ProductsCreated,
    CustomerBound,
    PaymentLinkIssued,
    Aborted,
}

/// Orchestration step that makes external calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStep {
    Order,
    Customer,
    PaymentLink,
}

impl OrderStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStep::Order => "order",
            OrderStep::Customer => "customer",
            OrderStep::PaymentLink => "payment_link",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "order" => Some(OrderStep::Order),
            "customer" => Some(OrderStep::Customer),
            "payment_link" => Some(OrderStep::PaymentLink),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive claim on a record while one step runs
///
/// `until` is truncated to microseconds so it survives a round trip through
/// a `TIMESTAMPTZ` column unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLease {
    pub step: OrderStep,
    pub until: DateTime<Utc>,
}

impl StepLease {
    pub fn new(step: OrderStep, ttl: Duration) -> Self {
        Self {
            step,
            until: (Utc::now() + ttl).trunc_subsecs(6),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

/// Result of claiming a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepClaim {
    /// The lease was written; carries the record as of the claim
    Claimed(Box<IdempotencyRecord>),
    /// Another unexpired lease holds the key
    Busy(StepLease),
}

/// Rejected attempt to overwrite a write-once field or move status backwards
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field} {reason}")]
pub struct RecordConflict {
    pub field: &'static str,
    pub reason: String,
}

impl RecordConflict {
    fn already_set(field: &'static str) -> Self {
        Self {
            field,
            reason: "is already set to a different value".to_string(),
        }
    }
}

/// Partial update merged into an existing record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub customer_id: Option<CustomerId>,
    pub order_ids: Option<Vec<ProductId>>,
    pub booked_seat_ids: Option<Vec<i32>>,
    pub movie_time_slot_id: Option<i32>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_id: Option<PaymentId>,
    pub payment_link: Option<String>,
    pub is_ticket_sent: Option<bool>,
    pub is_mail_sent: Option<bool>,
}

impl RecordPatch {
    pub fn customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Default::default()
        }
    }

    /// Products created for the seats of one time slot; starts the payment
    pub fn orders(order_ids: Vec<ProductId>, movie_time_slot_id: i32, booked_seat_ids: Vec<i32>) -> Self {
        Self {
            order_ids: Some(order_ids),
            booked_seat_ids: Some(booked_seat_ids),
            movie_time_slot_id: Some(movie_time_slot_id),
            payment_status: Some(PaymentStatus::Initiated),
            ..Default::default()
        }
    }

    pub fn payment_link(payment_id: PaymentId, link: impl Into<String>) -> Self {
        Self {
            payment_id: Some(payment_id),
            payment_link: Some(link.into()),
            ..Default::default()
        }
    }

    pub fn status(status: PaymentStatus) -> Self {
        Self {
            payment_status: Some(status),
            ..Default::default()
        }
    }
}

/// Durable record of one idempotent booking attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotent_key: IdempotencyKey,
    pub customer_id: Option<CustomerId>,
    pub order_ids: Vec<ProductId>,
    pub booked_seat_ids: Vec<i32>,
    pub movie_time_slot_id: Option<i32>,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<PaymentId>,
    pub payment_link: Option<String>,
    pub is_ticket_sent: bool,
    pub is_mail_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<StepLease>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates the empty record written when a key is first committed
    pub fn new(key: IdempotencyKey, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            idempotent_key: key,
            customer_id: None,
            order_ids: Vec::new(),
            booked_seat_ids: Vec::new(),
            movie_time_slot_id: None,
            payment_status: PaymentStatus::Unset,
            payment_id: None,
            payment_link: None,
            is_ticket_sent: false,
            is_mail_sent: false,
            in_flight: None,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges `patch` into the record
    ///
    /// Empty values in the patch are ignored. Returns `Ok(true)` when the
    /// record changed, `Ok(false)` when the patch was already applied. On
    /// conflict the record is left untouched.
    pub fn apply(&mut self, patch: &RecordPatch) -> Result<bool, RecordConflict> {
        let mut next = self.clone();
        let mut changed = false;

        changed |= write_once("customer_id", &mut next.customer_id, patch.customer_id.as_ref())?;
        changed |= write_once_list("order_ids", &mut next.order_ids, patch.order_ids.as_deref())?;
        changed |= write_once_list("booked_seat_ids", &mut next.booked_seat_ids, patch.booked_seat_ids.as_deref())?;
        changed |= write_once("movie_time_slot_id", &mut next.movie_time_slot_id, patch.movie_time_slot_id.as_ref())?;
        changed |= write_once("payment_id", &mut next.payment_id, patch.payment_id.as_ref())?;
        changed |= write_once(
            "payment_link",
            &mut next.payment_link,
            patch.payment_link.as_ref().filter(|link| !link.is_empty()),
        )?;
        changed |= set_flag("is_ticket_sent", &mut next.is_ticket_sent, patch.is_ticket_sent)?;
        changed |= set_flag("is_mail_sent", &mut next.is_mail_sent, patch.is_mail_sent)?;

        if let Some(status) = patch.payment_status {
            if !next.payment_status.can_transition_to(status) {
                return Err(RecordConflict {
                    field: "payment_status",
                    reason: format!("cannot move from {} to {}", next.payment_status, status),
                });
            }
            if next.payment_status != status {
                next.payment_status = status;
                changed = true;
            }
        }

        if changed {
            next.updated_at = Utc::now();
            *self = next;
        }
        Ok(changed)
    }

    /// Derives the orchestration stage from the filled-in fields
    pub fn stage(&self) -> OrderStage {
        if self.payment_status == PaymentStatus::Failed {
            OrderStage::Aborted
        } else if self.payment_link.is_some() {
            OrderStage::PaymentLinkIssued
        } else if !self.order_ids.is_empty() && self.customer_id.is_some() {
            OrderStage::CustomerBound
        } else if !self.order_ids.is_empty() {
            OrderStage::ProductsCreated
        } else {
            OrderStage::New
        }
    }

    /// The lease currently blocking other steps, if it has not run out
    pub fn live_lease(&self, now: DateTime<Utc>) -> Option<StepLease> {
        self.in_flight.filter(|lease| lease.is_live(now))
    }

    /// Takes the step lease unless a live one is present
    ///
    /// Used by stores that hold the record under a lock while deciding.
    pub fn try_claim(&mut self, lease: StepLease, now: DateTime<Utc>) -> Result<(), StepLease> {
        if let Some(held) = self.live_lease(now) {
            return Err(held);
        }
        self.in_flight = Some(lease);
        Ok(())
    }

    /// Drops `lease` if it is still the one held; returns true if it was
    pub fn release(&mut self, lease: &StepLease) -> bool {
        if self.in_flight.as_ref() == Some(lease) {
            self.in_flight = None;
            return true;
        }
        false
    }
}

fn write_once<T: Clone + PartialEq>(
    field: &'static str,
    slot: &mut Option<T>,
    value: Option<&T>,
) -> Result<bool, RecordConflict> {
    match (slot.as_ref(), value) {
        (_, None) => Ok(false),
        (Some(current), Some(new)) if current == new => Ok(false),
        (Some(_), Some(_)) => Err(RecordConflict::already_set(field)),
        (None, Some(new)) => {
            *slot = Some(new.clone());
            Ok(true)
        }
    }
}

fn write_once_list<T: Clone + PartialEq>(
    field: &'static str,
    slot: &mut Vec<T>,
    value: Option<&[T]>,
) -> Result<bool, RecordConflict> {
    match value {
        None => Ok(false),
        Some(new) if new.is_empty() => Ok(false),
        Some(new) if slot.as_slice() == new => Ok(false),
        Some(_) if !slot.is_empty() => Err(RecordConflict::already_set(field)),
        Some(new) => {
            *slot = new.to_vec();
            Ok(true)
        }
    }
}

fn set_flag(field: &'static str, slot: &mut bool, value: Option<bool>) -> Result<bool, RecordConflict> {
    match value {
        None => Ok(false),
        Some(new) if new == *slot => Ok(false),
        Some(false) => Err(RecordConflict {
            field,
            reason: "cannot be cleared once set".to_string(),
        }),
        Some(true) => {
            *slot = true;
            Ok(true)
        }
    }
}

/// Result of looking a key up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Unused,
    InUse(Box<IdempotencyRecord>),
}

/// Result of committing a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Box<IdempotencyRecord>),
    AlreadyCommitted(Box<IdempotencyRecord>),
}

impl CommitOutcome {
    pub fn already_committed(&self) -> bool {
        matches!(self, CommitOutcome::AlreadyCommitted(_))
    }

    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            CommitOutcome::Committed(record) | CommitOutcome::AlreadyCommitted(record) => record,
        }
    }

    pub fn into_record(self) -> IdempotencyRecord {
        match self {
            CommitOutcome::Committed(record) | CommitOutcome::AlreadyCommitted(record) => *record,
        }
    }
}

/// Durable keyed storage for idempotency records
#[async_trait]
pub trait IdempotencyStore: DomainPort {
    /// Loads the record for `key`, if one was ever committed
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, PortError>;

    /// Inserts a fresh record
    ///
    /// Returns `false` without touching the stored row when the key already
    /// exists, so a racing duplicate commit is not an error.
    async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, PortError>;

    /// Merges `patch` into the stored record under a row lock
    ///
    /// Fails with `PortError::NotFound` for an unknown key and with
    /// `PortError::Conflict` when the patch would overwrite a write-once
    /// field.
    async fn update(&self, key: &IdempotencyKey, patch: &RecordPatch) -> Result<IdempotencyRecord, PortError>;

    /// Atomically writes `lease` unless another live lease holds the key
    ///
    /// Expired leases are taken over. Fails with `PortError::NotFound` for
    /// an unknown key.
    async fn claim_step(&self, key: &IdempotencyKey, lease: &StepLease) -> Result<StepClaim, PortError>;

    /// Clears `lease` if the record still holds exactly that lease
    async fn release_step(&self, key: &IdempotencyKey, lease: &StepLease) -> Result<(), PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> IdempotencyRecord {
        IdempotencyRecord::new(IdempotencyKey::parse("K-abc").unwrap(), Duration::hours(DEFAULT_KEY_TTL_HOURS))
    }

    fn products(ids: &[&str]) -> Vec<ProductId> {
        ids.iter().map(|id| ProductId::new(*id)).collect()
    }

    #[test]
    fn test_new_record_is_empty() {
        let r = record();
        assert_eq!(r.payment_status, PaymentStatus::Unset);
        assert_eq!(r.stage(), OrderStage::New);
        assert!(r.expires_at > r.created_at);
        assert!(r.in_flight.is_none());
    }

    #[test]
    fn test_orders_patch_initiates_payment() {
        let mut r = record();
        let changed = r.apply(&RecordPatch::orders(products(&["p1", "p2"]), 42, vec![101, 102])).unwrap();
        assert!(changed);
        assert_eq!(r.payment_status, PaymentStatus::Initiated);
        assert_eq!(r.booked_seat_ids, vec![101, 102]);
        assert_eq!(r.movie_time_slot_id, Some(42));
        assert_eq!(r.stage(), OrderStage::ProductsCreated);
    }

    #[test]
    fn test_identical_rewrite_is_noop() {
        let mut r = record();
        r.apply(&RecordPatch::customer(CustomerId::new("cus_1"))).unwrap();
        let before = r.updated_at;
        assert!(!r.apply(&RecordPatch::customer(CustomerId::new("cus_1"))).unwrap());
        assert_eq!(r.updated_at, before);
    }

    #[test]
    fn test_different_rewrite_conflicts_and_leaves_record_untouched() {
        let mut r = record();
        r.apply(&RecordPatch::orders(products(&["p1"]), 42, vec![101])).unwrap();
        let snapshot = r.clone();

        let mut patch = RecordPatch::customer(CustomerId::new("cus_9"));
        patch.order_ids = Some(products(&["p7"]));
        let err = r.apply(&patch).unwrap_err();

        assert_eq!(err.field, "order_ids");
        assert_eq!(r, snapshot);
    }

    #[test]
    fn test_empty_values_never_clear_fields() {
        let mut r = record();
        r.apply(&RecordPatch::orders(products(&["p1"]), 42, vec![101])).unwrap();

        let patch = RecordPatch {
            order_ids: Some(Vec::new()),
            booked_seat_ids: Some(Vec::new()),
            payment_link: Some(String::new()),
            ..Default::default()
        };
        assert!(!r.apply(&patch).unwrap());
        assert_eq!(r.order_ids, products(&["p1"]));
    }

    #[test]
    fn test_status_only_moves_forward() {
        assert!(PaymentStatus::Unset.can_transition_to(PaymentStatus::Initiated));
        assert!(PaymentStatus::Initiated.can_transition_to(PaymentStatus::Settled));
        assert!(PaymentStatus::Initiated.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Unset.can_transition_to(PaymentStatus::Settled));
        assert!(!PaymentStatus::Settled.can_transition_to(PaymentStatus::Initiated));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Settled));

        let mut r = record();
        let err = r.apply(&RecordPatch::status(PaymentStatus::Settled)).unwrap_err();
        assert_eq!(err.field, "payment_status");
    }

    #[test]
    fn test_flags_cannot_be_cleared() {
        let mut r = record();
        r.apply(&RecordPatch { is_mail_sent: Some(true), ..Default::default() }).unwrap();
        assert!(r.is_mail_sent);
        assert!(r.apply(&RecordPatch { is_mail_sent: Some(false), ..Default::default() }).is_err());
    }

    #[test]
    fn test_stage_progression() {
        let mut r = record();
        r.apply(&RecordPatch::orders(products(&["p1"]), 42, vec![101])).unwrap();
        r.apply(&RecordPatch::customer(CustomerId::new("cus_1"))).unwrap();
        assert_eq!(r.stage(), OrderStage::CustomerBound);

        r.apply(&RecordPatch::payment_link(PaymentId::new("pay_1"), "https://pay.example/1")).unwrap();
        assert_eq!(r.stage(), OrderStage::PaymentLinkIssued);

        r.apply(&RecordPatch::status(PaymentStatus::Failed)).unwrap();
        assert_eq!(r.stage(), OrderStage::Aborted);
    }

    #[test]
    fn test_live_lease_blocks_other_claims() {
        let mut r = record();
        let now = Utc::now();
        let order = StepLease::new(OrderStep::Order, Duration::seconds(30));
        r.try_claim(order, now).unwrap();

        let customer = StepLease::new(OrderStep::Customer, Duration::seconds(30));
        assert_eq!(r.try_claim(customer, now), Err(order));
        assert_eq!(r.in_flight, Some(order));
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let mut r = record();
        let stale = StepLease::new(OrderStep::Order, Duration::seconds(-1));
        r.in_flight = Some(stale);
        assert!(r.live_lease(Utc::now()).is_none());

        let fresh = StepLease::new(OrderStep::Order, Duration::seconds(30));
        r.try_claim(fresh, Utc::now()).unwrap();
        assert_eq!(r.in_flight, Some(fresh));
        assert!(!r.release(&stale));
        assert!(r.release(&fresh));
        assert!(r.in_flight.is_none());
    }

    #[test]
    fn test_lease_survives_microsecond_storage() {
        let lease = StepLease::new(OrderStep::PaymentLink, Duration::seconds(5));
        assert_eq!(lease.until.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(OrderStep::parse(lease.step.as_str()), Some(OrderStep::PaymentLink));
    }

    #[test]
    fn test_key_serializes_transparently() {
        let key = IdempotencyKey::parse("K-abc").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"K-abc\"");
        assert_eq!(serde_json::to_string(&PaymentStatus::Initiated).unwrap(), "\"INITIATED\"");
    }
}
