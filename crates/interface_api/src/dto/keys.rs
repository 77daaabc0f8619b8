//! Idempotency key DTOs

use serde::{Deserialize, Serialize};

use domain_booking::{BillingAddress, IdempotencyRecord};

#[derive(Debug, Clone, Deserialize)]
pub struct CommitKeyRequest {
    pub idempotent_key: String,
}

#[derive(Debug, Serialize)]
pub struct CommitKeyResponse {
    pub idempotent_key: String,
    /// True when the key had been committed before this call
    pub already_committed: bool,
    pub record: IdempotencyRecord,
}

#[derive(Debug, Serialize)]
pub struct KeyStatusResponse {
    pub idempotent_key: String,
    /// True while the key has never been committed
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<IdempotencyRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitCustomerRequest {
    pub customer_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitOrdersRequest {
    pub order_ids: Vec<String>,
    pub movie_time_slot_id: i32,
    pub booked_seat_ids: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub record: IdempotencyRecord,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratePaymentLinkRequest {
    #[serde(default)]
    pub billing_address: Option<BillingAddress>,
}
