//! Idempotency key handlers

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::instrument;

use core_kernel::{CustomerId, ProductId};
use domain_booking::{IdempotencyKey, KeyStatus, PaymentLink};

use crate::dto::keys::*;
use crate::dto::ApiResponse;
use crate::{error::ApiError, AppState};

fn parse_key(raw: String) -> Result<IdempotencyKey, ApiError> {
    Ok(IdempotencyKey::parse(raw)?)
}

/// Commits a key; committing an existing key reports `already_committed`
#[instrument(skip(state, request), fields(key = %request.idempotent_key))]
pub async fn commit_key(
    State(state): State<AppState>,
    Json(request): Json<CommitKeyRequest>,
) -> Result<ApiResponse<CommitKeyResponse>, ApiError> {
    let key = parse_key(request.idempotent_key)?;
    let outcome = state.keys.commit_key(&key).await?;
    let already_committed = outcome.already_committed();

    let response = CommitKeyResponse {
        idempotent_key: key.to_string(),
        already_committed,
        record: outcome.into_record(),
    };
    Ok(if already_committed {
        ApiResponse::ok(response)
    } else {
        ApiResponse::created(response)
    })
}

/// Reports whether a key is still unused
pub async fn key_status(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<ApiResponse<KeyStatusResponse>, ApiError> {
    let key = parse_key(raw)?;
    let response = match state.keys.check_key(&key).await? {
        KeyStatus::Unused => KeyStatusResponse {
            idempotent_key: key.to_string(),
            is_valid: true,
            record: None,
        },
        KeyStatus::InUse(record) => KeyStatusResponse {
            idempotent_key: key.to_string(),
            is_valid: false,
            record: Some(*record),
        },
    };
    Ok(ApiResponse::ok(response))
}

#[instrument(skip(state, request))]
pub async fn commit_customer(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(request): Json<CommitCustomerRequest>,
) -> Result<ApiResponse<RecordResponse>, ApiError> {
    let key = parse_key(raw)?;
    let record = state
        .keys
        .commit_customer_id(&key, CustomerId::new(request.customer_id))
        .await?;
    Ok(ApiResponse::ok(RecordResponse { record }))
}

#[instrument(skip(state, request))]
pub async fn commit_orders(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(request): Json<CommitOrdersRequest>,
) -> Result<ApiResponse<RecordResponse>, ApiError> {
    let key = parse_key(raw)?;
    let order_ids = request.order_ids.into_iter().map(ProductId::new).collect();
    let record = state
        .keys
        .commit_order_ids(&key, order_ids, request.movie_time_slot_id, request.booked_seat_ids)
        .await?;
    Ok(ApiResponse::ok(RecordResponse { record }))
}

/// Issues (or replays) the payment link of a key; the body is optional
#[instrument(skip(state, request))]
pub async fn generate_payment_link(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    request: Option<Json<GeneratePaymentLinkRequest>>,
) -> Result<ApiResponse<PaymentLink>, ApiError> {
    let key = parse_key(raw)?;
    let billing = request.and_then(|Json(body)| body.billing_address);
    let link = state.orchestrator.generate_payment_link(&key, billing).await?;
    Ok(ApiResponse::ok(link))
}
