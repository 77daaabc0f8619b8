//! Booking flow handlers

use axum::{extract::State, Json};
use tracing::instrument;

use domain_booking::{
    CheckoutSummary, CustomerConfirmation, CustomerRequest, OrderConfirmation, OrderRequest, PaymentLinkRequest,
};

use crate::dto::ApiResponse;
use crate::{error::ApiError, AppState};

#[instrument(skip(state, request), fields(key = %request.idempotent_key, slot = request.movie_time_slot_id))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<ApiResponse<OrderConfirmation>, ApiError> {
    let confirmation = state.orchestrator.create_order(&request).await?;
    Ok(ApiResponse::ok(confirmation))
}

#[instrument(skip(state, request), fields(key = %request.idempotent_key))]
pub async fn create_customer(
    State(state): State<AppState>,
    Json(request): Json<CustomerRequest>,
) -> Result<ApiResponse<CustomerConfirmation>, ApiError> {
    let confirmation = state.orchestrator.create_customer(&request).await?;
    Ok(ApiResponse::ok(confirmation))
}

/// Commits the key and runs the whole booking flow
#[instrument(skip(state, request), fields(key = %request.idempotent_key, slot = request.movie_time_slot_id))]
pub async fn create_payment_link(
    State(state): State<AppState>,
    Json(request): Json<PaymentLinkRequest>,
) -> Result<ApiResponse<CheckoutSummary>, ApiError> {
    let summary = state.orchestrator.create_payment_link(&request).await?;
    Ok(ApiResponse::ok(summary))
}
