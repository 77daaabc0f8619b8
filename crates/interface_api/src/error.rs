//! API error handling
//!
//! Domain errors are turned into JSON responses here and nowhere else. The
//! body always carries `status` (the HTTP code), a machine-readable `error`,
//! a `message`, and the field violations for validation failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use core_kernel::PortError;
use domain_billing::{BillingError, WebhookError};
use domain_booking::{BookingError, FieldViolation, ValidationErrors};

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Booking(BookingError::Validation(errors))
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldViolation>>,
    /// True when replaying the request with the same key may succeed
    pub retryable: bool,
}

fn external_status(source: &PortError) -> (StatusCode, &'static str) {
    if source.is_timeout() {
        (StatusCode::GATEWAY_TIMEOUT, "timeout")
    } else if source.is_transient() {
        (StatusCode::SERVICE_UNAVAILABLE, "external_unavailable")
    } else {
        (StatusCode::BAD_GATEWAY, "external_error")
    }
}

impl ApiError {
    /// HTTP status and error code for this error
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Booking(err) => match err {
                BookingError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
                BookingError::DuplicateKey(_) => (StatusCode::CONFLICT, "duplicate_key"),
                BookingError::ExternalUnavailable { source, .. } => external_status(source),
                BookingError::SeatsUnavailable { .. } => (StatusCode::BAD_REQUEST, "seats_unavailable"),
                BookingError::PreconditionFailed(_) => (StatusCode::PRECONDITION_FAILED, "precondition_failed"),
                BookingError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                BookingError::InProgress(_) => (StatusCode::CONFLICT, "in_progress"),
                BookingError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                BookingError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
            },
            ApiError::Billing(err) => match err {
                BillingError::SourceUnavailable(source) => external_status(source),
                BillingError::ReconciliationMismatch { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "reconciliation_mismatch")
                }
                BillingError::CurrencyMismatch(_)
                | BillingError::MissingProduct(_)
                | BillingError::InvalidPosting(_)
                | BillingError::CalculationError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_settlement"),
                BillingError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
                BillingError::BookingStatus(_) => (StatusCode::INTERNAL_SERVER_ERROR, "booking_status_error"),
            },
            ApiError::Webhook(WebhookError::MalformedPayload(_)) => (StatusCode::BAD_REQUEST, "malformed_payload"),
            ApiError::Webhook(_) => (StatusCode::UNAUTHORIZED, "webhook_rejected"),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::Booking(err) => err.is_retryable(),
            ApiError::Billing(err) => err.is_retryable(),
            ApiError::Webhook(_) => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        if status.is_server_error() {
            error!(error = %self, code = error_type, "Request failed");
        } else {
            warn!(error = %self, code = error_type, "Request rejected");
        }

        let details = match &self {
            ApiError::Booking(BookingError::Validation(errors)) => Some(errors.violations().to_vec()),
            _ => None,
        };

        let body = ErrorResponse {
            status: status.as_u16(),
            error: error_type,
            message: self.to_string(),
            details,
            retryable: self.retryable(),
        };

        (status, Json(body)).into_response()
    }
}
