//! Booking domain errors
//!
//! Every orchestrator and key-manager operation fails with a `BookingError`.
//! The variants map one-to-one onto the HTTP status codes the API layer
//! answers with, and `is_retryable` tells a client whether replaying the
//! same request with the same idempotency key can succeed.

use thiserror::Error;

use core_kernel::PortError;

use crate::validation::ValidationErrors;

/// Errors that can occur in the booking domain
#[derive(Debug, Error)]
pub enum BookingError {
    /// Input rejected before any network call
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The idempotency key was already committed
    #[error("Idempotency key already committed: {0}")]
    DuplicateKey(String),

    /// A collaborator timed out, was unreachable or answered nonsense
    #[error("{service} unavailable: {source}")]
    ExternalUnavailable {
        service: &'static str,
        #[source]
        source: PortError,
    },

    /// The inventory service refused the seats
    #[error("Seats unavailable: {reason}")]
    SeatsUnavailable { reason: String },

    /// A step was invoked before the step it depends on
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A write-once field would be overwritten with a different value
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Another request holds the key's step lease
    #[error("Request in progress: {0}")]
    InProgress(String),

    /// The idempotency record does not exist
    #[error("Idempotency record not found: {0}")]
    NotFound(String),

    /// The idempotency store failed
    #[error("Persistence error: {0}")]
    Persistence(#[source] PortError),
}

impl BookingError {
    /// Wraps a failure of the inventory service or payment gateway
    pub fn external(service: &'static str, source: PortError) -> Self {
        BookingError::ExternalUnavailable { service, source }
    }

    /// Maps a failure reported by the idempotency store
    pub fn from_store(error: PortError) -> Self {
        match error {
            PortError::NotFound { id, .. } => BookingError::NotFound(id),
            PortError::Conflict { message } => BookingError::Conflict(message),
            other => BookingError::Persistence(other),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        BookingError::PreconditionFailed(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BookingError::Conflict(message.into())
    }

    /// Returns true when the same request may succeed if retried
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::ExternalUnavailable { source, .. } => source.is_transient(),
            BookingError::InProgress(_) => true,
            _ => false,
        }
    }

    /// Returns true when a collaborator call ran past its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, BookingError::ExternalUnavailable { source, .. } if source.is_timeout())
    }
}

impl From<ValidationErrors> for BookingError {
    fn from(errors: ValidationErrors) -> Self {
        BookingError::Validation(errors)
    }
}
