//! Billing domain errors

use thiserror::Error;

use core_kernel::{Money, MoneyError, PortError};
use domain_booking::BookingError;

/// Errors that can occur while reconciling a settlement
#[derive(Debug, Error)]
pub enum BillingError {
    /// The gateway could not be read
    #[error("Settlement source unavailable: {0}")]
    SourceUnavailable(#[source] PortError),

    /// Line items do not add up to the amount the gateway settled
    #[error("Reconciliation mismatch: lines sum to {lines}, settlement total is {total}")]
    ReconciliationMismatch { lines: Money, total: Money },

    /// Line items are not in the settlement currency
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    /// A cart line references a product the gateway did not return
    #[error("Product not found in settlement: {0}")]
    MissingProduct(String),

    /// The settlement cannot be turned into ledger entries
    #[error("Invalid posting: {0}")]
    InvalidPosting(String),

    /// Calculation error
    #[error("Calculation error: {0}")]
    CalculationError(String),

    /// The wallet/ledger store failed; nothing was written
    #[error("Ledger persistence error: {0}")]
    Persistence(#[source] PortError),

    /// The booking record behind the payment could not be updated
    #[error("Booking status update failed: {0}")]
    BookingStatus(#[source] BookingError),
}

impl BillingError {
    /// Returns true when redelivering the same event may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::SourceUnavailable(source) => source.is_transient(),
            BillingError::Persistence(_) => true,
            BillingError::BookingStatus(err) => matches!(err, BookingError::Persistence(_)),
            _ => false,
        }
    }
}

impl From<MoneyError> for BillingError {
    fn from(error: MoneyError) -> Self {
        match error {
            MoneyError::CurrencyMismatch(a, b) => BillingError::CurrencyMismatch(format!("{} vs {}", a, b)),
            other => BillingError::CalculationError(other.to_string()),
        }
    }
}

/// Reasons a webhook delivery is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid webhook timestamp")]
    InvalidTimestamp,

    #[error("Webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("No matching webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook secret: {0}")]
    InvalidSecret(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}
