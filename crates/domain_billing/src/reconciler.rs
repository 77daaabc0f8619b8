//! Settlement reconciler
//!
//! Turns a gateway-confirmed payment into wallet credits. The reconciler
//! reads the payment, its customer and every product in the cart back from
//! the gateway, checks that the cart prices add up to the settled amount
//! and hands the resulting posting to the ledger store, which writes the
//! wallet credit and all entries in one transaction.
//!
//! The reconciler is the only component that changes wallet balances.
//! Redelivery of the same settlement is answered with `AlreadyPosted`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use core_kernel::{with_deadline, Money, PaymentId, WalletId, DEFAULT_DEADLINE};
use domain_booking::{BookingError, IdempotencyKey, IdempotencyKeyManager, PaymentStatus};

use crate::error::BillingError;
use crate::ledger::{LedgerEntry, LedgerStore, PostingReceipt};
use crate::posting::SettlementPosting;
use crate::settlement::{SettlementDetail, SettlementSource};
use crate::webhook::WebhookEvent;

/// Gateway status of a captured payment
const SUCCEEDED: &str = "succeeded";

/// Whether a reconciliation wrote anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Posted,
    AlreadyPosted,
}

/// Result of reconciling one payment
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationOutcome {
    pub payment_id: PaymentId,
    #[serde(rename = "posting_status")]
    pub status: ReconciliationStatus,
    pub wallet_id: Option<WalletId>,
    /// Amount credited by this call; zero on redelivery
    pub credited: Money,
    pub entries: Vec<LedgerEntry>,
    /// Booking key moved to `SETTLED`, if one was found and updated
    pub settled_key: Option<String>,
}

/// Result of handling one webhook event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Reconciled(ReconciliationOutcome),
    MarkedFailed {
        payment_id: PaymentId,
        failed_key: Option<String>,
    },
    Ignored {
        event_type: String,
    },
}

/// Posts confirmed settlements to the wallet ledger
#[derive(Clone)]
pub struct SettlementReconciler {
    source: Arc<dyn SettlementSource>,
    ledger: Arc<dyn LedgerStore>,
    keys: IdempotencyKeyManager,
    deadline: Duration,
}

impl SettlementReconciler {
    pub fn new(source: Arc<dyn SettlementSource>, ledger: Arc<dyn LedgerStore>, keys: IdempotencyKeyManager) -> Self {
        Self {
            source,
            ledger,
            keys,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Bound on each gateway read
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Dispatches a verified webhook event
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<EventOutcome, BillingError> {
        match event {
            WebhookEvent::PaymentSucceeded { payment_id } => Ok(EventOutcome::Reconciled(self.reconcile(payment_id).await?)),
            WebhookEvent::PaymentFailed { payment_id } => self.handle_failed(payment_id).await,
            WebhookEvent::Ignored { event_type } => {
                info!(%event_type, "Ignoring webhook event");
                Ok(EventOutcome::Ignored {
                    event_type: event_type.clone(),
                })
            }
        }
    }

    /// Reconciles one settled payment into the ledger
    ///
    /// # Errors
    ///
    /// - `SourceUnavailable` if the gateway cannot be read
    /// - `ReconciliationMismatch`, `CurrencyMismatch`, `MissingProduct` or
    ///   `InvalidPosting` if the settlement cannot be posted as reported
    /// - `Persistence` if the ledger transaction failed; nothing was written
    /// - `BookingStatus` if the booking record could not be reached
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn reconcile(&self, payment_id: &PaymentId) -> Result<ReconciliationOutcome, BillingError> {
        let settlement = self.fetch_settlement(payment_id).await?;

        if let Some(status) = settlement.status.as_deref() {
            if !status.eq_ignore_ascii_case(SUCCEEDED) {
                warn!(%status, "Payment reported as settled is not succeeded");
                return Err(BillingError::InvalidPosting(format!(
                    "payment {} has status {}",
                    payment_id, status
                )));
            }
        }

        let customer = with_deadline("fetch_customer", self.deadline, self.source.fetch_customer(&settlement.customer_id))
            .await
            .map_err(BillingError::SourceUnavailable)?;

        let mut products = Vec::with_capacity(settlement.product_cart.len());
        for line in &settlement.product_cart {
            let product = with_deadline("fetch_product", self.deadline, self.source.fetch_product(&line.product_id))
                .await
                .map_err(BillingError::SourceUnavailable)?;
            products.push(product);
        }

        let posting = SettlementPosting::build(&settlement, &customer, &products).inspect_err(|e| {
            warn!(error = %e, "Settlement rejected");
        })?;

        let receipt = self.ledger.post_settlement(&posting).await.map_err(|e| {
            error!(error = %e, "Ledger posting failed");
            BillingError::Persistence(e)
        })?;

        let mut outcome = match receipt {
            PostingReceipt::Posted { wallet, entries } => {
                info!(
                    wallet_id = %wallet.id,
                    credited = %posting.total,
                    entry_count = entries.len(),
                    "Settlement posted"
                );
                ReconciliationOutcome {
                    payment_id: payment_id.clone(),
                    status: ReconciliationStatus::Posted,
                    wallet_id: Some(wallet.id),
                    credited: posting.total,
                    entries,
                    settled_key: None,
                }
            }
            PostingReceipt::AlreadyPosted { transaction_id } => {
                info!(%transaction_id, "Settlement already posted");
                let entries = self
                    .ledger
                    .entries_for_transaction(&transaction_id)
                    .await
                    .map_err(BillingError::Persistence)?;
                ReconciliationOutcome {
                    payment_id: payment_id.clone(),
                    status: ReconciliationStatus::AlreadyPosted,
                    wallet_id: entries.first().map(|e| e.wallet_id),
                    credited: Money::zero(posting.currency()),
                    entries,
                    settled_key: None,
                }
            }
        };

        outcome.settled_key = self.advance_booking(&settlement, PaymentStatus::Settled).await?;
        Ok(outcome)
    }

    /// Marks the booking behind a failed payment as `FAILED`
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn handle_failed(&self, payment_id: &PaymentId) -> Result<EventOutcome, BillingError> {
        let settlement = self.fetch_settlement(payment_id).await?;
        let failed_key = self.advance_booking(&settlement, PaymentStatus::Failed).await?;
        info!(failed_key = ?failed_key, "Payment failure recorded");
        Ok(EventOutcome::MarkedFailed {
            payment_id: payment_id.clone(),
            failed_key,
        })
    }

    async fn fetch_settlement(&self, payment_id: &PaymentId) -> Result<SettlementDetail, BillingError> {
        with_deadline("fetch_payment", self.deadline, self.source.fetch_payment(payment_id))
            .await
            .map_err(|e| {
                warn!(error = %e, "Could not read payment from gateway");
                BillingError::SourceUnavailable(e)
            })
    }

    /// Moves the booking named in the payment metadata to `status`
    ///
    /// A payment without a usable key, an unknown key or a record that
    /// cannot take the transition is logged and skipped; the ledger is the
    /// source of truth for money. Only store failures are returned.
    async fn advance_booking(
        &self,
        settlement: &SettlementDetail,
        status: PaymentStatus,
    ) -> Result<Option<String>, BillingError> {
        let Some(raw_key) = settlement.idempotent_key() else {
            warn!("Payment carries no idempotency key");
            return Ok(None);
        };
        let key = match IdempotencyKey::parse(raw_key) {
            Ok(key) => key,
            Err(errors) => {
                warn!(%errors, "Payment carries an invalid idempotency key");
                return Ok(None);
            }
        };

        let result = match status {
            PaymentStatus::Failed => self.keys.mark_failed(&key).await,
            _ => self.keys.mark_settled(&key).await,
        };

        match result {
            Ok(record) => {
                info!(key = %key, status = %record.payment_status, "Booking status updated");
                Ok(Some(key.to_string()))
            }
            Err(
                e @ (BookingError::NotFound(_)
                | BookingError::Conflict(_)
                | BookingError::PreconditionFailed(_)
                | BookingError::Validation(_)),
            ) => {
                warn!(key = %key, error = %e, "Booking status not updated");
                Ok(None)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Booking status update failed");
                Err(BillingError::BookingStatus(e))
            }
        }
    }
}
