//! Billing Domain - Wallet Ledger and Settlement Reconciliation
//!
//! This crate turns payments the gateway has confirmed into wallet credits.
//! Every credit is explained by immutable ledger entries, one per product
//! line of the settlement, and a settlement is only posted when its lines
//! add up to the amount the gateway captured.
//!
//! # Flow
//!
//! 1. The gateway pushes a signed webhook; `WebhookVerifier` authenticates it
//! 2. `SettlementReconciler` reads the payment, customer and products back
//! 3. `SettlementPosting::build` checks the line sum against the total
//! 4. `LedgerStore::post_settlement` credits the wallet and appends entries
//!    in one transaction
//! 5. The booking record named in the payment metadata moves to `SETTLED`
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{SettlementReconciler, WebhookEvent};
//!
//! let event = WebhookEvent::parse(&body)?;
//! let outcome = reconciler.handle_event(&event).await?;
//! ```

pub mod error;
pub mod ledger;
pub mod posting;
pub mod reconciler;
pub mod settlement;
pub mod wallet;
pub mod webhook;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{BillingError, WebhookError};
pub use ledger::{EntryType, LedgerEntry, LedgerStore, PostingReceipt};
pub use posting::{PostingLine, SettlementPosting};
pub use reconciler::{EventOutcome, ReconciliationOutcome, ReconciliationStatus, SettlementReconciler};
pub use settlement::{CartLine, CustomerDetail, ProductDetail, SettlementDetail, SettlementSource, IDEMPOTENT_KEY_METADATA};
pub use wallet::Wallet;
pub use webhook::{
    WebhookEvent, WebhookHeaders, WebhookVerifier, DEFAULT_TOLERANCE_SECS, WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER,
    WEBHOOK_TIMESTAMP_HEADER,
};
