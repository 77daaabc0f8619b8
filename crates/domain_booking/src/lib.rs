//! Booking Domain
//!
//! This crate implements the idempotent seat-booking flow: a client commits
//! an idempotency key, the seats are validated with the external inventory
//! service, one gateway catalog product is created per seat, the buyer is
//! registered as a gateway customer, and a hosted payment link is issued.
//!
//! # Architecture
//!
//! The domain layer is infrastructure-agnostic. Collaborators are reached
//! through ports:
//! - **IdempotencyStore**: durable record per key (infra_db)
//! - **InventoryPort**: seat validation and pricing (infra_gateway)
//! - **CheckoutGateway**: customers, products and payments (infra_gateway)
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_booking::{PaymentOrchestrator, PaymentLinkRequest};
//!
//! let summary = orchestrator.create_payment_link(&request).await?;
//! println!("pay at {}", summary.payment_link);
//! ```

pub mod checkout;
pub mod error;
pub mod idempotency;
pub mod inventory;
pub mod keys;
pub mod orchestrator;
pub mod validation;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use checkout::{
    BillingAddress, CartItem, CheckoutGateway, CustomerDetails, IssuedPayment, NewCatalogProduct, PaymentMetadata,
    PaymentRequest,
};
pub use error::BookingError;
pub use idempotency::{
    CommitOutcome, IdempotencyKey, IdempotencyRecord, IdempotencyStore, KeyStatus, OrderStage, OrderStep,
    PaymentStatus, RecordConflict, RecordPatch, StepClaim, StepLease, DEFAULT_KEY_TTL_HOURS,
};
pub use inventory::{InventoryPort, InventoryValidator, SeatQuote, SeatValidation};
pub use keys::IdempotencyKeyManager;
pub use orchestrator::{
    CheckoutSummary, CustomerConfirmation, CustomerRequest, OrchestratorConfig, OrderConfirmation, OrderRequest,
    PaymentLink, PaymentLinkRequest, PaymentOrchestrator,
};
pub use validation::{FieldViolation, ValidationErrors};
