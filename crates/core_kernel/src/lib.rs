//! Core Kernel - Foundational types for the booking payment service
//!
//! This crate provides the building blocks shared by the booking and billing
//! domains and their adapters:
//! - Money types with precise decimal arithmetic
//! - Identifiers for ledger rows and gateway-owned entities
//! - The port error taxonomy and health-check contract
//! - Deadlines for external calls

pub mod money;
pub mod identifiers;
pub mod ports;
pub mod deadline;

pub use money::{Money, Currency, MoneyError};
pub use identifiers::{WalletId, LedgerEntryId, CustomerId, ProductId, PaymentId};
pub use ports::{DomainPort, HealthCheckResult, HealthCheckable, PortError};
pub use deadline::{with_deadline, DEFAULT_DEADLINE};
