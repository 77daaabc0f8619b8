//! Gateway Infrastructure
//!
//! REST adapters for the two external collaborators of the booking core:
//!
//! - `GatewayClient`: the payment gateway (`CheckoutGateway` for the booking
//!   flow, `SettlementSource` for settlement reconciliation)
//! - `InventoryClient`: the seat inventory service (`InventoryPort`)
//!
//! Wire bodies live in `wire` and are mapped to domain types explicitly;
//! HTTP failures are mapped to `PortError` in one place.

pub mod client;
pub mod config;
mod error;
pub mod inventory;
pub mod wire;

pub use client::GatewayClient;
pub use config::{GatewayConfig, GatewayConfigError, GatewayEnvironment, LIVE_BASE_URL, TEST_BASE_URL};
pub use inventory::InventoryClient;
