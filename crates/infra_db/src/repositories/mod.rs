//! Repository implementations
//!
//! Repositories own the SQL. They use runtime-checked queries and map rows
//! into `FromRow` structs; conversion to domain types happens here or in
//! the adapters.

pub mod idempotency;
pub mod ledger;

pub use idempotency::{ClaimedRow, IdempotencyRepository};
pub use ledger::LedgerRepository;
