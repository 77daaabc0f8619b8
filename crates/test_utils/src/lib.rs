//! Shared helpers for the booking payments test suites
//!
//! Fixtures produce valid booking inputs, `SettlementBuilder` assembles
//! gateway settlements and their postings, and `database` starts a
//! containerized PostgreSQL for the adapter tests.

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use database::{create_isolated_test_database, TestDatabase};
pub use fixtures::*;
