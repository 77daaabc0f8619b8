//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the booking flow and the settlement ledger,
//! using SQLx.
//!
//! # Architecture
//!
//! Repositories hold the SQL and row types; adapters implement the domain
//! ports (`IdempotencyStore`, `LedgerStore`) on top of them and translate
//! `DatabaseError` into `PortError`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresIdempotencyStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/booking")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresIdempotencyStore::new(pool.clone());
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{PostgresIdempotencyStore, PostgresLedgerStore};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool, MIGRATOR};
