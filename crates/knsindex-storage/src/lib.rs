//! knsindex-storage: projection stores for the KNS indexer.
//!
//! Backends:
//! - [`memory`]: in-memory (tests and dry runs, no persistence)
//! - `sqlite`: SQLite via `sqlx` (single-file persistence)
//! - `postgres`: PostgreSQL via `sqlx` (production, shared with the read API)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;
