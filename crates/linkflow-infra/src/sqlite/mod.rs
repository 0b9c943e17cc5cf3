//! SQLite storage layer.
//!
//! Checkpoint storage backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod pool;
pub mod state_store;

pub use pool::{DatabasePool, default_database_url};
pub use state_store::SqliteStateStore;
