use thiserror::Error;

/// Errors from state store operations (used by trait definitions in linkflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("stale write: sequence {incoming} is older than stored sequence {stored}")]
    StaleWrite { incoming: u64, stored: u64 },

    #[error("run is already {status} and cannot move back to {attempted}")]
    TerminalStatus { status: String, attempted: String },

    /// Stored bytes no longer match their recorded checksum.
    #[error("corrupted record: {0}")]
    Corrupted(String),
}
