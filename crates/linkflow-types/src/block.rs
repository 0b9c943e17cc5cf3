//! Faults raised by block work-units and their categories.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fault raised by a block.
///
/// Variants carry the category information the error engine classifies on;
/// the message text is for humans only.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum BlockError {
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid format: {0}")]
    Format(String),

    #[error("missing value: {0}")]
    MissingValue(String),

    #[error("business rule violated: {0}")]
    BusinessRule(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// The block observed the run's cancellation signal.
    #[error("cancelled")]
    Cancelled,
}

impl BlockError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BlockError::Cancelled)
    }
}

/// Classification buckets used to pick a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Validation,
    BusinessLogic,
    ResourceExhaustion,
    Security,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Validation => "validation",
            ErrorCategory::BusinessLogic => "business_logic",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Security => "security",
            ErrorCategory::Unknown => "unknown",
        }
    }
}
