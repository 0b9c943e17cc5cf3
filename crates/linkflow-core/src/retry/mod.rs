//! Error engine: fault classification, backoff and retry bookkeeping.
//!
//! - [`classify`] maps a `BlockError` to an `ErrorCategory`
//! - [`backoff_delay`] turns a policy and attempt number into a delay
//! - [`ErrorHandler`] tracks per-(block, run) attempt counts and decides
//!   between retry, skip and fail

pub mod backoff;
pub mod handler;

use linkflow_types::block::{BlockError, ErrorCategory};

pub use backoff::backoff_delay;
pub use handler::{ErrorAction, ErrorContext, ErrorDecision, ErrorHandler};

/// Classify a block fault.
///
/// Cancellation is reported as `Unknown`; the executor handles it before
/// consulting the error engine.
pub fn classify(fault: &BlockError) -> ErrorCategory {
    match fault {
        BlockError::Timeout(_) | BlockError::Network(_) | BlockError::Unavailable(_) => {
            ErrorCategory::Transient
        }
        BlockError::Validation(_) | BlockError::Format(_) | BlockError::MissingValue(_) => {
            ErrorCategory::Validation
        }
        BlockError::BusinessRule(_) | BlockError::Precondition(_) => ErrorCategory::BusinessLogic,
        BlockError::ResourceExhausted(_) => ErrorCategory::ResourceExhaustion,
        BlockError::Unauthorized(_) | BlockError::Security(_) => ErrorCategory::Security,
        BlockError::Internal(_) | BlockError::Cancelled => ErrorCategory::Unknown,
    }
}
