//! Retry delay computation.

use std::time::Duration;

use linkflow_types::workflow::{BackoffStrategy, RetryPolicy};

/// Delay before retry number `attempt` (1-based).
///
/// - immediate: zero
/// - fixed: the initial delay
/// - linear: initial delay times `attempt`
/// - exponential: initial delay times `multiplier^(attempt - 1)`
///
/// The result never exceeds `policy.max_delay_ms`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let initial = policy.initial_delay_ms as f64;
    let raw_ms = match policy.strategy {
        BackoffStrategy::Immediate => 0.0,
        BackoffStrategy::Fixed => initial,
        BackoffStrategy::Linear => initial * f64::from(attempt),
        BackoffStrategy::Exponential => {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            initial * policy.multiplier.max(1.0).powi(exponent)
        }
    };
    let capped = raw_ms.min(policy.max_delay_ms as f64);
    if capped.is_finite() && capped > 0.0 {
        Duration::from_millis(capped as u64)
    } else {
        Duration::ZERO
    }
}
