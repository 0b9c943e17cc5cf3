//! Per-(block, run) error contexts and recovery decisions.
//!
//! The handler is shared by every run of an engine. Contexts are keyed by
//! block name and run id in a `DashMap`, so concurrent runs never contend on
//! one lock and two runs faulting in the same block never share a counter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use linkflow_types::block::{BlockError, ErrorCategory};
use linkflow_types::workflow::RetryPolicy;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{backoff_delay, classify};

type ErrorKey = (String, Uuid);

/// What the executor should do about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Re-run the same block after `delay`.
    Retry { delay: Duration },
    /// Continue along the block's skip transition.
    Skip,
    /// Take the block's failure transition.
    Fail,
}

/// The handler's decision plus the classification that led to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDecision {
    pub action: ErrorAction,
    pub category: ErrorCategory,
    /// Number of faults recorded for this (block, run), including this one.
    pub attempt: u32,
    /// Identifier of the error context this fault was recorded in.
    pub error_id: Uuid,
}

impl ErrorDecision {
    pub fn will_retry(&self) -> bool {
        matches!(self.action, ErrorAction::Retry { .. })
    }

    pub fn delay(&self) -> Option<Duration> {
        match self.action {
            ErrorAction::Retry { delay } => Some(delay),
            _ => None,
        }
    }
}

/// Everything known about the faults of one block within one run.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub id: Uuid,
    pub block: String,
    pub run_id: Uuid,
    pub last_fault: BlockError,
    pub category: ErrorCategory,
    pub policy: RetryPolicy,
    pub attempts: u32,
    pub first_fault_at: DateTime<Utc>,
    pub last_fault_at: DateTime<Utc>,
}

/// Classifies faults and tracks retry attempts.
pub struct ErrorHandler {
    contexts: DashMap<ErrorKey, ErrorContext>,
    default_policy: RetryPolicy,
    max_age: Duration,
}

impl ErrorHandler {
    pub fn new(default_policy: RetryPolicy, max_age: Duration) -> Self {
        Self {
            contexts: DashMap::new(),
            default_policy,
            max_age,
        }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Record a fault and decide how to recover.
    ///
    /// `policy` is the block's own policy; the engine default applies when
    /// it is `None`. Transient and security faults retry while the attempt
    /// count is within `max_retries`; validation faults skip; everything
    /// else fails immediately.
    pub fn handle(
        &self,
        block: &str,
        run_id: Uuid,
        fault: &BlockError,
        policy: Option<&RetryPolicy>,
    ) -> ErrorDecision {
        let category = classify(fault);
        let policy = policy.unwrap_or(&self.default_policy);
        let now = Utc::now();

        let mut entry = self
            .contexts
            .entry((block.to_string(), run_id))
            .or_insert_with(|| ErrorContext {
                id: Uuid::now_v7(),
                block: block.to_string(),
                run_id,
                last_fault: fault.clone(),
                category,
                policy: policy.clone(),
                attempts: 0,
                first_fault_at: now,
                last_fault_at: now,
            });
        let context = entry.value_mut();
        context.attempts = context.attempts.saturating_add(1);
        context.last_fault = fault.clone();
        context.category = category;
        context.last_fault_at = now;
        let attempt = context.attempts;
        let error_id = context.id;
        drop(entry);

        let action = match category {
            ErrorCategory::Transient | ErrorCategory::Security => {
                if attempt <= policy.max_retries {
                    ErrorAction::Retry {
                        delay: backoff_delay(policy, attempt),
                    }
                } else {
                    ErrorAction::Fail
                }
            }
            ErrorCategory::Validation => ErrorAction::Skip,
            ErrorCategory::BusinessLogic
            | ErrorCategory::ResourceExhaustion
            | ErrorCategory::Unknown => ErrorAction::Fail,
        };

        tracing::debug!(
            run_id = %run_id,
            block,
            category = category.as_str(),
            attempt,
            action = ?action,
            "fault classified"
        );

        ErrorDecision {
            action,
            category,
            attempt,
            error_id,
        }
    }

    /// Faults recorded so far for (block, run).
    pub fn attempts(&self, block: &str, run_id: Uuid) -> u32 {
        self.contexts
            .get(&(block.to_string(), run_id))
            .map_or(0, |c| c.attempts)
    }

    pub fn context(&self, block: &str, run_id: Uuid) -> Option<ErrorContext> {
        self.contexts
            .get(&(block.to_string(), run_id))
            .map(|c| c.value().clone())
    }

    /// Forget the fault history of a block after it succeeds.
    pub fn reset(&self, block: &str, run_id: Uuid) {
        self.contexts.remove(&(block.to_string(), run_id));
    }

    /// Drop every context belonging to a finished run.
    pub fn clear_run(&self, run_id: Uuid) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|(_, run), _| *run != run_id);
        before.saturating_sub(self.contexts.len())
    }

    /// Remove contexts whose last fault is older than `cutoff`.
    pub fn sweep(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|_, ctx| ctx.last_fault_at >= cutoff);
        let removed = before.saturating_sub(self.contexts.len());
        if removed > 0 {
            tracing::debug!(removed, "swept stale error contexts");
        }
        removed
    }

    /// Sweep with the configured maximum age.
    pub fn sweep_stale(&self) -> usize {
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep(cutoff)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Run [`sweep_stale`](Self::sweep_stale) every `interval` until `token`
    /// is cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_stale();
                    }
                }
            }
            tracing::debug!("error context sweeper stopped");
        })
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("contexts", &self.contexts.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkflow_types::workflow::BackoffStrategy;

    fn handler() -> ErrorHandler {
        ErrorHandler::new(
            RetryPolicy {
                max_retries: 2,
                initial_delay_ms: 100,
                max_delay_ms: 10_000,
                strategy: BackoffStrategy::Exponential,
                multiplier: 2.0,
            },
            Duration::from_secs(3_600),
        )
    }

    #[test]
    fn test_transient_retries_exactly_max_retries_times() {
        let h = handler();
        let run = Uuid::now_v7();
        let fault = BlockError::Timeout("gateway".into());

        let first = h.handle("charge", run, &fault, None);
        assert_eq!(first.action, ErrorAction::Retry { delay: Duration::from_millis(100) });
        assert_eq!(first.attempt, 1);

        let second = h.handle("charge", run, &fault, None);
        assert_eq!(second.delay(), Some(Duration::from_millis(200)));
        assert_eq!(second.error_id, first.error_id);

        let third = h.handle("charge", run, &fault, None);
        assert_eq!(third.action, ErrorAction::Fail);
        assert_eq!(third.attempt, 3);
    }

    #[test]
    fn test_zero_retries_fails_first_time() {
        let h = handler();
        let decision = h.handle(
            "charge",
            Uuid::now_v7(),
            &BlockError::Network("reset".into()),
            Some(&RetryPolicy::none()),
        );
        assert_eq!(decision.action, ErrorAction::Fail);
        assert_eq!(decision.category, ErrorCategory::Transient);
    }

    #[test]
    fn test_non_retryable_categories() {
        let h = handler();
        let run = Uuid::now_v7();
        let skip = h.handle("a", run, &BlockError::Format("iban".into()), None);
        assert_eq!(skip.action, ErrorAction::Skip);
        let fail = h.handle("b", run, &BlockError::BusinessRule("limit".into()), None);
        assert_eq!(fail.action, ErrorAction::Fail);
        let exhausted = h.handle("c", run, &BlockError::ResourceExhausted("quota".into()), None);
        assert_eq!(exhausted.action, ErrorAction::Fail);
        let unknown = h.handle("d", run, &BlockError::Internal("boom".into()), None);
        assert_eq!(unknown.action, ErrorAction::Fail);
        let security = h.handle("e", run, &BlockError::Unauthorized("token".into()), None);
        assert!(security.will_retry());
    }

    #[test]
    fn test_runs_do_not_share_counters() {
        let h = handler();
        let fault = BlockError::Timeout("t".into());
        let run_a = Uuid::now_v7();
        let run_b = Uuid::now_v7();
        h.handle("charge", run_a, &fault, None);
        h.handle("charge", run_a, &fault, None);
        let b = h.handle("charge", run_b, &fault, None);
        assert_eq!(b.attempt, 1);
        assert_eq!(h.attempts("charge", run_a), 2);
    }

    #[test]
    fn test_reset_and_clear_run() {
        let h = handler();
        let run = Uuid::now_v7();
        let other = Uuid::now_v7();
        let fault = BlockError::Timeout("t".into());
        h.handle("a", run, &fault, None);
        h.handle("b", run, &fault, None);
        h.handle("a", other, &fault, None);

        h.reset("a", run);
        assert_eq!(h.attempts("a", run), 0);
        assert_eq!(h.clear_run(run), 1);
        assert_eq!(h.len(), 1);
        assert!(h.context("a", other).is_some());
    }

    #[test]
    fn test_sweep_by_cutoff() {
        let h = handler();
        let run = Uuid::now_v7();
        h.handle("a", run, &BlockError::Timeout("t".into()), None);
        assert_eq!(h.sweep(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(h.sweep_stale(), 0);
        assert_eq!(h.sweep(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(h.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let h = Arc::new(ErrorHandler::new(RetryPolicy::default(), Duration::ZERO));
        h.handle("a", Uuid::now_v7(), &BlockError::Timeout("t".into()), None);
        let token = CancellationToken::new();
        let task = h.clone().spawn_sweeper(Duration::from_millis(10), token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.is_empty());

        token.cancel();
        task.await.unwrap();
    }
}
