//! Runs a single block: pre-guards, pre-flight check, execution, post-guards.
//!
//! Faults raised by the block never escape this module. They are classified
//! by the [`ErrorHandler`] and come back as a [`StepOutcome`] the run loop
//! can act on.

use std::sync::Arc;
use std::time::Duration;

use linkflow_types::block::BlockError;
use linkflow_types::event::WorkflowEvent;
use linkflow_types::value::StateValue;
use tokio::time::Instant;

use crate::block::BlockOutcome;
use crate::context::ExecutionContext;
use crate::event::EventBus;
use crate::guard::{evaluate_guards, ConfiguredGuard, GuardResult};
use crate::retry::{ErrorAction, ErrorHandler};

use super::prepared::PreparedBlock;
use super::FailureCause;

/// Resolved result of one block step.
///
/// Transition targets are already resolved against the definition; an empty
/// target means the chain ends here.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success {
        next_block: String,
        output: Option<StateValue>,
    },
    Skip {
        next_block: String,
        reason: String,
    },
    Failure {
        next_block: String,
        cause: FailureCause,
    },
    /// Run the same block again after `delay`.
    Retry {
        delay: Duration,
        attempt: u32,
        fault: BlockError,
    },
    Wait {
        duration: Duration,
        resume_block: String,
    },
    /// The run's cancellation signal was observed.
    Cancelled,
}

impl StepOutcome {
    /// Name of the next block, if this outcome moves the run forward.
    pub fn next_block(&self) -> Option<&str> {
        match self {
            StepOutcome::Success { next_block, .. }
            | StepOutcome::Skip { next_block, .. }
            | StepOutcome::Failure { next_block, .. } => Some(next_block),
            StepOutcome::Wait { resume_block, .. } => Some(resume_block),
            StepOutcome::Retry { .. } | StepOutcome::Cancelled => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BlockExecutor
// ---------------------------------------------------------------------------

/// Executes prepared blocks against a context.
///
/// Cheap to clone; shares the engine's error handler and event bus.
#[derive(Debug, Clone)]
pub struct BlockExecutor {
    error_handler: Arc<ErrorHandler>,
    event_bus: EventBus,
}

impl BlockExecutor {
    pub fn new(error_handler: Arc<ErrorHandler>, event_bus: EventBus) -> Self {
        Self {
            error_handler,
            event_bus,
        }
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub async fn execute(&self, block: &PreparedBlock, ctx: &mut ExecutionContext) -> StepOutcome {
        if ctx.is_cancelled() {
            return StepOutcome::Cancelled;
        }

        if let Some(failure) = self.run_guards(&block.pre_guards, block, ctx) {
            return guard_failure(block, failure);
        }

        if !block.block.can_execute(ctx) {
            let fault = BlockError::Precondition(format!("block '{}' cannot execute", block.name()));
            return self.handle_fault(block, ctx, fault, None);
        }

        let attempt = self.error_handler.attempts(block.name(), ctx.run_id()) + 1;
        self.event_bus.publish(WorkflowEvent::BlockStarted {
            run_id: ctx.run_id(),
            block: block.name().to_string(),
            attempt,
        });
        tracing::debug!(run_id = %ctx.run_id(), block = block.name(), attempt, "block started");

        let started = Instant::now();
        let outcome = match block.block.execute(ctx).await {
            Ok(outcome) => outcome,
            Err(fault) => BlockOutcome::failure(fault),
        };
        let elapsed = started.elapsed();

        if let Err(e) = block.block.cleanup(ctx, &outcome).await {
            tracing::warn!(run_id = %ctx.run_id(), block = block.name(), error = %e, "block cleanup failed");
        }

        if ctx.is_cancelled() {
            tracing::debug!(run_id = %ctx.run_id(), block = block.name(), "run cancelled during block");
            return StepOutcome::Cancelled;
        }

        match outcome {
            BlockOutcome::Success { next_block, output } => {
                self.on_success(block, ctx, next_block, output, elapsed)
            }
            BlockOutcome::Failure { fault, .. } if fault.is_cancelled() => StepOutcome::Cancelled,
            BlockOutcome::Failure { next_block, fault } => {
                self.handle_fault(block, ctx, fault, next_block)
            }
            BlockOutcome::Skip { next_block, reason } => {
                self.error_handler.reset(block.name(), ctx.run_id());
                let next_block = next_block.unwrap_or_else(|| block.definition.skip_target().to_string());
                self.publish_skipped(block, ctx, &reason);
                StepOutcome::Skip { next_block, reason }
            }
            BlockOutcome::Wait {
                duration,
                resume_block,
            } => {
                self.error_handler.reset(block.name(), ctx.run_id());
                StepOutcome::Wait {
                    duration,
                    resume_block: resume_block
                        .unwrap_or_else(|| block.definition.next_on_success.clone()),
                }
            }
        }
    }

    fn on_success(
        &self,
        block: &PreparedBlock,
        ctx: &mut ExecutionContext,
        next_block: Option<String>,
        output: Option<StateValue>,
        elapsed: Duration,
    ) -> StepOutcome {
        if let Some(value) = &output {
            ctx.record_output(block.name(), value.clone());
        }

        if let Some(failure) = self.run_guards(&block.post_guards, block, ctx) {
            return guard_failure(block, failure);
        }

        self.error_handler.reset(block.name(), ctx.run_id());
        let next_block = next_block.unwrap_or_else(|| block.definition.next_on_success.clone());

        self.event_bus.publish(WorkflowEvent::BlockCompleted {
            run_id: ctx.run_id(),
            block: block.name().to_string(),
            next_block: next_block.clone(),
            duration_ms: elapsed.as_millis() as u64,
        });
        tracing::debug!(
            run_id = %ctx.run_id(),
            block = block.name(),
            next = %next_block,
            "block completed"
        );

        StepOutcome::Success { next_block, output }
    }

    /// Classify a fault and turn the decision into a step outcome.
    ///
    /// `next_override` is a failure target named by the block itself.
    fn handle_fault(
        &self,
        block: &PreparedBlock,
        ctx: &ExecutionContext,
        fault: BlockError,
        next_override: Option<String>,
    ) -> StepOutcome {
        let decision = self
            .error_handler
            .handle(block.name(), ctx.run_id(), &fault, block.retry_policy());

        self.event_bus.publish(WorkflowEvent::BlockFailed {
            run_id: ctx.run_id(),
            block: block.name().to_string(),
            category: decision.category,
            error: fault.to_string(),
            will_retry: decision.will_retry(),
        });

        match decision.action {
            ErrorAction::Retry { delay } => StepOutcome::Retry {
                delay,
                attempt: decision.attempt,
                fault,
            },
            ErrorAction::Skip => {
                self.error_handler.reset(block.name(), ctx.run_id());
                let reason = fault.to_string();
                self.publish_skipped(block, ctx, &reason);
                StepOutcome::Skip {
                    next_block: block.definition.skip_target().to_string(),
                    reason,
                }
            }
            ErrorAction::Fail => {
                tracing::debug!(
                    run_id = %ctx.run_id(),
                    block = block.name(),
                    category = decision.category.as_str(),
                    error = %fault,
                    "block failed"
                );
                StepOutcome::Failure {
                    next_block: next_override
                        .unwrap_or_else(|| block.definition.next_on_failure.clone()),
                    cause: FailureCause::Fault {
                        fault,
                        category: decision.category,
                    },
                }
            }
        }
    }

    /// Evaluate a guard list, reporting every failed guard.
    ///
    /// Returns the halting failure, if any.
    fn run_guards(
        &self,
        guards: &[ConfiguredGuard],
        block: &PreparedBlock,
        ctx: &ExecutionContext,
    ) -> Option<GuardResult> {
        if guards.is_empty() {
            return None;
        }
        let evaluation = evaluate_guards(guards, ctx);
        for result in evaluation.warnings.iter().chain(evaluation.failure.iter()) {
            let message = result.message();
            tracing::warn!(
                run_id = %ctx.run_id(),
                block = block.name(),
                guard = %result.guard,
                severity = ?result.severity,
                "{message}"
            );
            self.event_bus.publish(WorkflowEvent::GuardFailed {
                run_id: ctx.run_id(),
                block: block.name().to_string(),
                guard: result.guard.clone(),
                severity: result.severity,
                message,
            });
        }
        evaluation.failure
    }

    fn publish_skipped(&self, block: &PreparedBlock, ctx: &ExecutionContext, reason: &str) {
        tracing::debug!(run_id = %ctx.run_id(), block = block.name(), reason, "block skipped");
        self.event_bus.publish(WorkflowEvent::BlockSkipped {
            run_id: ctx.run_id(),
            block: block.name().to_string(),
            reason: reason.to_string(),
        });
    }
}

fn guard_failure(block: &PreparedBlock, failure: GuardResult) -> StepOutcome {
    let next_block = failure
        .failure_transition
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| block.definition.next_on_failure.clone());
    StepOutcome::Failure {
        next_block,
        cause: FailureCause::Guard(failure),
    }
}
