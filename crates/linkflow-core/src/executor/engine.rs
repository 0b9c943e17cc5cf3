//! Workflow run loop.
//!
//! `WorkflowEngine` walks a prepared chain one block at a time: it resolves
//! the current block by name, hands it to the [`BlockExecutor`], applies the
//! resulting transition, and checkpoints according to the configured
//! frequency. Retry delays and short waits are cancellable timer sleeps;
//! long waits suspend the run to storage instead of holding a task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use linkflow_types::block::{BlockError, ErrorCategory};
use linkflow_types::config::EngineConfig;
use linkflow_types::event::WorkflowEvent;
use linkflow_types::state::{RunStatus, WorkflowStateMetadata};
use linkflow_types::value::StateValue;
use linkflow_types::workflow::WorkflowDefinition;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::block::BlockRegistry;
use crate::context::{ContextSnapshot, ExecutionContext};
use crate::event::EventBus;
use crate::guard::GuardRegistry;
use crate::retry::ErrorHandler;
use crate::state::{CheckpointManager, StateStore};

use super::block_executor::{BlockExecutor, StepOutcome};
use super::prepared::PreparedWorkflow;
use super::{ExecutorError, FailureCause, RunOutcome};

/// Metadata key holding the RFC 3339 time a suspended run is due to resume.
pub const RESUME_AT_KEY: &str = "resume_at";

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Runs prepared workflows.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowExecutor: Send + Sync {
    /// Start a new run at the workflow's start block.
    fn execute(
        &self,
        workflow: &PreparedWorkflow,
        input: StateValue,
    ) -> impl std::future::Future<Output = Result<RunOutcome, ExecutorError>> + Send;

    /// Continue a run from its latest checkpoint.
    fn resume(
        &self,
        workflow: &PreparedWorkflow,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<RunOutcome, ExecutorError>> + Send;

    /// Signal a live run to stop.
    fn cancel(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), ExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// The block-chain state machine.
///
/// Generic over `S: StateStore` so it runs against any checkpoint backend.
/// The engine is shared by concurrent runs; each run owns its own
/// [`ExecutionContext`] and cancellation token.
pub struct WorkflowEngine<S: StateStore> {
    checkpoints: Arc<CheckpointManager<S>>,
    blocks: BlockRegistry,
    guards: GuardRegistry,
    error_handler: Arc<ErrorHandler>,
    block_executor: BlockExecutor,
    event_bus: EventBus,
    config: EngineConfig,
    /// Per-run cancellation tokens for live runs.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<S: StateStore> WorkflowEngine<S> {
    pub fn new(checkpoints: Arc<CheckpointManager<S>>, config: EngineConfig) -> Self {
        let error_handler = Arc::new(ErrorHandler::new(
            config.retry.clone(),
            config.errors.max_age(),
        ));
        let event_bus = EventBus::default();
        Self {
            checkpoints,
            blocks: BlockRegistry::new(),
            guards: GuardRegistry::new(),
            block_executor: BlockExecutor::new(error_handler.clone(), event_bus.clone()),
            error_handler,
            event_bus,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn with_blocks(mut self, blocks: BlockRegistry) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_guards(mut self, guards: GuardRegistry) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.block_executor = BlockExecutor::new(self.error_handler.clone(), event_bus.clone());
        self.event_bus = event_bus;
        self
    }

    pub fn blocks_mut(&mut self) -> &mut BlockRegistry {
        &mut self.blocks
    }

    pub fn guards_mut(&mut self) -> &mut GuardRegistry {
        &mut self.guards
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager<S>> {
        &self.checkpoints
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ids of runs currently executing on this engine.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    /// Periodically sweep stale error contexts until `token` is cancelled.
    pub fn spawn_error_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        self.error_handler
            .clone()
            .spawn_sweeper(self.config.errors.sweep_interval(), token)
    }

    /// Validate a definition and resolve it against the registries.
    pub fn prepare(&self, definition: WorkflowDefinition) -> Result<Arc<PreparedWorkflow>, ExecutorError> {
        Ok(PreparedWorkflow::prepare(definition, &self.blocks, &self.guards)?)
    }

    /// Prepare and execute in one call.
    pub async fn run(
        &self,
        definition: WorkflowDefinition,
        input: StateValue,
    ) -> Result<RunOutcome, ExecutorError> {
        let workflow = self.prepare(definition)?;
        self.execute_with_id(&workflow, Uuid::now_v7(), input).await
    }

    /// Start a run under a caller-chosen id.
    pub async fn execute_with_id(
        &self,
        workflow: &PreparedWorkflow,
        run_id: Uuid,
        input: StateValue,
    ) -> Result<RunOutcome, ExecutorError> {
        let token = CancellationToken::new();
        let _registration = self.register(run_id, &token)?;

        let mut ctx = ExecutionContext::new(workflow.id(), workflow.version(), run_id, input)
            .with_cancel_token(token);
        for (key, value) in &workflow.definition().variables {
            ctx.set_state(key.clone(), value.clone());
        }
        ctx.set_current_block(workflow.start_block());

        tracing::info!(
            run_id = %run_id,
            workflow_id = workflow.id(),
            version = workflow.version(),
            "workflow run started"
        );
        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id,
            workflow_id: workflow.id().to_string(),
            start_block: workflow.start_block().to_string(),
        });

        self.drive(workflow, &mut ctx)
            .instrument(tracing::info_span!("workflow_run", run_id = %run_id, workflow_id = workflow.id()))
            .await
    }

    async fn resume_run(
        &self,
        workflow: &PreparedWorkflow,
        run_id: Uuid,
    ) -> Result<RunOutcome, ExecutorError> {
        let token = CancellationToken::new();
        let _registration = self.register(run_id, &token)?;

        let loaded = self
            .checkpoints
            .load(workflow.id(), run_id)
            .await?
            .ok_or(ExecutorError::RunNotFound(run_id))?;
        let status = loaded.metadata.status;
        if status.is_terminal() {
            return Err(ExecutorError::NotResumable { run_id, status });
        }
        if loaded.metadata.workflow_version != workflow.version() {
            tracing::warn!(
                run_id = %run_id,
                stored = %loaded.metadata.workflow_version,
                current = workflow.version(),
                "resuming run under a different workflow version"
            );
        }

        let snapshot = ContextSnapshot::from_checkpoint(loaded.state, &loaded.metadata);
        let mut ctx = ExecutionContext::from_snapshot(snapshot, token);

        tracing::info!(
            run_id = %run_id,
            workflow_id = workflow.id(),
            block = ctx.current_block(),
            from_status = %status,
            "workflow run resumed"
        );
        self.event_bus.publish(WorkflowEvent::RunResumed {
            run_id,
            workflow_id: workflow.id().to_string(),
            block: ctx.current_block().to_string(),
        });

        self.drive(workflow, &mut ctx)
            .instrument(tracing::info_span!("workflow_run", run_id = %run_id, workflow_id = workflow.id()))
            .await
    }

    fn register<'a>(
        &'a self,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> Result<RunRegistration<'a>, ExecutorError> {
        match self.cancellation_tokens.entry(run_id) {
            Entry::Occupied(_) => Err(ExecutorError::RunInProgress(run_id)),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(RunRegistration {
                    tokens: &self.cancellation_tokens,
                    run_id,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        workflow: &PreparedWorkflow,
        ctx: &mut ExecutionContext,
    ) -> Result<RunOutcome, ExecutorError> {
        let max_steps = self.config.execution.max_steps_per_run;
        let suspend_threshold = self.config.execution.suspend_threshold();

        let end = loop {
            if ctx.is_cancelled() {
                break RunEnd::cancelled();
            }

            let name = ctx.current_block().to_string();
            if name.is_empty() {
                break RunEnd::completed("workflow completed");
            }
            let Some(block) = workflow.block(&name) else {
                break RunEnd::failed(FailureCause::Fault {
                    fault: BlockError::Internal(format!("block not found: {name}")),
                    category: ErrorCategory::Unknown,
                });
            };
            if max_steps > 0 && ctx.step_count() >= max_steps {
                break RunEnd::failed(FailureCause::Fault {
                    fault: BlockError::ResourceExhausted(format!(
                        "run exceeded {max_steps} block invocations"
                    )),
                    category: ErrorCategory::ResourceExhaustion,
                });
            }
            ctx.increment_step();

            match self.block_executor.execute(block, ctx).await {
                StepOutcome::Success { next_block, .. } | StepOutcome::Skip { next_block, .. } => {
                    if next_block.is_empty() {
                        break RunEnd::completed(format!("workflow completed at block '{name}'"));
                    }
                    ctx.set_current_block(next_block);
                    self.checkpoint(ctx, RunStatus::Running, None).await;
                }
                StepOutcome::Failure { next_block, cause } => {
                    if next_block.is_empty() {
                        break RunEnd::failed(cause);
                    }
                    tracing::debug!(
                        run_id = %ctx.run_id(),
                        block = %name,
                        next = %next_block,
                        reason = %cause.message(),
                        "taking failure transition"
                    );
                    ctx.set_current_block(next_block);
                    self.checkpoint(ctx, RunStatus::Running, None).await;
                }
                StepOutcome::Retry {
                    delay,
                    attempt,
                    fault,
                } => {
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        run_id = %ctx.run_id(),
                        block = %name,
                        attempt,
                        delay_ms,
                        error = %fault,
                        "retrying block"
                    );
                    self.event_bus.publish(WorkflowEvent::RetryScheduled {
                        run_id: ctx.run_id(),
                        block: name.clone(),
                        attempt,
                        delay_ms,
                    });
                    if !sleep_cancellable(ctx.cancellation_token(), delay).await {
                        break RunEnd::cancelled();
                    }
                }
                StepOutcome::Wait {
                    duration,
                    resume_block,
                } => {
                    if suspend_threshold.is_some_and(|threshold| duration > threshold) {
                        ctx.set_current_block(resume_block.clone());
                        let resume_at = chrono::Duration::from_std(duration)
                            .ok()
                            .and_then(|wait| Utc::now().checked_add_signed(wait))
                            .unwrap_or(DateTime::<Utc>::MAX_UTC);
                        self.event_bus.publish(WorkflowEvent::RunSuspended {
                            run_id: ctx.run_id(),
                            resume_block,
                            wait_ms: duration.as_millis() as u64,
                        });
                        break RunEnd::suspended(resume_at);
                    }

                    ctx.set_current_block(resume_block);
                    self.checkpoint(ctx, RunStatus::Waiting, None).await;
                    if !sleep_cancellable(ctx.cancellation_token(), duration).await {
                        break RunEnd::cancelled();
                    }
                }
                StepOutcome::Cancelled => break RunEnd::cancelled(),
            }
        };

        self.finish(ctx, end).await
    }

    /// Write the final checkpoint, publish the finish event and build the
    /// outcome.
    async fn finish(&self, ctx: &mut ExecutionContext, end: RunEnd) -> Result<RunOutcome, ExecutorError> {
        self.checkpoint(ctx, end.status, end.resume_at).await;
        self.error_handler.clear_run(ctx.run_id());

        let completed_at = Utc::now();
        let duration_ms = (completed_at - ctx.started_at()).num_milliseconds().max(0) as u64;
        let run_id = ctx.run_id();

        match end.status {
            RunStatus::Failed => tracing::error!(
                run_id = %run_id,
                block = ctx.current_block(),
                steps = ctx.step_count(),
                "workflow run failed: {}",
                end.message
            ),
            status => tracing::info!(
                run_id = %run_id,
                status = %status,
                steps = ctx.step_count(),
                duration_ms,
                "workflow run finished"
            ),
        }
        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id,
            workflow_id: ctx.workflow_id().to_string(),
            status: end.status,
            steps: ctx.step_count(),
            duration_ms,
        });

        let final_state = match end.status {
            RunStatus::Failed if !ctx.has_checkpoint() => None,
            _ => Some(ctx.snapshot()),
        };
        let outcome = RunOutcome {
            workflow_id: ctx.workflow_id().to_string(),
            workflow_version: ctx.workflow_version().to_string(),
            run_id,
            started_at: ctx.started_at(),
            completed_at,
            status: end.status,
            success: end.status == RunStatus::Completed,
            last_block: ctx.current_block().to_string(),
            steps: ctx.step_count(),
            final_state,
            failure: end.failure,
            message: end.message,
        };

        if end.status == RunStatus::Cancelled {
            Err(ExecutorError::Cancelled(Box::new(outcome)))
        } else {
            Ok(outcome)
        }
    }

    /// Persist the context if the frequency policy asks for it.
    ///
    /// Failures are logged and reported on the event bus, never returned.
    async fn checkpoint(
        &self,
        ctx: &mut ExecutionContext,
        status: RunStatus,
        resume_at: Option<DateTime<Utc>>,
    ) {
        if !self.config.checkpoint.frequency.should_save(status) {
            return;
        }

        let sequence = ctx.next_sequence();
        let snapshot = ctx.to_snapshot();
        let mut metadata =
            WorkflowStateMetadata::new(&snapshot.workflow_id, snapshot.run_id, &snapshot.workflow_version);
        metadata.status = status;
        snapshot.annotate(&mut metadata);
        if let Some(at) = resume_at {
            metadata
                .custom
                .insert(RESUME_AT_KEY.to_string(), serde_json::Value::String(at.to_rfc3339()));
        }

        match self
            .checkpoints
            .save(&snapshot.workflow_id, snapshot.run_id, &snapshot.state, metadata)
            .await
        {
            Ok(_) => {
                ctx.mark_checkpointed();
                self.event_bus.publish(WorkflowEvent::CheckpointSaved {
                    run_id: snapshot.run_id,
                    status,
                    sequence,
                });
            }
            Err(e) => {
                tracing::warn!(
                    run_id = %snapshot.run_id,
                    status = %status,
                    sequence,
                    error = %e,
                    "checkpoint save failed"
                );
                self.event_bus.publish(WorkflowEvent::CheckpointFailed {
                    run_id: snapshot.run_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

impl<S: StateStore> WorkflowExecutor for WorkflowEngine<S> {
    async fn execute(
        &self,
        workflow: &PreparedWorkflow,
        input: StateValue,
    ) -> Result<RunOutcome, ExecutorError> {
        self.execute_with_id(workflow, Uuid::now_v7(), input).await
    }

    async fn resume(
        &self,
        workflow: &PreparedWorkflow,
        run_id: Uuid,
    ) -> Result<RunOutcome, ExecutorError> {
        self.resume_run(workflow, run_id).await
    }

    async fn cancel(&self, run_id: Uuid) -> Result<(), ExecutorError> {
        match self.cancellation_tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %run_id, "workflow cancellation requested");
                Ok(())
            }
            None => Err(ExecutorError::RunNotFound(run_id)),
        }
    }
}

impl<S: StateStore> std::fmt::Debug for WorkflowEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("blocks", &self.blocks)
            .field("guards", &self.guards)
            .field("active_runs", &self.cancellation_tokens.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Removes a run's token when the run future completes or is dropped.
struct RunRegistration<'a> {
    tokens: &'a DashMap<Uuid, CancellationToken>,
    run_id: Uuid,
}

impl Drop for RunRegistration<'_> {
    fn drop(&mut self) {
        self.tokens.remove(&self.run_id);
    }
}

/// How the loop ended.
struct RunEnd {
    status: RunStatus,
    failure: Option<FailureCause>,
    message: String,
    resume_at: Option<DateTime<Utc>>,
}

impl RunEnd {
    fn completed(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            failure: None,
            message: message.into(),
            resume_at: None,
        }
    }

    fn failed(cause: FailureCause) -> Self {
        Self {
            status: RunStatus::Failed,
            message: cause.message(),
            failure: Some(cause),
            resume_at: None,
        }
    }

    fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            failure: None,
            message: "workflow run cancelled".to_string(),
            resume_at: None,
        }
    }

    fn suspended(resume_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Suspended,
            failure: None,
            message: format!("workflow run suspended until {}", resume_at.to_rfc3339()),
            resume_at: Some(resume_at),
        }
    }
}

/// Sleep for `duration` unless the token fires first. Returns `false` when
/// cancelled.
async fn sleep_cancellable(token: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
