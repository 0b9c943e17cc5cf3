//! Block executor and workflow run loop.
//!
//! - `prepared` resolves a definition against the block and guard registries
//! - `block_executor` runs one block: guards, execution, error handling
//! - `engine` drives a run from block to block, checkpointing as it goes

pub mod block_executor;
pub mod engine;
pub mod prepared;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use linkflow_types::block::{BlockError, ErrorCategory};
use linkflow_types::state::RunStatus;
use linkflow_types::value::StateValue;
use thiserror::Error;
use uuid::Uuid;

use crate::definition::DefinitionError;
use crate::guard::GuardResult;
use crate::state::StateError;

pub use block_executor::{BlockExecutor, StepOutcome};
pub use engine::{WorkflowEngine, WorkflowExecutor, RESUME_AT_KEY};
pub use prepared::{PreparedBlock, PreparedWorkflow};

// ---------------------------------------------------------------------------
// Failure cause
// ---------------------------------------------------------------------------

/// Why a block did not take its success transition.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// The block (or its pre-flight check) raised a fault.
    Fault {
        fault: BlockError,
        category: ErrorCategory,
    },
    /// A halting guard rejected the context.
    Guard(GuardResult),
}

impl FailureCause {
    pub fn message(&self) -> String {
        match self {
            FailureCause::Fault { fault, category } => {
                format!("{fault} ({})", category.as_str())
            }
            FailureCause::Guard(result) => result.message(),
        }
    }

    pub fn fault(&self) -> Option<&BlockError> {
        match self {
            FailureCause::Fault { fault, .. } => Some(fault),
            FailureCause::Guard(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

/// Final report of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub workflow_id: String,
    pub workflow_version: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub success: bool,
    /// Block the run stopped at (the resume point for suspended runs).
    pub last_block: String,
    /// Block invocations, including retries and earlier resumptions.
    pub steps: u32,
    /// State at the end of the run. Absent when the run failed before any
    /// checkpoint was written.
    pub final_state: Option<HashMap<String, StateValue>>,
    /// What made the run fail, if it failed because of a block or guard.
    pub failure: Option<FailureCause>,
    /// Human-readable summary.
    pub message: String,
}

impl RunOutcome {
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    pub fn fault(&self) -> Option<&BlockError> {
        self.failure.as_ref().and_then(FailureCause::fault)
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    /// The run was cancelled; the outcome reflects the state at that point.
    #[error("workflow run {} cancelled", .0.run_id)]
    Cancelled(Box<RunOutcome>),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run {run_id} cannot be resumed from status {status}")]
    NotResumable { run_id: Uuid, status: RunStatus },

    /// The run id is already being executed by this engine.
    #[error("run {0} is already in progress")]
    RunInProgress(Uuid),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl ExecutorError {
    /// The partial outcome of a cancelled run.
    pub fn cancelled_outcome(&self) -> Option<&RunOutcome> {
        match self {
            ExecutorError::Cancelled(outcome) => Some(outcome),
            _ => None,
        }
    }
}
