//! Event types for the linkflow event bus.
//!
//! `WorkflowEvent` is broadcast while runs execute. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::block::ErrorCategory;
use crate::state::RunStatus;
use crate::workflow::GuardSeverity;

/// Events emitted during workflow execution.
///
/// Used by the event bus to report run lifecycle, block transitions,
/// guard outcomes, retries and checkpoint writes to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        start_block: String,
    },

    RunResumed {
        run_id: Uuid,
        workflow_id: String,
        block: String,
    },

    RunFinished {
        run_id: Uuid,
        workflow_id: String,
        status: RunStatus,
        steps: u32,
        duration_ms: u64,
    },

    RunSuspended {
        run_id: Uuid,
        resume_block: String,
        wait_ms: u64,
    },

    BlockStarted {
        run_id: Uuid,
        block: String,
        attempt: u32,
    },

    BlockCompleted {
        run_id: Uuid,
        block: String,
        next_block: String,
        duration_ms: u64,
    },

    BlockFailed {
        run_id: Uuid,
        block: String,
        category: ErrorCategory,
        error: String,
        will_retry: bool,
    },

    BlockSkipped {
        run_id: Uuid,
        block: String,
        reason: String,
    },

    GuardFailed {
        run_id: Uuid,
        block: String,
        guard: String,
        severity: GuardSeverity,
        message: String,
    },

    RetryScheduled {
        run_id: Uuid,
        block: String,
        attempt: u32,
        delay_ms: u64,
    },

    CheckpointSaved {
        run_id: Uuid,
        status: RunStatus,
        sequence: u64,
    },

    CheckpointFailed {
        run_id: Uuid,
        error: String,
    },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::RunResumed { run_id, .. }
            | WorkflowEvent::RunFinished { run_id, .. }
            | WorkflowEvent::RunSuspended { run_id, .. }
            | WorkflowEvent::BlockStarted { run_id, .. }
            | WorkflowEvent::BlockCompleted { run_id, .. }
            | WorkflowEvent::BlockFailed { run_id, .. }
            | WorkflowEvent::BlockSkipped { run_id, .. }
            | WorkflowEvent::GuardFailed { run_id, .. }
            | WorkflowEvent::RetryScheduled { run_id, .. }
            | WorkflowEvent::CheckpointSaved { run_id, .. }
            | WorkflowEvent::CheckpointFailed { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = WorkflowEvent::RetryScheduled {
            run_id: Uuid::nil(),
            block: "charge".to_string(),
            attempt: 2,
            delay_ms: 400,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "retry_scheduled");
        assert_eq!(json["attempt"], 2);
        assert_eq!(event.run_id(), Uuid::nil());
    }
}
