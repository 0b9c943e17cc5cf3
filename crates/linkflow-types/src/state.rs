//! Run status and checkpoint metadata types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a workflow run.
///
/// `NotStarted -> Running -> {Waiting, Suspended} -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Waiting,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Completed, failed and cancelled runs never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Runs that may still make progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunStatus::Running | RunStatus::Waiting | RunStatus::Suspended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Suspended => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "not_started" => RunStatus::NotStarted,
            "running" => RunStatus::Running,
            "waiting" => RunStatus::Waiting,
            "suspended" => RunStatus::Suspended,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            _ => return None,
        })
    }

    /// Whether a record currently in `self` may be overwritten with `next`.
    ///
    /// A terminal record only accepts the same terminal status again.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        !self.is_terminal() || *self == next
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata persisted next to every checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStateMetadata {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Block the run will execute next (empty when finished).
    pub current_block: String,
    /// Size of the stored payload in bytes (after compression/encryption).
    pub size_bytes: u64,
    pub workflow_version: String,
    pub updated_at: DateTime<Utc>,
    /// Monotonic per-run write counter; stores reject lower values.
    #[serde(default)]
    pub sequence: u64,
    /// Hex digest of the serialized state, when the store records one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,
}

impl WorkflowStateMetadata {
    pub fn new(workflow_id: impl Into<String>, run_id: Uuid, workflow_version: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            status: RunStatus::Running,
            current_block: String::new(),
            size_bytes: 0,
            workflow_version: workflow_version.into(),
            updated_at: Utc::now(),
            sequence: 0,
            checksum: None,
            custom: HashMap::new(),
        }
    }
}

/// One retained version of a run's checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointVersion {
    pub version: u64,
    pub sequence: u64,
    pub status: RunStatus,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

/// Aggregate numbers over everything in a state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_states: u64,
    pub total_size_bytes: u64,
    pub active_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
}
