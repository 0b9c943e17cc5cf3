//! Checkpoint persistence: the storage port, payload pipeline and manager.
//!
//! The engine never talks to a database directly. It hands a state map and
//! metadata to [`CheckpointManager`], which serializes the map, runs the
//! bytes through the [`PayloadPipeline`] (compression, encryption) and stores
//! the result through a [`StateStore`] implementation.

pub mod checkpoint;
pub mod memory;
pub mod pipeline;
pub mod serializer;

use chrono::{DateTime, Utc};
use linkflow_types::error::RepositoryError;
use linkflow_types::state::{CheckpointVersion, RunStatus, StoreStatistics, WorkflowStateMetadata};
use thiserror::Error;
use uuid::Uuid;

pub use checkpoint::{CheckpointManager, LoadedState};
pub use memory::InMemoryStateStore;
pub use pipeline::{
    CipherError, CompressionStage, EncryptionStage, PayloadCipher, PayloadPipeline, PayloadStage,
};
pub use serializer::StateSerializer;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage error: {0}")]
    Storage(RepositoryError),

    /// Required configuration or key material is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The payload is corrupt, truncated or of an unknown format.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The payload failed authentication under the recorded key.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// An attempt to move a terminal run to another status.
    #[error("run is already {status} and cannot move to {attempted}")]
    TerminalStatus { status: String, attempted: String },
}

impl From<RepositoryError> for StateError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::TerminalStatus { status, attempted } => {
                StateError::TerminalStatus { status, attempted }
            }
            RepositoryError::Corrupted(reason) => StateError::Deserialization(reason),
            other => StateError::Storage(other),
        }
    }
}

// ---------------------------------------------------------------------------
// StateStore port
// ---------------------------------------------------------------------------

/// An encoded checkpoint as it sits in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    pub metadata: WorkflowStateMetadata,
    /// Output of the payload pipeline; opaque to the store.
    pub payload: Vec<u8>,
}

/// Storage port for checkpoints, keyed by (workflow id, run id).
///
/// Implementations must:
/// - serialize writes per key so the newest write wins
/// - reject a write whose `sequence` is lower than the stored one
///   (`RepositoryError::StaleWrite`)
/// - reject any status change away from a terminal status
///   (`RepositoryError::TerminalStatus`)
///
/// Uses native async fn in traits (no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Insert or replace the latest checkpoint of a run.
    ///
    /// With `retain_versions = Some(n)` the previous payloads are kept as
    /// versions, pruned to the newest `n`. Returns the stored metadata.
    fn put(
        &self,
        record: StoredState,
        retain_versions: Option<u32>,
    ) -> impl std::future::Future<Output = Result<WorkflowStateMetadata, RepositoryError>> + Send;

    /// Latest checkpoint of a run.
    fn get(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StoredState>, RepositoryError>> + Send;

    /// A specific retained version.
    fn get_version(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
        version: u64,
    ) -> impl std::future::Future<Output = Result<Option<StoredState>, RepositoryError>> + Send;

    /// Retained versions, oldest first.
    fn list_versions(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointVersion>, RepositoryError>> + Send;

    fn exists(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every version of a run. Returns `true` if anything existed.
    fn delete(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Run ids with a checkpoint for `workflow_id`.
    fn list_runs(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    fn get_metadata(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowStateMetadata>, RepositoryError>> + Send;

    /// Replace the metadata of the latest checkpoint, keeping its payload.
    ///
    /// Returns `RepositoryError::NotFound` when the run has no checkpoint.
    fn update_metadata(
        &self,
        metadata: &WorkflowStateMetadata,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete runs last updated before `cutoff`, optionally only in `status`.
    /// Returns the number of runs removed.
    fn cleanup_older_than(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<RunStatus>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    fn statistics(
        &self,
    ) -> impl std::future::Future<Output = Result<StoreStatistics, RepositoryError>> + Send;
}

/// Shared stores: an `Arc<S>` is a store wherever `S` is.
impl<S: StateStore> StateStore for std::sync::Arc<S> {
    fn put(
        &self,
        record: StoredState,
        retain_versions: Option<u32>,
    ) -> impl std::future::Future<Output = Result<WorkflowStateMetadata, RepositoryError>> + Send {
        (**self).put(record, retain_versions)
    }

    fn get(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StoredState>, RepositoryError>> + Send {
        (**self).get(workflow_id, run_id)
    }

    fn get_version(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
        version: u64,
    ) -> impl std::future::Future<Output = Result<Option<StoredState>, RepositoryError>> + Send {
        (**self).get_version(workflow_id, run_id, version)
    }

    fn list_versions(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointVersion>, RepositoryError>> + Send {
        (**self).list_versions(workflow_id, run_id)
    }

    fn exists(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send {
        (**self).exists(workflow_id, run_id)
    }

    fn delete(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send {
        (**self).delete(workflow_id, run_id)
    }

    fn list_runs(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send {
        (**self).list_runs(workflow_id)
    }

    fn get_metadata(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowStateMetadata>, RepositoryError>> + Send {
        (**self).get_metadata(workflow_id, run_id)
    }

    fn update_metadata(
        &self,
        metadata: &WorkflowStateMetadata,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).update_metadata(metadata)
    }

    fn cleanup_older_than(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<RunStatus>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send {
        (**self).cleanup_older_than(cutoff, status)
    }

    fn statistics(
        &self,
    ) -> impl std::future::Future<Output = Result<StoreStatistics, RepositoryError>> + Send {
        (**self).statistics()
    }
}

/// Shared write-admission rules for store implementations.
///
/// Returns the error a store must raise when `incoming` may not replace
/// `existing`.
pub fn check_write(
    existing: &WorkflowStateMetadata,
    incoming: &WorkflowStateMetadata,
) -> Result<(), RepositoryError> {
    if !existing.status.can_transition_to(incoming.status) {
        return Err(RepositoryError::TerminalStatus {
            status: existing.status.to_string(),
            attempted: incoming.status.to_string(),
        });
    }
    if incoming.sequence < existing.sequence {
        return Err(RepositoryError::StaleWrite {
            incoming: incoming.sequence,
            stored: existing.sequence,
        });
    }
    Ok(())
}
