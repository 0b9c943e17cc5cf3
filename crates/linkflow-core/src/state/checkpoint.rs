//! Checkpoint manager: serialize, transform and persist execution state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use linkflow_types::state::{CheckpointVersion, RunStatus, StoreStatistics, WorkflowStateMetadata};
use linkflow_types::value::StateValue;
use uuid::Uuid;

use super::pipeline::PayloadPipeline;
use super::serializer::StateSerializer;
use super::{StateError, StateStore, StoredState};

/// A checkpoint loaded back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub state: HashMap<String, StateValue>,
    pub metadata: WorkflowStateMetadata,
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Persists execution state through a `StateStore`.
///
/// Generic over `S: StateStore` so it works with any backend (SQLite,
/// in-memory, ...). Save runs serializer then pipeline then store; load runs
/// the same chain backwards.
pub struct CheckpointManager<S: StateStore> {
    store: S,
    serializer: StateSerializer,
    pipeline: PayloadPipeline,
    retain_versions: Option<u32>,
}

impl<S: StateStore> CheckpointManager<S> {
    /// A manager with an empty pipeline (plain serialized payloads).
    pub fn new(store: S) -> Self {
        Self {
            store,
            serializer: StateSerializer,
            pipeline: PayloadPipeline::new(),
            retain_versions: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: PayloadPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_retained_versions(mut self, retain_versions: Option<u32>) -> Self {
        self.retain_versions = retain_versions;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pipeline(&self) -> &PayloadPipeline {
        &self.pipeline
    }

    /// Persist `state` as the latest checkpoint of a run.
    ///
    /// `workflow_id` and `run_id` override the corresponding metadata fields.
    /// The returned metadata carries the stored payload size.
    pub async fn save(
        &self,
        workflow_id: &str,
        run_id: Uuid,
        state: &HashMap<String, StateValue>,
        mut metadata: WorkflowStateMetadata,
    ) -> Result<WorkflowStateMetadata, StateError> {
        let serialized = self.serializer.serialize(state)?;
        let payload = self.pipeline.encode(serialized)?;

        metadata.workflow_id = workflow_id.to_string();
        metadata.run_id = run_id;
        metadata.size_bytes = payload.len() as u64;
        metadata.updated_at = Utc::now();

        let stored = self
            .store
            .put(StoredState { metadata, payload }, self.retain_versions)
            .await?;

        tracing::debug!(
            run_id = %run_id,
            workflow_id,
            status = %stored.status,
            sequence = stored.sequence,
            size_bytes = stored.size_bytes,
            "checkpoint saved"
        );
        Ok(stored)
    }

    /// Load the latest checkpoint of a run, if any.
    pub async fn load(&self, workflow_id: &str, run_id: Uuid) -> Result<Option<LoadedState>, StateError> {
        match self.store.get(workflow_id, &run_id).await? {
            Some(stored) => self.decode(stored).map(Some),
            None => Ok(None),
        }
    }

    /// Load a specific retained version.
    pub async fn load_version(
        &self,
        workflow_id: &str,
        run_id: Uuid,
        version: u64,
    ) -> Result<Option<LoadedState>, StateError> {
        match self.store.get_version(workflow_id, &run_id, version).await? {
            Some(stored) => self.decode(stored).map(Some),
            None => Ok(None),
        }
    }

    fn decode(&self, stored: StoredState) -> Result<LoadedState, StateError> {
        let bytes = self.pipeline.decode(stored.payload)?;
        let state = self.serializer.deserialize(&bytes)?;
        Ok(LoadedState {
            state,
            metadata: stored.metadata,
        })
    }

    pub async fn exists(&self, workflow_id: &str, run_id: Uuid) -> Result<bool, StateError> {
        Ok(self.store.exists(workflow_id, &run_id).await?)
    }

    pub async fn delete(&self, workflow_id: &str, run_id: Uuid) -> Result<bool, StateError> {
        Ok(self.store.delete(workflow_id, &run_id).await?)
    }

    pub async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Uuid>, StateError> {
        Ok(self.store.list_runs(workflow_id).await?)
    }

    pub async fn list_versions(&self, workflow_id: &str, run_id: Uuid) -> Result<Vec<CheckpointVersion>, StateError> {
        Ok(self.store.list_versions(workflow_id, &run_id).await?)
    }

    pub async fn get_metadata(
        &self,
        workflow_id: &str,
        run_id: Uuid,
    ) -> Result<Option<WorkflowStateMetadata>, StateError> {
        Ok(self.store.get_metadata(workflow_id, &run_id).await?)
    }

    /// Replace metadata without touching the payload.
    pub async fn update_metadata(&self, metadata: &WorkflowStateMetadata) -> Result<(), StateError> {
        Ok(self.store.update_metadata(metadata).await?)
    }

    pub async fn cleanup_older_than(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<RunStatus>,
    ) -> Result<u64, StateError> {
        let removed = self.store.cleanup_older_than(cutoff, status).await?;
        if removed > 0 {
            tracing::info!(removed, "removed old checkpoints");
        }
        Ok(removed)
    }

    pub async fn statistics(&self) -> Result<StoreStatistics, StateError> {
        Ok(self.store.statistics().await?)
    }
}
