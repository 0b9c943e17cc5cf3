//! In-process `StateStore` backed by a `DashMap`.
//!
//! Writes for one run go through the map's entry API, which holds the shard
//! lock for the duration of the admission check and the insert, so two
//! concurrent saves for the same key can never interleave.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use linkflow_types::error::RepositoryError;
use linkflow_types::state::{CheckpointVersion, RunStatus, StoreStatistics, WorkflowStateMetadata};
use uuid::Uuid;

use super::{StateStore, StoredState, check_write};

type RunKey = (String, Uuid);

#[derive(Debug)]
struct RunRecord {
    /// Oldest first; the back is the latest checkpoint.
    versions: VecDeque<(u64, StoredState)>,
    next_version: u64,
}

impl RunRecord {
    fn new(record: StoredState) -> Self {
        let mut versions = VecDeque::new();
        versions.push_back((1, record));
        Self {
            versions,
            next_version: 2,
        }
    }

    fn latest(&self) -> Option<&StoredState> {
        self.versions.back().map(|(_, state)| state)
    }

    fn push(&mut self, record: StoredState, retain_versions: Option<u32>) {
        let version = self.next_version;
        self.next_version += 1;
        self.versions.push_back((version, record));
        let keep = retain_versions.map_or(1, |n| n.max(1) as usize);
        while self.versions.len() > keep {
            self.versions.pop_front();
        }
    }
}

/// Volatile checkpoint store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    runs: DashMap<RunKey, RunRecord>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(workflow_id: &str, run_id: &Uuid) -> RunKey {
        (workflow_id.to_string(), *run_id)
    }
}

impl StateStore for InMemoryStateStore {
    async fn put(
        &self,
        record: StoredState,
        retain_versions: Option<u32>,
    ) -> Result<WorkflowStateMetadata, RepositoryError> {
        let key = Self::key(&record.metadata.workflow_id, &record.metadata.run_id);
        let metadata = record.metadata.clone();
        match self.runs.entry(key) {
            Entry::Occupied(mut entry) => {
                let run = entry.get_mut();
                if let Some(latest) = run.latest() {
                    check_write(&latest.metadata, &record.metadata)?;
                }
                run.push(record, retain_versions);
            }
            Entry::Vacant(entry) => {
                entry.insert(RunRecord::new(record));
            }
        }
        Ok(metadata)
    }

    async fn get(&self, workflow_id: &str, run_id: &Uuid) -> Result<Option<StoredState>, RepositoryError> {
        Ok(self
            .runs
            .get(&Self::key(workflow_id, run_id))
            .and_then(|run| run.latest().cloned()))
    }

    async fn get_version(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
        version: u64,
    ) -> Result<Option<StoredState>, RepositoryError> {
        Ok(self.runs.get(&Self::key(workflow_id, run_id)).and_then(|run| {
            run.versions
                .iter()
                .find(|(v, _)| *v == version)
                .map(|(_, state)| state.clone())
        }))
    }

    async fn list_versions(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> Result<Vec<CheckpointVersion>, RepositoryError> {
        Ok(self
            .runs
            .get(&Self::key(workflow_id, run_id))
            .map(|run| {
                run.versions
                    .iter()
                    .map(|(version, state)| CheckpointVersion {
                        version: *version,
                        sequence: state.metadata.sequence,
                        status: state.metadata.status,
                        size_bytes: state.metadata.size_bytes,
                        saved_at: state.metadata.updated_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn exists(&self, workflow_id: &str, run_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.runs.contains_key(&Self::key(workflow_id, run_id)))
    }

    async fn delete(&self, workflow_id: &str, run_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.runs.remove(&Self::key(workflow_id, run_id)).is_some())
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Uuid>, RepositoryError> {
        let mut runs: Vec<Uuid> = self
            .runs
            .iter()
            .filter(|entry| entry.key().0 == workflow_id)
            .map(|entry| entry.key().1)
            .collect();
        runs.sort();
        Ok(runs)
    }

    async fn get_metadata(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> Result<Option<WorkflowStateMetadata>, RepositoryError> {
        Ok(self
            .runs
            .get(&Self::key(workflow_id, run_id))
            .and_then(|run| run.latest().map(|state| state.metadata.clone())))
    }

    async fn update_metadata(&self, metadata: &WorkflowStateMetadata) -> Result<(), RepositoryError> {
        let mut run = self
            .runs
            .get_mut(&Self::key(&metadata.workflow_id, &metadata.run_id))
            .ok_or(RepositoryError::NotFound)?;
        let (_, latest) = run.versions.back_mut().ok_or(RepositoryError::NotFound)?;
        check_write(&latest.metadata, metadata)?;
        let size_bytes = latest.metadata.size_bytes;
        latest.metadata = metadata.clone();
        latest.metadata.size_bytes = size_bytes;
        Ok(())
    }

    async fn cleanup_older_than(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<RunStatus>,
    ) -> Result<u64, RepositoryError> {
        let before = self.runs.len();
        self.runs.retain(|_, run| match run.latest() {
            Some(latest) => {
                let old = latest.metadata.updated_at < cutoff;
                let matches = status.is_none_or(|s| latest.metadata.status == s);
                !(old && matches)
            }
            None => false,
        });
        Ok(before.saturating_sub(self.runs.len()) as u64)
    }

    async fn statistics(&self) -> Result<StoreStatistics, RepositoryError> {
        let mut stats = StoreStatistics::default();
        for entry in self.runs.iter() {
            let Some(latest) = entry.value().latest() else {
                continue;
            };
            stats.total_states += 1;
            stats.total_size_bytes += latest.metadata.size_bytes;
            match latest.metadata.status {
                RunStatus::Completed => stats.completed_count += 1,
                RunStatus::Failed => stats.failed_count += 1,
                s if s.is_active() => stats.active_count += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}
