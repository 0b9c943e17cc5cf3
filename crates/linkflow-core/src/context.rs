//! Per-run execution context.
//!
//! `ExecutionContext` is the mutable state that flows through a workflow run:
//! the key/value state dictionary, the run input, block outputs and run
//! metadata. Exactly one task drives a run, so the context is owned and
//! passed by `&mut` rather than shared behind a lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use linkflow_types::block::BlockError;
use linkflow_types::state::WorkflowStateMetadata;
use linkflow_types::value::StateValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State key holding the caller's permissions (list of strings).
pub const AUTH_PERMISSIONS_KEY: &str = "auth.permissions";
/// State key holding the caller's roles (list of strings).
pub const AUTH_ROLES_KEY: &str = "auth.roles";

/// Prefix under which field lookups resolve the latest block output.
const OUTPUT_PREFIX: &str = "output";
/// Prefix under which field lookups resolve the run input.
const INPUT_PREFIX: &str = "input";

// Keys used in checkpoint metadata `custom` for run-level values.
const META_INPUT: &str = "input";
const META_STARTED_AT: &str = "started_at";
const META_STEP_COUNT: &str = "step_count";

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    workflow_id: String,
    workflow_version: String,
    started_at: DateTime<Utc>,
    input: StateValue,
    state: HashMap<String, StateValue>,
    outputs: HashMap<String, StateValue>,
    last_output: Option<StateValue>,
    current_block: String,
    step_count: u32,
    sequence: u64,
    checkpointed: bool,
    cancel_token: CancellationToken,
}

impl ExecutionContext {
    /// Create a context for a fresh run.
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_version: impl Into<String>,
        run_id: Uuid,
        input: StateValue,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            workflow_version: workflow_version.into(),
            started_at: Utc::now(),
            input,
            state: HashMap::new(),
            outputs: HashMap::new(),
            last_output: None,
            current_block: String::new(),
            step_count: 0,
            sequence: 0,
            checkpointed: false,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token for this run.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn workflow_version(&self) -> &str {
        &self.workflow_version
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn input(&self) -> &StateValue {
        &self.input
    }

    /// Name of the block being (or about to be) executed.
    pub fn current_block(&self) -> &str {
        &self.current_block
    }

    pub(crate) fn set_current_block(&mut self, block: impl Into<String>) {
        self.current_block = block.into();
    }

    /// Number of block invocations so far in this run, across resumptions.
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub(crate) fn increment_step(&mut self) -> u32 {
        self.step_count += 1;
        self.step_count
    }

    /// Sequence of the last checkpoint written for this run.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Whether at least one checkpoint was persisted for this run.
    pub fn has_checkpoint(&self) -> bool {
        self.checkpointed
    }

    pub(crate) fn mark_checkpointed(&mut self) {
        self.checkpointed = true;
    }

    // -----------------------------------------------------------------------
    // State dictionary
    // -----------------------------------------------------------------------

    /// Insert or overwrite a state entry.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.state.insert(key.into(), value.into());
    }

    /// Borrow a state entry.
    pub fn get_state(&self, key: &str) -> Option<&StateValue> {
        self.state.get(key)
    }

    /// Clone a state entry, falling back to `default` when missing.
    pub fn get_state_or(&self, key: &str, default: impl Into<StateValue>) -> StateValue {
        match self.state.get(key) {
            Some(value) => value.clone(),
            None => default.into(),
        }
    }

    /// Decode a state entry into any deserializable type.
    ///
    /// Returns `None` when the key is missing or the value does not fit `T`.
    pub fn get_state_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.state.get(key)?;
        serde_json::from_value(value.to_json()).ok()
    }

    pub fn contains_state(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    /// Remove an entry, reporting whether it existed.
    pub fn remove_state(&mut self, key: &str) -> bool {
        self.state.remove(key).is_some()
    }

    pub fn state_len(&self) -> usize {
        self.state.len()
    }

    /// Copy of the entire state dictionary.
    pub fn snapshot(&self) -> HashMap<String, StateValue> {
        self.state.clone()
    }

    /// Replace the state dictionary with `state` (clear, then copy).
    pub fn restore(&mut self, state: HashMap<String, StateValue>) {
        self.state.clear();
        self.state.extend(state);
    }

    // -----------------------------------------------------------------------
    // Outputs and field lookup
    // -----------------------------------------------------------------------

    pub(crate) fn record_output(&mut self, block: &str, output: StateValue) {
        self.outputs.insert(block.to_string(), output.clone());
        self.last_output = Some(output);
    }

    /// Output of the most recent successful block, if it produced one.
    pub fn last_output(&self) -> Option<&StateValue> {
        self.last_output.as_ref()
    }

    pub fn output_of(&self, block: &str) -> Option<&StateValue> {
        self.outputs.get(block)
    }

    /// Resolve a field reference used by guards.
    ///
    /// `output.<path>` reads the latest block output and `input.<path>` the run
    /// input. Anything else is tried as a literal state key first, then as a
    /// state key followed by a dotted path into its value.
    pub fn lookup(&self, path: &str) -> Option<&StateValue> {
        if let Some(rest) = strip_segment(path, OUTPUT_PREFIX) {
            return self.last_output.as_ref()?.get_path(rest);
        }
        if let Some(rest) = strip_segment(path, INPUT_PREFIX) {
            return self.input.get_path(rest);
        }
        if let Some(value) = self.state.get(path) {
            return Some(value);
        }
        path.match_indices('.').find_map(|(idx, _)| {
            self.state
                .get(&path[..idx])
                .and_then(|value| value.get_path(&path[idx + 1..]))
        })
    }

    /// Permissions granted to the caller of this run.
    pub fn permissions(&self) -> Vec<String> {
        self.string_list(AUTH_PERMISSIONS_KEY)
    }

    /// Roles held by the caller of this run.
    pub fn roles(&self) -> Vec<String> {
        self.string_list(AUTH_ROLES_KEY)
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        match self.lookup(key) {
            Some(StateValue::List(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(StateValue::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Return `BlockError::Cancelled` once the run has been asked to stop.
    pub fn check_cancelled(&self) -> Result<(), BlockError> {
        if self.cancel_token.is_cancelled() {
            Err(BlockError::Cancelled)
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn to_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            run_id: self.run_id,
            workflow_id: self.workflow_id.clone(),
            workflow_version: self.workflow_version.clone(),
            started_at: self.started_at,
            current_block: self.current_block.clone(),
            step_count: self.step_count,
            sequence: self.sequence,
            input: self.input.clone(),
            state: self.state.clone(),
        }
    }

    /// Rebuild a context from a snapshot, e.g. when resuming a run.
    pub fn from_snapshot(snapshot: ContextSnapshot, cancel_token: CancellationToken) -> Self {
        Self {
            run_id: snapshot.run_id,
            workflow_id: snapshot.workflow_id,
            workflow_version: snapshot.workflow_version,
            started_at: snapshot.started_at,
            input: snapshot.input,
            state: snapshot.state,
            outputs: HashMap::new(),
            last_output: None,
            current_block: snapshot.current_block,
            step_count: snapshot.step_count,
            sequence: snapshot.sequence,
            checkpointed: true,
            cancel_token,
        }
    }
}

fn strip_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('.')
    }
}

// ---------------------------------------------------------------------------
// ContextSnapshot
// ---------------------------------------------------------------------------

/// Everything needed to continue a run from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_version: String,
    pub started_at: DateTime<Utc>,
    pub current_block: String,
    pub step_count: u32,
    pub sequence: u64,
    pub input: StateValue,
    pub state: HashMap<String, StateValue>,
}

impl ContextSnapshot {
    /// Write run-level values into checkpoint metadata.
    ///
    /// The state dictionary itself travels as the checkpoint payload.
    pub fn annotate(&self, metadata: &mut WorkflowStateMetadata) {
        metadata.current_block = self.current_block.clone();
        metadata.sequence = self.sequence;
        if let Ok(input) = serde_json::to_value(&self.input) {
            metadata.custom.insert(META_INPUT.to_string(), input);
        }
        metadata.custom.insert(
            META_STARTED_AT.to_string(),
            serde_json::Value::String(self.started_at.to_rfc3339()),
        );
        metadata
            .custom
            .insert(META_STEP_COUNT.to_string(), serde_json::Value::from(self.step_count));
    }

    /// Reassemble a snapshot from a loaded payload and its metadata.
    ///
    /// Missing run-level entries fall back to neutral values so that
    /// checkpoints written by other tools can still be resumed.
    pub fn from_checkpoint(
        state: HashMap<String, StateValue>,
        metadata: &WorkflowStateMetadata,
    ) -> Self {
        let input = metadata
            .custom
            .get(META_INPUT)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let started_at = metadata
            .custom
            .get(META_STARTED_AT)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(metadata.updated_at);
        let step_count = metadata
            .custom
            .get(META_STEP_COUNT)
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        Self {
            run_id: metadata.run_id,
            workflow_id: metadata.workflow_id.clone(),
            workflow_version: metadata.workflow_version.clone(),
            started_at,
            current_block: metadata.current_block.clone(),
            step_count,
            sequence: metadata.sequence,
            input,
            state,
        }
    }
}
