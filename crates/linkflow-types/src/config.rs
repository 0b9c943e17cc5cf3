//! Engine configuration types for linkflow.
//!
//! `EngineConfig` represents the top-level `linkflow.toml`. Every field has a
//! default, so an empty file (or no file at all) yields a working engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::RunStatus;
use crate::workflow::RetryPolicy;

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Default retry policy for blocks that do not declare one.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub errors: ErrorHandlingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Checkpointing
// ---------------------------------------------------------------------------

/// When the executor persists checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFrequency {
    /// No checkpoint calls at all.
    Never,
    /// Save after every resolved transition.
    #[default]
    AfterEachBlock,
    /// Save only when the run stops (completed, failed, cancelled or suspended).
    OnErrorOrCompletion,
}

impl CheckpointFrequency {
    /// Whether a checkpoint should be written for a run in `status`.
    pub fn should_save(&self, status: RunStatus) -> bool {
        match self {
            CheckpointFrequency::Never => false,
            CheckpointFrequency::AfterEachBlock => true,
            CheckpointFrequency::OnErrorOrCompletion => {
                status.is_terminal() || status == RunStatus::Suspended
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub frequency: CheckpointFrequency,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Keep this many payload versions per run (None = overwrite in place).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_versions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Payloads smaller than this are stored uncompressed.
    #[serde(default = "default_compression_threshold")]
    pub threshold_bytes: usize,
    /// Gzip level 0-9.
    #[serde(default = "default_compression_level")]
    pub level: u32,
}

fn default_true() -> bool {
    true
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_compression_level() -> u32 {
    6
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: default_compression_threshold(),
            level: default_compression_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Identifier of the key used for new checkpoints.
    #[serde(default = "default_key_id")]
    pub key_id: String,
}

fn default_key_id() -> String {
    "default".to_string()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_id: default_key_id(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Error contexts idle for longer than this are swept (default 1 hour).
    #[serde(default = "default_error_context_max_age_secs")]
    pub error_context_max_age_secs: u64,
    /// Interval for the background sweeper (default 5 minutes).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_error_context_max_age_secs() -> u64 {
    3_600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            error_context_max_age_secs: default_error_context_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ErrorHandlingConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.error_context_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Waits longer than this suspend the run instead of sleeping in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_threshold_secs: Option<u64>,
    /// Upper bound on block invocations per run, to stop transition cycles.
    #[serde(default = "default_max_steps")]
    pub max_steps_per_run: u32,
}

fn default_max_steps() -> u32 {
    10_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            suspend_threshold_secs: None,
            max_steps_per_run: default_max_steps(),
        }
    }
}

impl ExecutionConfig {
    pub fn suspend_threshold(&self) -> Option<Duration> {
        self.suspend_threshold_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Storage and logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite URL; the data directory default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            otel: false,
        }
    }
}
