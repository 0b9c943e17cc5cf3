//! Workflow domain types for linkflow.
//!
//! A workflow is a chain of named blocks. Each block names its successor on
//! success and on failure; edges are plain strings resolved at run time, and
//! an empty name terminates the chain. Guards and retry policies hang off the
//! definition so the engine can validate and execute it without knowing what
//! any block actually does.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{NaiveDate, Weekday};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::StateValue;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The parsed, read-only description of a workflow.
///
/// Produced by an external parser; the engine validates the chain invariants
/// (start block exists, every transition resolves) before running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable workflow identifier (e.g. "payment-approval").
    pub id: String,
    /// Version string recorded in every checkpoint.
    pub version: String,
    /// Name of the first block to execute.
    pub start_block: String,
    /// Blocks keyed by name, in declaration order.
    pub blocks: IndexMap<String, BlockDefinition>,
    /// Guards applied to every block, in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_guards: Vec<GuardDefinition>,
    /// Guards applied to a single block, keyed by block name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub block_guards: HashMap<String, Vec<GuardDefinition>>,
    /// Variables seeded into the context state at run start.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, StateValue>,
}

impl WorkflowDefinition {
    /// Start an empty definition. Blocks are added with [`with_block`](Self::with_block).
    pub fn new(id: impl Into<String>, version: impl Into<String>, start_block: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            start_block: start_block.into(),
            blocks: IndexMap::new(),
            global_guards: Vec::new(),
            block_guards: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Add a block, keyed by its own name.
    pub fn with_block(mut self, block: BlockDefinition) -> Self {
        self.blocks.insert(block.name.clone(), block);
        self
    }

    pub fn with_global_guard(mut self, guard: GuardDefinition) -> Self {
        self.global_guards.push(guard);
        self
    }

    pub fn with_block_guard(mut self, block: impl Into<String>, guard: GuardDefinition) -> Self {
        self.block_guards.entry(block.into()).or_default().push(guard);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
        self.blocks.get(name)
    }
}

// ---------------------------------------------------------------------------
// Block Definition
// ---------------------------------------------------------------------------

/// A single named block in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    /// Unique block name within the workflow.
    pub name: String,
    /// Type tag resolved to an executable unit by the block registry.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Next block on success. Empty means terminal.
    #[serde(default)]
    pub next_on_success: String,
    /// Next block on failure. Empty means the run fails.
    #[serde(default)]
    pub next_on_failure: String,
    /// Next block when a fault is classified as skippable. Falls back to
    /// `next_on_success` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_on_skip: Option<String>,
    /// Per-block retry policy (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Free-form configuration handed to the block factory.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl BlockDefinition {
    pub fn new(name: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block_type: block_type.into(),
            next_on_success: String::new(),
            next_on_failure: String::new(),
            next_on_skip: None,
            retry: None,
            config: BTreeMap::new(),
        }
    }

    pub fn on_success(mut self, next: impl Into<String>) -> Self {
        self.next_on_success = next.into();
        self
    }

    pub fn on_failure(mut self, next: impl Into<String>) -> Self {
        self.next_on_failure = next.into();
        self
    }

    pub fn on_skip(mut self, next: impl Into<String>) -> Self {
        self.next_on_skip = Some(next.into());
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// A block with no success and no failure transition ends the chain.
    pub fn is_terminal(&self) -> bool {
        self.next_on_success.is_empty() && self.next_on_failure.is_empty()
    }

    /// Transition taken when a fault is skipped.
    pub fn skip_target(&self) -> &str {
        self.next_on_skip
            .as_deref()
            .unwrap_or(self.next_on_success.as_str())
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// When a guard runs relative to its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPhase {
    #[default]
    Pre,
    Post,
    Both,
}

impl GuardPhase {
    pub fn runs_before(&self) -> bool {
        matches!(self, GuardPhase::Pre | GuardPhase::Both)
    }

    pub fn runs_after(&self) -> bool {
        matches!(self, GuardPhase::Post | GuardPhase::Both)
    }
}

/// Severity of a guard failure. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardSeverity {
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl GuardSeverity {
    /// Error and critical failures stop the block's normal transition.
    pub fn is_halting(&self) -> bool {
        matches!(self, GuardSeverity::Error | GuardSeverity::Critical)
    }
}

/// A guard declared on a workflow, either globally or for one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardDefinition {
    /// Guard name, reported in failures.
    pub name: String,
    #[serde(default)]
    pub phase: GuardPhase,
    #[serde(default)]
    pub severity: GuardSeverity,
    /// Explicit redirect target on a halting failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_transition: Option<String>,
    /// Which validator to build and its parameters.
    pub config: GuardConfig,
}

impl GuardDefinition {
    pub fn new(name: impl Into<String>, config: GuardConfig) -> Self {
        Self {
            name: name.into(),
            phase: GuardPhase::default(),
            severity: GuardSeverity::default(),
            failure_transition: None,
            config,
        }
    }

    pub fn with_phase(mut self, phase: GuardPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_severity(mut self, severity: GuardSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn redirect_to(mut self, target: impl Into<String>) -> Self {
        self.failure_transition = Some(target.into());
        self
    }
}

/// Built-in guard kinds plus an escape hatch for registered custom guards.
///
/// Internally tagged by `kind`:
/// ```toml
/// kind = "numeric_range"
/// field = "amount"
/// min = 0.0
/// max = 10000.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardConfig {
    /// Only allow execution inside a daily window on selected weekdays.
    BusinessHours {
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default = "default_start_hour")]
        start_hour: u32,
        #[serde(default = "default_end_hour")]
        end_hour: u32,
        #[serde(default = "default_business_days")]
        days: Vec<Weekday>,
        #[serde(default)]
        holidays: Vec<NaiveDate>,
    },
    /// Every listed field must be present and non-empty.
    RequiredFields { fields: Vec<String> },
    /// A field's text must match a regular expression.
    Pattern {
        field: String,
        pattern: String,
        #[serde(default)]
        allow_missing: bool,
    },
    /// A field must be numeric and within bounds.
    NumericRange {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default = "default_true")]
        min_inclusive: bool,
        #[serde(default = "default_true")]
        max_inclusive: bool,
    },
    /// The caller must hold a permission and, optionally, one of the roles.
    Authorization {
        permission: String,
        #[serde(default)]
        roles: Vec<String>,
    },
    /// A guard kind registered at runtime.
    Custom {
        #[serde(rename = "type")]
        guard_type: String,
        #[serde(default)]
        params: BTreeMap<String, serde_json::Value>,
    },
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    17
}

fn default_business_days() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// How a faulting block is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds (default 1000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any computed delay in milliseconds (default 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Growth factor for exponential backoff (default 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Function from attempt number to retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Immediate,
    Fixed,
    Linear,
    #[default]
    Exponential,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("payment", "1.0.0", "validate")
            .with_block(
                BlockDefinition::new("validate", "validator")
                    .on_success("payment")
                    .on_failure("reject"),
            )
            .with_block(BlockDefinition::new("payment", "charge"))
            .with_block(BlockDefinition::new("reject", "notify"))
    }

    #[test]
    fn test_blocks_keep_declaration_order() {
        let def = sample_definition();
        let names: Vec<&str> = def.blocks.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["validate", "payment", "reject"]);
    }

    #[test]
    fn test_terminal_block() {
        let def = sample_definition();
        assert!(!def.block("validate").unwrap().is_terminal());
        assert!(def.block("payment").unwrap().is_terminal());
    }

    #[test]
    fn test_skip_target_falls_back_to_success() {
        let block = BlockDefinition::new("a", "t").on_success("b");
        assert_eq!(block.skip_target(), "b");
        let block = block.on_skip("c");
        assert_eq!(block.skip_target(), "c");
    }

    #[test]
    fn test_definition_json_roundtrip() {
        let def = sample_definition()
            .with_variable("currency", "EUR")
            .with_global_guard(GuardDefinition::new(
                "has-amount",
                GuardConfig::RequiredFields {
                    fields: vec!["amount".to_string()],
                },
            ));
        let json = serde_json::to_string(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.blocks.len(), 3);
        assert_eq!(parsed.global_guards.len(), 1);
        assert_eq!(
            parsed.variables.get("currency"),
            Some(&StateValue::String("EUR".to_string()))
        );
    }

    #[test]
    fn test_block_type_serialized_as_type() {
        let block = BlockDefinition::new("a", "http");
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], json!("http"));
    }

    #[test]
    fn test_guard_config_defaults_from_toml() {
        let toml_str = r#"
name = "office-hours"
severity = "critical"

[config]
kind = "business_hours"
timezone = "Europe/Berlin"
holidays = ["2025-12-25"]
"#;
        let guard: GuardDefinition = toml::from_str(toml_str).unwrap();
        assert_eq!(guard.severity, GuardSeverity::Critical);
        assert_eq!(guard.phase, GuardPhase::Pre);
        match guard.config {
            GuardConfig::BusinessHours {
                timezone,
                start_hour,
                end_hour,
                days,
                holidays,
            } => {
                assert_eq!(timezone, "Europe/Berlin");
                assert_eq!(start_hour, 9);
                assert_eq!(end_hour, 17);
                assert_eq!(days.len(), 5);
                assert_eq!(holidays.len(), 1);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_numeric_range_bounds_default_inclusive() {
        let config: GuardConfig =
            serde_json::from_value(json!({ "kind": "numeric_range", "field": "amount", "max": 10.0 }))
                .unwrap();
        assert_eq!(
            config,
            GuardConfig::NumericRange {
                field: "amount".to_string(),
                min: None,
                max: Some(10.0),
                min_inclusive: true,
                max_inclusive: true,
            }
        );
    }

    #[test]
    fn test_severity_ordering_and_halting() {
        assert!(GuardSeverity::Critical > GuardSeverity::Error);
        assert!(GuardSeverity::Warning < GuardSeverity::Error);
        assert!(GuardSeverity::Error.is_halting());
        assert!(!GuardSeverity::Warning.is_halting());
        assert!(!GuardSeverity::Info.is_halting());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.initial_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(30));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
