//! Guards: validation rules evaluated around block execution.
//!
//! A [`Guard`] is a pure check over the execution context. The definition
//! wraps each one in a [`ConfiguredGuard`] that adds name, phase, severity
//! and an optional redirect target; [`evaluate_guards`] runs an ordered list
//! and stops at the first halting failure.

pub mod builtin;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use linkflow_types::workflow::{GuardDefinition, GuardPhase, GuardSeverity};
use serde::Serialize;
use thiserror::Error;

use crate::context::ExecutionContext;

pub use builtin::{
    AuthorizationGuard, BusinessHoursGuard, FnGuard, NumericRangeGuard, PatternGuard,
    RequiredFieldsGuard,
};
pub use registry::{GuardFactory, GuardRegistry};

// ---------------------------------------------------------------------------
// Guard trait
// ---------------------------------------------------------------------------

/// A validation rule over the execution context.
///
/// Guards are synchronous and side-effect free; they must not mutate the
/// context or block on I/O.
pub trait Guard: Send + Sync {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), GuardViolation>;
}

/// Why a guard rejected the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardViolation {
    pub message: String,
    /// The field that failed, for field-level guards.
    pub field: Option<String>,
    /// Diagnostic values (bounds, missing fields, current time, ...).
    pub details: HashMap<String, serde_json::Value>,
}

impl GuardViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
            details: HashMap::new(),
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while building a guard from its configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardBuildError {
    #[error("unknown guard type '{0}'")]
    UnknownType(String),

    #[error("invalid guard configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Configured guards and results
// ---------------------------------------------------------------------------

/// A built guard together with its declaration.
#[derive(Clone)]
pub struct ConfiguredGuard {
    pub name: String,
    pub phase: GuardPhase,
    pub severity: GuardSeverity,
    pub failure_transition: Option<String>,
    guard: Arc<dyn Guard>,
}

impl ConfiguredGuard {
    pub fn new(definition: &GuardDefinition, guard: Arc<dyn Guard>) -> Self {
        Self {
            name: definition.name.clone(),
            phase: definition.phase,
            severity: definition.severity,
            failure_transition: definition.failure_transition.clone(),
            guard,
        }
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> GuardResult {
        match self.guard.check(ctx) {
            Ok(()) => GuardResult {
                guard: self.name.clone(),
                passed: true,
                severity: self.severity,
                failure_transition: None,
                violation: None,
            },
            Err(violation) => GuardResult {
                guard: self.name.clone(),
                passed: false,
                severity: self.severity,
                failure_transition: self.failure_transition.clone(),
                violation: Some(violation),
            },
        }
    }
}

impl std::fmt::Debug for ConfiguredGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredGuard")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("severity", &self.severity)
            .field("failure_transition", &self.failure_transition)
            .finish()
    }
}

/// Outcome of evaluating one guard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardResult {
    pub guard: String,
    pub passed: bool,
    pub severity: GuardSeverity,
    /// Redirect target declared on the guard, set only on failure.
    pub failure_transition: Option<String>,
    pub violation: Option<GuardViolation>,
}

impl GuardResult {
    /// A failed result that should stop the block's normal transition.
    pub fn is_halting(&self) -> bool {
        !self.passed && self.severity.is_halting()
    }

    pub fn message(&self) -> String {
        match &self.violation {
            Some(v) => format!("guard '{}' failed: {}", self.guard, v.message),
            None => format!("guard '{}' passed", self.guard),
        }
    }
}

/// Aggregate over an ordered guard list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuardEvaluation {
    /// Guards that ran, in order.
    pub evaluated: Vec<String>,
    /// Non-halting failures (info and warning severity).
    pub warnings: Vec<GuardResult>,
    /// The first halting failure, which stopped evaluation.
    pub failure: Option<GuardResult>,
}

impl GuardEvaluation {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Evaluate `guards` in order, stopping at the first halting failure.
pub fn evaluate_guards<'a>(
    guards: impl IntoIterator<Item = &'a ConfiguredGuard>,
    ctx: &ExecutionContext,
) -> GuardEvaluation {
    let mut evaluation = GuardEvaluation::default();
    for guard in guards {
        let result = guard.evaluate(ctx);
        evaluation.evaluated.push(guard.name.clone());
        if result.passed {
            continue;
        }
        if result.is_halting() {
            evaluation.failure = Some(result);
            break;
        }
        evaluation.warnings.push(result);
    }
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkflow_types::value::StateValue;
    use linkflow_types::workflow::GuardConfig;
    use uuid::Uuid;

    fn configured(name: &str, severity: GuardSeverity, pass: bool) -> ConfiguredGuard {
        let def = GuardDefinition::new(
            name,
            GuardConfig::RequiredFields { fields: Vec::new() },
        )
        .with_severity(severity);
        let guard = FnGuard::new(move |_ctx| {
            if pass {
                Ok(())
            } else {
                Err(GuardViolation::new("rejected"))
            }
        });
        ConfiguredGuard::new(&def, Arc::new(guard))
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("wf", "1", Uuid::now_v7(), StateValue::Null)
    }

    #[test]
    fn test_all_pass() {
        let guards = vec![
            configured("a", GuardSeverity::Error, true),
            configured("b", GuardSeverity::Critical, true),
        ];
        let eval = evaluate_guards(&guards, &ctx());
        assert!(eval.passed());
        assert_eq!(eval.evaluated, vec!["a", "b"]);
    }

    #[test]
    fn test_warnings_accumulate_and_do_not_halt() {
        let guards = vec![
            configured("w1", GuardSeverity::Warning, false),
            configured("i1", GuardSeverity::Info, false),
            configured("ok", GuardSeverity::Error, true),
        ];
        let eval = evaluate_guards(&guards, &ctx());
        assert!(eval.passed());
        assert!(eval.has_warnings());
        assert_eq!(eval.warnings.len(), 2);
        assert_eq!(eval.evaluated.len(), 3);
    }

    #[test]
    fn test_stops_at_first_halting_failure() {
        let guards = vec![
            configured("first", GuardSeverity::Error, false),
            configured("second", GuardSeverity::Critical, false),
        ];
        let eval = evaluate_guards(&guards, &ctx());
        assert!(!eval.passed());
        assert_eq!(eval.failure.as_ref().unwrap().guard, "first");
        assert_eq!(eval.evaluated, vec!["first"]);
    }

    #[test]
    fn test_failure_carries_redirect() {
        let def = GuardDefinition::new("limit", GuardConfig::RequiredFields { fields: vec![] })
            .redirect_to("manual-review");
        let guard = ConfiguredGuard::new(
            &def,
            Arc::new(FnGuard::new(|_| Err(GuardViolation::new("too large").on_field("amount")))),
        );
        let result = guard.evaluate(&ctx());
        assert!(result.is_halting());
        assert_eq!(result.failure_transition.as_deref(), Some("manual-review"));
        assert_eq!(
            result.violation.as_ref().and_then(|v| v.field.as_deref()),
            Some("amount")
        );
        assert!(result.message().contains("too large"));
    }
}
