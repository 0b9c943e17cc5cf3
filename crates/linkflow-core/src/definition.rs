//! Chain integrity validation for workflow definitions.
//!
//! Runs once before a definition is executed: the start block must exist,
//! every non-empty transition must name a declared block, and retry
//! policies must be sane. Block types and guard configurations are checked
//! later, when the engine resolves them against its registries.

use linkflow_types::workflow::{GuardDefinition, RetryPolicy, WorkflowDefinition};
use thiserror::Error;

use crate::guard::GuardBuildError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("workflow id must not be empty")]
    MissingId,

    #[error("workflow '{0}' declares no blocks")]
    NoBlocks(String),

    #[error("start block '{0}' is not declared")]
    UnknownStartBlock(String),

    #[error("block declared under key '{key}' is named '{name}'")]
    NameMismatch { key: String, name: String },

    #[error("block '{block}' has {edge} transition to undeclared block '{target}'")]
    DanglingTransition {
        block: String,
        edge: &'static str,
        target: String,
    },

    #[error("guards declared for undeclared block '{0}'")]
    GuardsForUnknownBlock(String),

    #[error("guard '{guard}' redirects to undeclared block '{target}'")]
    DanglingGuardTransition { guard: String, target: String },

    #[error("guard '{guard}' is invalid: {source}")]
    InvalidGuard {
        guard: String,
        #[source]
        source: GuardBuildError,
    },

    #[error("block '{block}' has unknown type '{block_type}'")]
    UnknownBlockType { block: String, block_type: String },

    #[error("block '{block}' could not be created: {reason}")]
    BlockCreation { block: String, reason: String },

    #[error("block '{block}' has an invalid retry policy: {reason}")]
    InvalidRetryPolicy { block: String, reason: String },
}

/// Check the structural invariants of a definition.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if definition.id.trim().is_empty() {
        return Err(DefinitionError::MissingId);
    }
    if definition.blocks.is_empty() {
        return Err(DefinitionError::NoBlocks(definition.id.clone()));
    }
    if !definition.blocks.contains_key(&definition.start_block) {
        return Err(DefinitionError::UnknownStartBlock(
            definition.start_block.clone(),
        ));
    }

    for (key, block) in &definition.blocks {
        if *key != block.name {
            return Err(DefinitionError::NameMismatch {
                key: key.clone(),
                name: block.name.clone(),
            });
        }

        let edges = [
            ("success", Some(block.next_on_success.as_str())),
            ("failure", Some(block.next_on_failure.as_str())),
            ("skip", block.next_on_skip.as_deref()),
        ];
        for (edge, target) in edges {
            let Some(target) = target.filter(|t| !t.is_empty()) else {
                continue;
            };
            if !definition.blocks.contains_key(target) {
                return Err(DefinitionError::DanglingTransition {
                    block: block.name.clone(),
                    edge,
                    target: target.to_string(),
                });
            }
        }

        if let Some(policy) = &block.retry {
            validate_retry_policy(policy).map_err(|reason| DefinitionError::InvalidRetryPolicy {
                block: block.name.clone(),
                reason,
            })?;
        }
    }

    for block in definition.block_guards.keys() {
        if !definition.blocks.contains_key(block) {
            return Err(DefinitionError::GuardsForUnknownBlock(block.clone()));
        }
    }

    let all_guards = definition
        .global_guards
        .iter()
        .chain(definition.block_guards.values().flatten());
    for guard in all_guards {
        validate_guard_transition(definition, guard)?;
    }

    Ok(())
}

fn validate_guard_transition(
    definition: &WorkflowDefinition,
    guard: &GuardDefinition,
) -> Result<(), DefinitionError> {
    match guard.failure_transition.as_deref() {
        Some(target) if !target.is_empty() && !definition.blocks.contains_key(target) => {
            Err(DefinitionError::DanglingGuardTransition {
                guard: guard.name.clone(),
                target: target.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Reject policies whose delays could never be honoured.
pub fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), String> {
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(format!("multiplier must be >= 1.0, got {}", policy.multiplier));
    }
    if policy.initial_delay_ms > policy.max_delay_ms {
        return Err(format!(
            "initial delay {}ms exceeds max delay {}ms",
            policy.initial_delay_ms, policy.max_delay_ms
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkflow_types::workflow::{BlockDefinition, GuardConfig};

    fn valid() -> WorkflowDefinition {
        WorkflowDefinition::new("payment", "1", "validate")
            .with_block(
                BlockDefinition::new("validate", "validator")
                    .on_success("charge")
                    .on_failure("reject"),
            )
            .with_block(BlockDefinition::new("charge", "charge"))
            .with_block(BlockDefinition::new("reject", "notify"))
    }

    fn required(name: &str) -> GuardDefinition {
        GuardDefinition::new(name, GuardConfig::RequiredFields { fields: vec!["x".into()] })
    }

    #[test]
    fn test_valid_definition() {
        assert_eq!(validate_definition(&valid()), Ok(()));
    }

    #[test]
    fn test_unknown_start_block() {
        let mut def = valid();
        def.start_block = "nope".into();
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::UnknownStartBlock("nope".into()))
        );
    }

    #[test]
    fn test_empty_definition() {
        let def = WorkflowDefinition::new("payment", "1", "a");
        assert!(matches!(validate_definition(&def), Err(DefinitionError::NoBlocks(_))));
        let def = WorkflowDefinition::new(" ", "1", "a");
        assert_eq!(validate_definition(&def), Err(DefinitionError::MissingId));
    }

    #[test]
    fn test_dangling_transitions() {
        let def = valid().with_block(BlockDefinition::new("charge", "charge").on_failure("refund"));
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::DanglingTransition {
                block: "charge".into(),
                edge: "failure",
                target: "refund".into(),
            })
        );

        let def = valid().with_block(BlockDefinition::new("charge", "charge").on_skip("ghost"));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::DanglingTransition { edge: "skip", .. })
        ));
    }

    #[test]
    fn test_name_mismatch() {
        let mut def = valid();
        def.blocks
            .insert("alias".into(), BlockDefinition::new("real", "x"));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::NameMismatch { .. })
        ));
    }

    #[test]
    fn test_guard_targets() {
        let def = valid().with_block_guard("ghost", required("g"));
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::GuardsForUnknownBlock("ghost".into()))
        );

        let def = valid().with_global_guard(required("g").redirect_to("manual-review"));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::DanglingGuardTransition { .. })
        ));

        let def = valid().with_block_guard("charge", required("g").redirect_to("reject"));
        assert_eq!(validate_definition(&def), Ok(()));
    }

    #[test]
    fn test_retry_policy_validation() {
        let bad = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        };
        let def = valid().with_block(BlockDefinition::new("charge", "charge").with_retry(bad));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::InvalidRetryPolicy { .. })
        ));

        let inverted = RetryPolicy {
            initial_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..RetryPolicy::default()
        };
        assert!(validate_retry_policy(&inverted).is_err());
        assert!(validate_retry_policy(&RetryPolicy::default()).is_ok());
    }
}
