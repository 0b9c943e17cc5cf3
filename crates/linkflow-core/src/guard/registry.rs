//! Builds guards from their declarative configuration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use linkflow_types::workflow::{GuardConfig, GuardDefinition};

use super::builtin::{
    AuthorizationGuard, BusinessHoursGuard, NumericRangeGuard, PatternGuard, RequiredFieldsGuard,
};
use super::{ConfiguredGuard, Guard, GuardBuildError};

/// Creates a custom guard from its `params` table.
pub trait GuardFactory: Send + Sync {
    fn create(&self, params: &BTreeMap<String, serde_json::Value>) -> Result<Arc<dyn Guard>, GuardBuildError>;
}

impl<F> GuardFactory for F
where
    F: Fn(&BTreeMap<String, serde_json::Value>) -> Result<Arc<dyn Guard>, GuardBuildError> + Send + Sync,
{
    fn create(&self, params: &BTreeMap<String, serde_json::Value>) -> Result<Arc<dyn Guard>, GuardBuildError> {
        self(params)
    }
}

/// Maps guard configurations to guard instances.
///
/// Built-in kinds are always available; custom kinds must be registered
/// before a definition referencing them is prepared.
#[derive(Clone, Default)]
pub struct GuardRegistry {
    custom: HashMap<String, Arc<dyn GuardFactory>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `GuardConfig::Custom { type = guard_type }`.
    pub fn register(&mut self, guard_type: impl Into<String>, factory: impl GuardFactory + 'static) {
        self.custom.insert(guard_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, guard_type: &str) -> bool {
        self.custom.contains_key(guard_type)
    }

    pub fn build(&self, config: &GuardConfig) -> Result<Arc<dyn Guard>, GuardBuildError> {
        let guard: Arc<dyn Guard> = match config {
            GuardConfig::BusinessHours {
                timezone,
                start_hour,
                end_hour,
                days,
                holidays,
            } => Arc::new(BusinessHoursGuard::new(
                timezone,
                *start_hour,
                *end_hour,
                days.clone(),
                holidays.clone(),
            )?),
            GuardConfig::RequiredFields { fields } => Arc::new(RequiredFieldsGuard::new(fields.clone())),
            GuardConfig::Pattern {
                field,
                pattern,
                allow_missing,
            } => Arc::new(PatternGuard::new(field.clone(), pattern, *allow_missing)?),
            GuardConfig::NumericRange {
                field,
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => Arc::new(NumericRangeGuard::new(
                field.clone(),
                *min,
                *max,
                *min_inclusive,
                *max_inclusive,
            )?),
            GuardConfig::Authorization { permission, roles } => {
                Arc::new(AuthorizationGuard::new(permission.clone(), roles.clone()))
            }
            GuardConfig::Custom { guard_type, params } => {
                let factory = self
                    .custom
                    .get(guard_type)
                    .ok_or_else(|| GuardBuildError::UnknownType(guard_type.clone()))?;
                factory.create(params)?
            }
        };
        Ok(guard)
    }

    /// Build the guard for a declaration and attach its phase and severity.
    pub fn configure(&self, definition: &GuardDefinition) -> Result<ConfiguredGuard, GuardBuildError> {
        let guard = self.build(&definition.config)?;
        Ok(ConfiguredGuard::new(definition, guard))
    }
}

impl std::fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.custom.keys().collect();
        kinds.sort();
        f.debug_struct("GuardRegistry")
            .field("custom", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::guard::{FnGuard, GuardViolation};
    use linkflow_types::value::StateValue;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_builds_builtin_kinds() {
        let registry = GuardRegistry::new();
        let guard = registry
            .build(&GuardConfig::NumericRange {
                field: "amount".into(),
                min: Some(1.0),
                max: None,
                min_inclusive: true,
                max_inclusive: true,
            })
            .unwrap();
        let mut ctx = ExecutionContext::new("wf", "1", Uuid::now_v7(), StateValue::Null);
        ctx.set_state("amount", 0i64);
        assert!(guard.check(&ctx).is_err());
    }

    #[test]
    fn test_invalid_builtin_config_is_rejected() {
        let registry = GuardRegistry::new();
        let result = registry.build(&GuardConfig::Pattern {
            field: "x".into(),
            pattern: "[unclosed".into(),
            allow_missing: false,
        });
        assert!(matches!(result, Err(GuardBuildError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_custom_type() {
        let registry = GuardRegistry::new();
        let result = registry.build(&GuardConfig::Custom {
            guard_type: "fraud-score".into(),
            params: BTreeMap::new(),
        });
        assert_eq!(
            result.err(),
            Some(GuardBuildError::UnknownType("fraud-score".into()))
        );
    }

    #[test]
    fn test_custom_factory_receives_params() {
        let mut registry = GuardRegistry::new();
        registry.register(
            "max-items",
            |params: &BTreeMap<String, serde_json::Value>| -> Result<Arc<dyn Guard>, GuardBuildError> {
                let limit = params
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| GuardBuildError::InvalidConfig("limit is required".into()))?;
                let guard: Arc<dyn Guard> = Arc::new(FnGuard::new(move |ctx: &ExecutionContext| {
                    let count = ctx.get_state("items").and_then(|v| v.as_list()).map_or(0, |l| l.len());
                    if (count as u64) <= limit {
                        Ok(())
                    } else {
                        Err(GuardViolation::new("too many items").on_field("items"))
                    }
                }));
                Ok(guard)
            },
        );
        assert!(registry.contains("max-items"));

        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), json!(1));
        let def = GuardDefinition::new(
            "item-cap",
            GuardConfig::Custom {
                guard_type: "max-items".into(),
                params,
            },
        );
        let configured = registry.configure(&def).unwrap();

        let mut ctx = ExecutionContext::new("wf", "1", Uuid::now_v7(), StateValue::Null);
        ctx.set_state("items", vec![1i64, 2]);
        let result = configured.evaluate(&ctx);
        assert!(!result.passed);
        assert_eq!(result.guard, "item-cap");

        let missing_param = GuardDefinition::new(
            "broken",
            GuardConfig::Custom {
                guard_type: "max-items".into(),
                params: BTreeMap::new(),
            },
        );
        assert!(registry.configure(&missing_param).is_err());
    }
}
