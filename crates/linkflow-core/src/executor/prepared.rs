//! A definition resolved against the registries, ready to run.
//!
//! Preparation happens once per definition. After it succeeds the run loop
//! only does map lookups by block name; every block type, guard config and
//! transition target has already been checked.

use std::collections::HashMap;
use std::sync::Arc;

use linkflow_types::workflow::{BlockDefinition, GuardDefinition, RetryPolicy, WorkflowDefinition};

use crate::block::{BlockRegistry, BoxBlock};
use crate::definition::{validate_definition, DefinitionError};
use crate::guard::{ConfiguredGuard, GuardRegistry};

/// One block with its instance and guards.
#[derive(Debug, Clone)]
pub struct PreparedBlock {
    pub definition: BlockDefinition,
    pub block: BoxBlock,
    /// Global guards first, then block guards, in declaration order.
    pub pre_guards: Vec<ConfiguredGuard>,
    pub post_guards: Vec<ConfiguredGuard>,
}

impl PreparedBlock {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.definition.retry.as_ref()
    }
}

/// Immutable, shareable form of a [`WorkflowDefinition`].
#[derive(Debug)]
pub struct PreparedWorkflow {
    definition: WorkflowDefinition,
    blocks: HashMap<String, PreparedBlock>,
}

impl PreparedWorkflow {
    /// Validate `definition` and resolve its blocks and guards.
    pub fn prepare(
        definition: WorkflowDefinition,
        blocks: &BlockRegistry,
        guards: &GuardRegistry,
    ) -> Result<Arc<Self>, DefinitionError> {
        validate_definition(&definition)?;

        let global = configure_all(guards, &definition.global_guards)?;

        let mut prepared = HashMap::with_capacity(definition.blocks.len());
        for (name, block_def) in &definition.blocks {
            let block = match blocks.create(block_def) {
                Some(Ok(block)) => block,
                Some(Err(e)) => {
                    return Err(DefinitionError::BlockCreation {
                        block: name.clone(),
                        reason: e.to_string(),
                    });
                }
                None => {
                    return Err(DefinitionError::UnknownBlockType {
                        block: name.clone(),
                        block_type: block_def.block_type.clone(),
                    });
                }
            };

            let own = match definition.block_guards.get(name) {
                Some(defs) => configure_all(guards, defs)?,
                None => Vec::new(),
            };
            let all: Vec<&ConfiguredGuard> = global.iter().chain(own.iter()).collect();
            let pre_guards = all
                .iter()
                .filter(|g| g.phase.runs_before())
                .map(|g| (*g).clone())
                .collect();
            let post_guards = all
                .iter()
                .filter(|g| g.phase.runs_after())
                .map(|g| (*g).clone())
                .collect();

            prepared.insert(
                name.clone(),
                PreparedBlock {
                    definition: block_def.clone(),
                    block,
                    pre_guards,
                    post_guards,
                },
            );
        }

        tracing::debug!(
            workflow_id = %definition.id,
            version = %definition.version,
            blocks = prepared.len(),
            "workflow prepared"
        );

        Ok(Arc::new(Self {
            definition,
            blocks: prepared,
        }))
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn version(&self) -> &str {
        &self.definition.version
    }

    pub fn start_block(&self) -> &str {
        &self.definition.start_block
    }

    pub fn block(&self, name: &str) -> Option<&PreparedBlock> {
        self.blocks.get(name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn configure_all(
    registry: &GuardRegistry,
    definitions: &[GuardDefinition],
) -> Result<Vec<ConfiguredGuard>, DefinitionError> {
    definitions
        .iter()
        .map(|def| {
            registry
                .configure(def)
                .map_err(|source| DefinitionError::InvalidGuard {
                    guard: def.name.clone(),
                    source,
                })
        })
        .collect()
}
