//! Adapter that turns a code executor into a block.
//!
//! The executor does the actual work (scripts, sandboxes, remote runners);
//! `CodeBlock` handles the block contract around it: pre-flight checks,
//! cancellation, writing the result into state and mapping failures to
//! classified faults.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use linkflow_types::block::BlockError;
use linkflow_types::value::StateValue;
use linkflow_types::workflow::BlockDefinition;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Block, BlockFactory, BlockOutcome, BoxBlock};
use crate::context::ExecutionContext;

/// Config key naming the state entry that receives the executor's output.
pub const OUTPUT_KEY_CONFIG: &str = "output_key";

/// Read-only view of the run handed to a code executor.
#[derive(Debug, Clone)]
pub struct CodeContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub block: String,
    pub config: BTreeMap<String, serde_json::Value>,
    pub input: StateValue,
    pub state: HashMap<String, StateValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeExecutionResult {
    pub success: bool,
    pub output: Option<StateValue>,
    pub error_message: Option<String>,
    /// Classified fault for failures; `Internal` is assumed when absent.
    pub fault: Option<BlockError>,
}

impl CodeExecutionResult {
    pub fn ok(output: impl Into<StateValue>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error_message: None,
            fault: None,
        }
    }

    pub fn failed(fault: BlockError) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(fault.to_string()),
            fault: Some(fault),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyReport {
    pub valid: bool,
    pub violations: Vec<String>,
}

impl SafetyReport {
    pub fn safe() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
        }
    }

    pub fn unsafe_because(violations: Vec<String>) -> Self {
        Self {
            valid: false,
            violations,
        }
    }
}

/// Something that can run code on behalf of a block.
pub trait CodeExecutor: Send + Sync {
    fn execute(
        &self,
        code: CodeContext,
        cancel: CancellationToken,
    ) -> impl Future<Output = CodeExecutionResult> + Send;

    /// Whether this executor understands the block's configuration.
    fn can_execute(&self, config: &BTreeMap<String, serde_json::Value>) -> bool;

    fn validate_safety(&self, config: &BTreeMap<String, serde_json::Value>) -> SafetyReport;
}

/// A block backed by a [`CodeExecutor`].
pub struct CodeBlock<E> {
    executor: Arc<E>,
    name: String,
    config: BTreeMap<String, serde_json::Value>,
    output_key: String,
}

impl<E: CodeExecutor> CodeBlock<E> {
    pub fn new(executor: Arc<E>, definition: &BlockDefinition) -> Self {
        let output_key = definition
            .config
            .get(OUTPUT_KEY_CONFIG)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.result", definition.name));
        Self {
            executor,
            name: definition.name.clone(),
            config: definition.config.clone(),
            output_key,
        }
    }

    /// A factory producing one `CodeBlock` per definition entry.
    pub fn factory(executor: Arc<E>) -> impl BlockFactory
    where
        E: 'static,
    {
        move |definition: &BlockDefinition| -> Result<BoxBlock, BlockError> {
            Ok(BoxBlock::new(CodeBlock::new(executor.clone(), definition)))
        }
    }
}

impl<E: CodeExecutor> Block for CodeBlock<E> {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<BlockOutcome, BlockError> {
        ctx.check_cancelled()?;
        let code = CodeContext {
            run_id: ctx.run_id(),
            workflow_id: ctx.workflow_id().to_string(),
            block: self.name.clone(),
            config: self.config.clone(),
            input: ctx.input().clone(),
            state: ctx.snapshot(),
        };
        let result = self
            .executor
            .execute(code, ctx.cancellation_token().clone())
            .await;
        ctx.check_cancelled()?;

        if result.success {
            let output = result.output.unwrap_or_default();
            ctx.set_state(self.output_key.clone(), output.clone());
            Ok(BlockOutcome::Success {
                next_block: None,
                output: Some(output),
            })
        } else {
            let fault = result.fault.unwrap_or_else(|| {
                BlockError::Internal(
                    result
                        .error_message
                        .unwrap_or_else(|| "code execution failed".to_string()),
                )
            });
            Ok(BlockOutcome::failure(fault))
        }
    }

    fn can_execute(&self, _ctx: &ExecutionContext) -> bool {
        if !self.executor.can_execute(&self.config) {
            tracing::warn!(block = %self.name, "code executor cannot handle block configuration");
            return false;
        }
        let report = self.executor.validate_safety(&self.config);
        if !report.valid {
            tracing::warn!(
                block = %self.name,
                violations = ?report.violations,
                "code failed safety validation"
            );
        }
        report.valid
    }
}
