//! Block work-units and their registry.
//!
//! `Block` uses native async fn in traits (RPITIT), so it cannot be a trait
//! object directly. Type-erased storage goes through the same three-step
//! pattern as the rest of the engine:
//! 1. an object-safe `BlockDyn` trait with boxed futures
//! 2. a blanket `BlockDyn` impl for every `T: Block`
//! 3. `BoxBlock`, a cheap-to-clone wrapper that delegates

pub mod code;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use linkflow_types::block::BlockError;
use linkflow_types::value::StateValue;
use linkflow_types::workflow::BlockDefinition;

use crate::context::ExecutionContext;

pub use code::{CodeBlock, CodeContext, CodeExecutionResult, CodeExecutor, SafetyReport};

// ---------------------------------------------------------------------------
// BlockOutcome
// ---------------------------------------------------------------------------

/// What a block reports after running.
///
/// `next_block` overrides the definition's transition when set; `None` means
/// "use the configured edge".
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Success {
        next_block: Option<String>,
        output: Option<StateValue>,
    },
    Failure {
        next_block: Option<String>,
        fault: BlockError,
    },
    Skip {
        next_block: Option<String>,
        reason: String,
    },
    /// Pause the run for `duration`, then continue at `resume_block`
    /// (the success transition when `None`).
    Wait {
        duration: Duration,
        resume_block: Option<String>,
    },
}

impl BlockOutcome {
    pub fn success() -> Self {
        BlockOutcome::Success {
            next_block: None,
            output: None,
        }
    }

    pub fn success_with(output: impl Into<StateValue>) -> Self {
        BlockOutcome::Success {
            next_block: None,
            output: Some(output.into()),
        }
    }

    /// Succeed and jump to an explicit block.
    pub fn goto(next: impl Into<String>) -> Self {
        BlockOutcome::Success {
            next_block: Some(next.into()),
            output: None,
        }
    }

    pub fn failure(fault: BlockError) -> Self {
        BlockOutcome::Failure {
            next_block: None,
            fault,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        BlockOutcome::Skip {
            next_block: None,
            reason: reason.into(),
        }
    }

    pub fn wait(duration: Duration) -> Self {
        BlockOutcome::Wait {
            duration,
            resume_block: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BlockOutcome::Success { .. })
    }
}

// ---------------------------------------------------------------------------
// Block trait
// ---------------------------------------------------------------------------

/// A unit of work in the chain.
///
/// Blocks read and write the context state, return an outcome, and may
/// raise a `BlockError` which the error engine classifies. Long-running
/// blocks should watch `ctx.cancellation_token()`.
pub trait Block: Send + Sync {
    fn execute(
        &self,
        ctx: &mut ExecutionContext,
    ) -> impl Future<Output = Result<BlockOutcome, BlockError>> + Send;

    /// Pre-flight check; `false` fails the block without running it.
    fn can_execute(&self, _ctx: &ExecutionContext) -> bool {
        true
    }

    /// Release resources after execution. Errors are logged, never fatal.
    fn cleanup(
        &self,
        _ctx: &ExecutionContext,
        _outcome: &BlockOutcome,
    ) -> impl Future<Output = Result<(), BlockError>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe version of [`Block`] with boxed futures.
pub trait BlockDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<BlockOutcome, BlockError>> + Send + 'a>>;

    fn can_execute(&self, ctx: &ExecutionContext) -> bool;

    fn cleanup_boxed<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        outcome: &'a BlockOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<(), BlockError>> + Send + 'a>>;
}

impl<T: Block> BlockDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<BlockOutcome, BlockError>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }

    fn can_execute(&self, ctx: &ExecutionContext) -> bool {
        Block::can_execute(self, ctx)
    }

    fn cleanup_boxed<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        outcome: &'a BlockOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<(), BlockError>> + Send + 'a>> {
        Box::pin(self.cleanup(ctx, outcome))
    }
}

/// Type-erased block, shared between runs of a prepared workflow.
#[derive(Clone)]
pub struct BoxBlock {
    inner: Arc<dyn BlockDyn>,
}

impl BoxBlock {
    pub fn new<T: Block + 'static>(block: T) -> Self {
        Self {
            inner: Arc::new(block),
        }
    }

    pub async fn execute(&self, ctx: &mut ExecutionContext) -> Result<BlockOutcome, BlockError> {
        self.inner.execute_boxed(ctx).await
    }

    pub fn can_execute(&self, ctx: &ExecutionContext) -> bool {
        self.inner.can_execute(ctx)
    }

    pub async fn cleanup(&self, ctx: &ExecutionContext, outcome: &BlockOutcome) -> Result<(), BlockError> {
        self.inner.cleanup_boxed(ctx, outcome).await
    }
}

impl std::fmt::Debug for BoxBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBlock").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Creates a block instance for a definition entry.
pub trait BlockFactory: Send + Sync {
    fn create(&self, definition: &BlockDefinition) -> Result<BoxBlock, BlockError>;
}

impl<F> BlockFactory for F
where
    F: Fn(&BlockDefinition) -> Result<BoxBlock, BlockError> + Send + Sync,
{
    fn create(&self, definition: &BlockDefinition) -> Result<BoxBlock, BlockError> {
        self(definition)
    }
}

/// Factory that hands out clones of one shared block.
struct SharedBlock(BoxBlock);

impl BlockFactory for SharedBlock {
    fn create(&self, _definition: &BlockDefinition) -> Result<BoxBlock, BlockError> {
        Ok(self.0.clone())
    }
}

/// Maps block type tags to factories.
#[derive(Clone, Default)]
pub struct BlockRegistry {
    factories: HashMap<String, Arc<dyn BlockFactory>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, block_type: impl Into<String>, factory: impl BlockFactory + 'static) {
        self.factories.insert(block_type.into(), Arc::new(factory));
    }

    /// Register one block instance for every definition of `block_type`.
    pub fn register_block<T: Block + 'static>(&mut self, block_type: impl Into<String>, block: T) {
        self.register(block_type, SharedBlock(BoxBlock::new(block)));
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.factories.contains_key(block_type)
    }

    /// Instantiate the block for `definition`; `None` if its type is unknown.
    pub fn create(&self, definition: &BlockDefinition) -> Option<Result<BoxBlock, BlockError>> {
        self.factories
            .get(&definition.block_type)
            .map(|factory| factory.create(definition))
    }
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("BlockRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct Echo;

    impl Block for Echo {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<BlockOutcome, BlockError> {
            let value = ctx.get_state_or("message", "none");
            ctx.set_state("echo", value.clone());
            Ok(BlockOutcome::success_with(value))
        }
    }

    struct Closed;

    impl Block for Closed {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<BlockOutcome, BlockError> {
            Err(BlockError::Internal("should not run".into()))
        }

        fn can_execute(&self, _ctx: &ExecutionContext) -> bool {
            false
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("wf", "1", Uuid::now_v7(), StateValue::Null)
    }

    #[tokio::test]
    async fn test_box_block_delegates() {
        let block = BoxBlock::new(Echo);
        let mut ctx = ctx();
        ctx.set_state("message", "hi");
        let outcome = block.execute(&mut ctx).await.unwrap();
        assert_eq!(outcome, BlockOutcome::success_with("hi"));
        assert_eq!(ctx.get_state("echo"), Some(&StateValue::from("hi")));
        assert!(block.can_execute(&ctx));
        assert!(block.cleanup(&ctx, &outcome).await.is_ok());

        let closed = BoxBlock::new(Closed);
        assert!(!closed.can_execute(&ctx));
    }

    #[test]
    fn test_registry_resolves_by_type() {
        let mut registry = BlockRegistry::new();
        registry.register_block("echo", Echo);
        registry.register("closed", |_def: &BlockDefinition| -> Result<BoxBlock, BlockError> {
            Ok(BoxBlock::new(Closed))
        });

        assert!(registry.contains("echo"));
        assert!(registry.create(&BlockDefinition::new("a", "echo")).is_some());
        assert!(registry.create(&BlockDefinition::new("b", "closed")).is_some());
        assert!(registry.create(&BlockDefinition::new("c", "missing")).is_none());
    }

    #[test]
    fn test_factory_sees_block_config() {
        let mut registry = BlockRegistry::new();
        registry.register("strict", |def: &BlockDefinition| -> Result<BoxBlock, BlockError> {
            if def.config.contains_key("endpoint") {
                Ok(BoxBlock::new(Echo))
            } else {
                Err(BlockError::MissingValue("endpoint".into()))
            }
        });
        let bad = registry.create(&BlockDefinition::new("a", "strict")).unwrap();
        assert!(bad.is_err());
        let good = registry
            .create(&BlockDefinition::new("a", "strict").with_config("endpoint", serde_json::json!("x")))
            .unwrap();
        assert!(good.is_ok());
    }

    #[test]
    fn test_outcome_constructors() {
        assert!(BlockOutcome::success().is_success());
        assert!(BlockOutcome::goto("next").is_success());
        assert!(!BlockOutcome::skip("n/a").is_success());
        assert_eq!(
            BlockOutcome::wait(Duration::from_secs(1)),
            BlockOutcome::Wait {
                duration: Duration::from_secs(1),
                resume_block: None
            }
        );
    }
}
