//! Workflow engine logic and storage port definitions for linkflow.
//!
//! This crate owns the block-chain state machine and everything around it:
//! - `context` -- per-run mutable state and metadata
//! - `definition` -- chain integrity validation
//! - `guard` -- pre/post execution validation rules
//! - `retry` -- fault classification, backoff and error-context tracking
//! - `block` -- the block work-unit contract and registry
//! - `executor` -- block executor and workflow run loop
//! - `state` -- checkpoint pipeline and the `StateStore` port
//! - `event` -- broadcast bus for workflow events
//!
//! It depends only on `linkflow-types` -- never on `linkflow-infra` or any
//! database crate.

pub mod block;
pub mod context;
pub mod definition;
pub mod event;
pub mod executor;
pub mod guard;
pub mod retry;
pub mod state;
