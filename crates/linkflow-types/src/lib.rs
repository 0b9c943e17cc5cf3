//! Shared domain types for linkflow.
//!
//! This crate contains the types shared across the engine: workflow and block
//! definitions, state values, run statuses, checkpoint metadata, the block
//! fault taxonomy, engine configuration and events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod block;
pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod value;
pub mod workflow;
