//! Infrastructure layer for linkflow.
//!
//! Implementations of the ports defined in `linkflow-core`: the SQLite
//! checkpoint store, the AES-256-GCM payload cipher and its key providers
//! (environment, password, OS keychain), the TOML config loader, and the
//! bootstrap code that wires them into an engine.

pub mod bootstrap;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod sqlite;
