//! Observability setup for linkflow: the global tracing subscriber and the
//! optional OpenTelemetry bridge.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
