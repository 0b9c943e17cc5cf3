//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use linkflow_types::config::{LogFormat, LoggingConfig};
//!
//! let config = LoggingConfig {
//!     level: "linkflow_core=debug,info".to_string(),
//!     format: LogFormat::Json,
//!     otel: false,
//! };
//! linkflow_observe::init_tracing(&config).unwrap();
//! // ... run workflows ...
//! linkflow_observe::shutdown_tracing();
//! ```

use std::sync::OnceLock;

use linkflow_types::config::{LogFormat, LoggingConfig};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Initialize the global tracing subscriber from `config`.
///
/// - The filter comes from `RUST_LOG` when set, else from `config.level`.
/// - A `fmt` layer writes in the configured format (`pretty`, `compact` or
///   `json`) with targets and span close timing.
/// - With `config.otel`, spans are also bridged to OpenTelemetry through a
///   stdout exporter.
///
/// # Errors
///
/// Returns an error if the level directive is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = build_filter(&config.level)?;

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(config.format)];

    if config.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("linkflow");
        layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());

        // Keep the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(())
}

/// `RUST_LOG` if set, otherwise `default_level`.
fn build_filter(default_level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level),
    }
}

fn fmt_layer(format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Call before process exit so buffered spans are exported. A no-op when
/// OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("linkflow_core=debug,warn").is_ok());
    }

    #[test]
    fn test_fmt_layer_for_every_format() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let _layer = fmt_layer(format);
        }
    }

    #[test]
    fn test_init_twice_fails() {
        let config = LoggingConfig::default();
        init_tracing(&config).unwrap();
        tracing::info!(run_id = "test", "subscriber installed");
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn test_shutdown_without_otel_is_noop() {
        shutdown_tracing();
    }
}
