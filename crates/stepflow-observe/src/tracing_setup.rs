//! Global subscriber setup: a stderr `fmt` layer filtered by `EnvFilter`,
//! plus an OpenTelemetry bridge when requested.
//!
//! # Usage
//!
//! ```no_run
//! // Structured logging at the CLI's default level
//! stepflow_observe::init_tracing("warn", false).unwrap();
//!
//! // Verbose, with spans exported to stdout
//! stepflow_observe::init_tracing("info,stepflow=debug", true).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Kept so `shutdown_tracing` can flush the exporter.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Filter directive for a CLI verbosity level (`-v` count).
pub fn filter_for_verbosity(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info,stepflow=debug",
        _ => "trace",
    }
}

/// Install the global subscriber.
///
/// Log lines go to stderr so `--json` output on stdout stays parseable.
/// `RUST_LOG` wins over `default_filter` when set. With `enable_otel`,
/// spans are also exported through a stdout OpenTelemetry exporter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(default_filter: &str, enable_otel: bool) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("stepflow");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush and stop the OpenTelemetry provider. A no-op without `--otel`.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: failed to flush OpenTelemetry spans: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(filter_for_verbosity(0, false), "warn");
        assert_eq!(filter_for_verbosity(1, false), "info,stepflow=debug");
        assert_eq!(filter_for_verbosity(3, false), "trace");
        assert_eq!(filter_for_verbosity(2, true), "error");
    }

    #[test]
    fn test_filters_parse() {
        for verbose in 0..3 {
            assert!(EnvFilter::try_new(filter_for_verbosity(verbose, false)).is_ok());
        }
    }

    #[test]
    fn test_shutdown_without_init_is_noop() {
        shutdown_tracing();
    }
}
