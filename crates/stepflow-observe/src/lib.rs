//! Observability setup for Stepflow: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;

pub use tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};
