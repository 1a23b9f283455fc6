//! Error types for converting raw documents into typed definitions.

use thiserror::Error;

/// Errors raised while turning a raw step mapping into a typed `StepSpec`.
///
/// These only surface when a document bypassed validation; a document that
/// passed the schema and semantic validators always converts cleanly.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("step '{step_id}' ({step_type}) has no config")]
    MissingConfig { step_id: String, step_type: String },

    #[error("step '{step_id}' ({step_type}) has an invalid config: {reason}")]
    InvalidConfig {
        step_id: String,
        step_type: String,
        reason: String,
    },

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),
}
