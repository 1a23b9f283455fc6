//! Workflow document parsing and the engine-level error taxonomy.
//!
//! Parsing happens in two phases: raw YAML text is first read into an
//! untyped `serde_json::Value` (so the validators can report every problem
//! with a path), and only a document that passed validation is converted
//! into the typed [`WorkflowDefinition`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use stepflow_types::validation::ValidationResult;
use stepflow_types::workflow::WorkflowDefinition;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by loading, planning and running workflows.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The document is not well-formed YAML.
    #[error("YAML parse error{}: {message}", location_suffix(.line, .column))]
    Parse {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Schema or semantic validation failed. Carries the full report.
    #[error("workflow validation failed: {}", .0.error_summary())]
    Validation(Box<ValidationResult>),

    #[error("workflow not found: {0}")]
    NotFound(String),

    /// Caller-supplied inputs do not satisfy the declared input specs.
    #[error("invalid inputs: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    #[error("circular dependency: {0}")]
    CircularDependency(String),

    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("unsupported step type: {0}")]
    UnsupportedStepType(String),

    /// A validated document failed typed conversion.
    #[error("invalid workflow definition: {0}")]
    Definition(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn location_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        (Some(l), None) => format!(" at line {l}"),
        _ => String::new(),
    }
}

impl WorkflowError {
    /// The validation report, if this is a validation failure.
    pub fn validation_result(&self) -> Option<&ValidationResult> {
        match self {
            WorkflowError::Validation(result) => Some(result),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse YAML text into an untyped document.
///
/// Line and column are 1-based when the parser reports a location.
pub fn parse_document(text: &str) -> Result<Value, WorkflowError> {
    serde_yaml_ng::from_str::<Value>(text).map_err(|e| {
        let location = e.location();
        WorkflowError::Parse {
            message: e.to_string(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
        }
    })
}

/// Convert a validated document into its typed form.
pub fn into_definition(document: Value) -> Result<WorkflowDefinition, WorkflowError> {
    serde_json::from_value(document).map_err(|e| WorkflowError::Definition(e.to_string()))
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Read a workflow document from disk.
pub fn read_workflow_file(path: &Path) -> Result<String, WorkflowError> {
    Ok(std::fs::read_to_string(path)?)
}

/// Find all `*.yaml` / `*.yml` files directly inside `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn discover_workflow_files(dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
