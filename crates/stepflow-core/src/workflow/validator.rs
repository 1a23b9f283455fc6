//! The validation pipeline: parse, schema, semantics, lint, typed conversion.

use serde_json::Value;
use stepflow_types::validation::{Severity, ValidationError, ValidationResult};
use stepflow_types::workflow::WorkflowDefinition;

use super::definition::{WorkflowError, into_definition, parse_document};
use super::lint::lint_document;
use super::schema::validate_schema;
use super::semantic::validate_semantics;

/// A definition that passed every check, with the warnings it produced.
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    pub definition: WorkflowDefinition,
    pub report: ValidationResult,
}

/// Validate raw YAML text. A parse failure becomes a single
/// `YAML_PARSE_ERROR` entry instead of an `Err`.
pub fn validate_text(text: &str) -> ValidationResult {
    match parse_document(text) {
        Ok(document) => validate_document(&document),
        Err(WorkflowError::Parse {
            message,
            line,
            column,
        }) => {
            let mut result = ValidationResult::new(None);
            result.error(
                ValidationError::new("YAML_PARSE_ERROR", Severity::Critical, message)
                    .with_location(line, column),
            );
            result
        }
        Err(other) => {
            let mut result = ValidationResult::new(None);
            result.error(ValidationError::new(
                "YAML_PARSE_ERROR",
                Severity::Critical,
                other.to_string(),
            ));
            result
        }
    }
}

/// Validate an already parsed document.
pub fn validate_document(document: &Value) -> ValidationResult {
    analyze(document).0
}

/// Parse and validate `text`, returning the typed definition only when the
/// report has no errors.
pub fn load_definition(text: &str) -> Result<ValidatedWorkflow, WorkflowError> {
    let document = parse_document(text)?;
    match analyze(&document) {
        (report, Some(definition)) => Ok(ValidatedWorkflow { definition, report }),
        (report, None) => Err(WorkflowError::Validation(Box::new(report))),
    }
}

fn analyze(document: &Value) -> (ValidationResult, Option<WorkflowDefinition>) {
    let mut result = validate_schema(document);
    // Semantic checks assume the schema shape.
    if !result.valid {
        tracing::debug!(errors = result.errors.len(), "schema validation failed");
        return (result, None);
    }

    result.extend(validate_semantics(document));
    result.extend(lint_document(document));
    tracing::debug!(
        workflow = result.metadata.workflow_name.as_deref().unwrap_or_default(),
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "workflow validated"
    );
    if !result.valid {
        return (result, None);
    }

    match into_definition(document.clone()) {
        Ok(definition) => (result, Some(definition)),
        Err(e) => {
            result.error(ValidationError::new(
                "INVALID_CONFIG",
                Severity::High,
                e.to_string(),
            ));
            (result, None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
