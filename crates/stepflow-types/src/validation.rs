//! Validation report types.
//!
//! A `ValidationResult` combines schema, semantic and lint findings for one
//! document. `valid` is true iff `errors` is empty; warnings never block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the structural schema documents are checked against.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// How serious a validation error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

/// A blocking finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Stable machine-readable code, e.g. `CIRCULAR_DEPENDENCY`.
    pub code: String,
    pub message: String,
    /// Slash-separated location in the document, e.g. `/workflow/steps/1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub severity: Severity,
}

impl ValidationError {
    pub fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            path: None,
            line: None,
            column: None,
            severity,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_location(mut self, line: Option<usize>, column: Option<usize>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

/// A non-blocking advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            path: None,
            suggestion: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub validated_at: DateTime<Utc>,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
}

/// Combined report for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub metadata: ValidationMetadata,
}

impl ValidationResult {
    /// An empty (valid) report.
    pub fn new(workflow_name: Option<String>) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: ValidationMetadata {
                validated_at: Utc::now(),
                schema_version: SCHEMA_VERSION.to_string(),
                workflow_name,
            },
        }
    }

    pub fn error(&mut self, error: ValidationError) {
        self.errors.push(error);
        self.valid = false;
    }

    pub fn warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, other: ValidationResult) {
        for e in other.errors {
            self.error(e);
        }
        self.warnings.extend(other.warnings);
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    /// One line per error, for log and CLI output.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match &e.path {
                Some(path) => format!("[{}] {} ({path})", e.code, e.message),
                None => format!("[{}] {}", e.code, e.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
