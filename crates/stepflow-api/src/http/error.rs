//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use stepflow_core::WorkflowError;

use crate::http::response::{ApiErrorDetail, ApiResponse};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine errors (load, lookup, inputs, execution).
    Workflow(WorkflowError),
    /// No in-flight execution with this id.
    ExecutionNotFound(String),
    /// Malformed request.
    BadRequest(String),
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl AppError {
    fn status_and_errors(&self) -> (StatusCode, Vec<ApiErrorDetail>) {
        match self {
            AppError::Workflow(e) => workflow_status_and_errors(e),
            AppError::ExecutionNotFound(id) => (
                StatusCode::NOT_FOUND,
                vec![ApiErrorDetail::new(
                    "EXECUTION_NOT_FOUND",
                    format!("No running execution '{id}'"),
                )],
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                vec![ApiErrorDetail::new("BAD_REQUEST", msg.clone())],
            ),
        }
    }
}

fn workflow_status_and_errors(error: &WorkflowError) -> (StatusCode, Vec<ApiErrorDetail>) {
    match error {
        WorkflowError::NotFound(name) => (
            StatusCode::NOT_FOUND,
            vec![ApiErrorDetail::new("WORKFLOW_NOT_FOUND", format!("Workflow '{name}' not found"))],
        ),
        WorkflowError::Validation(report) => {
            let errors = report
                .errors
                .iter()
                .map(|e| ApiErrorDetail {
                    code: e.code.clone(),
                    message: e.message.clone(),
                    details: Some(json!({
                        "path": e.path,
                        "line": e.line,
                        "column": e.column,
                        "severity": e.severity,
                    })),
                })
                .collect();
            (StatusCode::UNPROCESSABLE_ENTITY, errors)
        }
        WorkflowError::Parse { line, column, .. } => (
            StatusCode::BAD_REQUEST,
            vec![ApiErrorDetail {
                code: "YAML_PARSE_ERROR".to_string(),
                message: error.to_string(),
                details: Some(json!({"line": line, "column": column})),
            }],
        ),
        WorkflowError::InvalidInput(problems) => (
            StatusCode::BAD_REQUEST,
            problems
                .iter()
                .map(|p| ApiErrorDetail::new("INVALID_INPUT", p.clone()))
                .collect(),
        ),
        WorkflowError::CircularDependency(_)
        | WorkflowError::UnknownDependency(_)
        | WorkflowError::UnsupportedStepType(_)
        | WorkflowError::Definition(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            vec![ApiErrorDetail::new("INVALID_WORKFLOW", error.to_string())],
        ),
        WorkflowError::ExecutionError(_) | WorkflowError::Io(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![ApiErrorDetail::new("EXECUTION_ERROR", error.to_string())],
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, errors) = self.status_and_errors();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = ?self, "request rejected");
        }

        let body = ApiResponse::failure(errors, Uuid::now_v7().to_string());
        let mut response = body.into_response();
        *response.status_mut() = status;
        response
    }
}
