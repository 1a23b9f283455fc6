//! Workflow validation, registration and execution handlers.
//!
//! Workflow documents are posted as raw YAML text; everything else is JSON.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use stepflow_core::LoadedWorkflow;
use stepflow_types::execution::ExecutionResult;
use stepflow_types::validation::ValidationResult;
use stepflow_types::workflow::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Body of `POST /workflows/{name}/run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// One row of `GET /workflows`.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    pub steps: usize,
    pub inputs: Vec<String>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(d: &WorkflowDefinition) -> Self {
        Self {
            name: d.metadata.name.clone(),
            version: d.metadata.version.clone(),
            description: d.metadata.description.clone(),
            steps: d.workflow.steps.len(),
            inputs: d.inputs.keys().cloned().collect(),
        }
    }
}

/// POST /api/v1/validate - Validate a YAML document without registering it.
pub async fn validate_workflow(
    State(state): State<AppState>,
    body: String,
) -> Json<ApiResponse<ValidationResult>> {
    let timer = RequestTimer::start();
    Json(timer.success(state.engine.validate(&body)))
}

/// POST /api/v1/workflows - Validate and register a YAML document.
pub async fn create_workflow(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ApiResponse<LoadedWorkflow>>, AppError> {
    let timer = RequestTimer::start();
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("request body must be a YAML workflow document".to_string()));
    }

    let loaded = state.engine.load_workflow(&body)?;
    let self_link = format!("/api/v1/workflows/{}", loaded.name);
    Ok(Json(timer.success(loaded).with_link("self", &self_link)))
}

/// GET /api/v1/workflows - List registered workflows.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let timer = RequestTimer::start();

    let mut summaries = Vec::new();
    for name in state.engine.list_workflows() {
        // A concurrent delete can remove a name between listing and lookup.
        if let Ok(definition) = state.engine.get_workflow_detail(&name) {
            summaries.push(WorkflowSummary::from(definition.as_ref()));
        }
    }

    Ok(Json(timer.success(summaries).with_link("self", "/api/v1/workflows")))
}

/// GET /api/v1/workflows/{name} - Full definition of a registered workflow.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let timer = RequestTimer::start();
    let definition = state.engine.get_workflow_detail(&name)?;

    Ok(Json(
        timer
            .success(definition.as_ref().clone())
            .with_link("self", &format!("/api/v1/workflows/{name}"))
            .with_link("run", &format!("/api/v1/workflows/{name}/run")),
    ))
}

/// DELETE /api/v1/workflows/{name} - Unregister a workflow.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    state.engine.remove_workflow(&name)?;
    Ok(Json(timer.success(serde_json::json!({ "deleted": name }))))
}

/// POST /api/v1/workflows/{name}/run - Run a workflow and wait for the result.
///
/// A run that fails or is cancelled still answers 200 with the
/// `ExecutionResult`; only unknown workflows and bad inputs are errors.
pub async fn run_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<ApiResponse<ExecutionResult>>, AppError> {
    let timer = RequestTimer::start();
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let result = state.engine.run(&name, request.inputs).await?;
    tracing::info!(
        workflow = name.as_str(),
        execution_id = result.execution_id.as_str(),
        status = %result.status,
        "workflow run requested over HTTP finished"
    );
    Ok(Json(timer.success(result)))
}
