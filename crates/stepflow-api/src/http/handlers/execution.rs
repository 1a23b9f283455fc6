//! Execution history and cancellation handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use stepflow_types::execution::ExecutionResult;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Query parameters for `GET /executions`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Return only the most recent N finished runs.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionsView {
    /// Ids of runs still executing.
    pub running: Vec<String>,
    /// Finished runs, oldest first.
    pub history: Vec<ExecutionResult>,
}

/// GET /api/v1/executions - Running ids and finished run history.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<ApiResponse<ExecutionsView>> {
    let timer = RequestTimer::start();

    let mut history = state.engine.get_execution_history();
    if let Some(limit) = query.limit {
        let skip = history.len().saturating_sub(limit);
        history.drain(..skip);
    }
    let mut running = state.engine.running_executions();
    running.sort();

    Json(timer.success(ExecutionsView { running, history }).with_link("self", "/api/v1/executions"))
}

/// POST /api/v1/executions/{id}/cancel - Cancel an in-flight run.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let timer = RequestTimer::start();
    if !state.engine.cancel(&id) {
        return Err(AppError::ExecutionNotFound(id));
    }
    Ok(Json(timer.success(serde_json::json!({ "cancelled": id }))))
}
