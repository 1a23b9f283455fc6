//! Execution result types.
//!
//! An `ExecutionResult` is returned from every run, including failed and
//! cancelled ones, so partial progress stays inspectable.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    /// The handler failed. Under a `skip` policy the run continues anyway.
    Failed,
    /// Not executed because its branch was not taken.
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-step diagnostics recorded in an `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Number of re-executions after the first attempt.
    #[serde(default)]
    pub retry_count: u32,
    /// Set when the result came from a fallback step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step: Option<String>,
}

impl StepResult {
    pub fn completed(data: Value, duration_ms: u64, retry_count: u32) -> Self {
        Self {
            status: StepStatus::Completed,
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
            retry_count,
            fallback_step: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64, retry_count: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
            retry_count,
            fallback_step: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            success: false,
            data: None,
            error: Some(reason.into()),
            duration_ms: 0,
            retry_count: 0,
            fallback_step: None,
        }
    }

    pub fn with_fallback(mut self, fallback_step: impl Into<String>) -> Self {
        self.fallback_step = Some(fallback_step.into());
        self
    }
}

/// Summary metadata attached to every `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub workflow_name: String,
    pub executed_at: DateTime<Utc>,
    pub total_steps: usize,
    pub completed_steps: usize,
}

/// Result of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `exec_<uuid>`; also exposed to templates as `sys.execution_id`.
    pub execution_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub success: bool,
    /// Resolved declared outputs (empty unless the run completed).
    pub outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Step diagnostics in execution order.
    pub step_results: IndexMap<String, StepResult>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    /// Ids of steps that failed, in execution order.
    pub fn failed_steps(&self) -> Vec<&str> {
        self.step_results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Failed)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
