//! Per-run execution state.
//!
//! `ExecutionContext` is created at the start of a run and only grows: step
//! results are appended in execution order and never rewritten. It is the
//! [`Scope`] every template and condition is resolved against, with size
//! limits to prevent unbounded memory growth.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use stepflow_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::definition::WorkflowError;
use super::template::Scope;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step result (1 MB).
pub const MAX_STEP_RESULT_SIZE: usize = 1_048_576;

/// Maximum total size of all context data (10 MB).
pub const MAX_CONTEXT_SIZE: usize = 10_485_760;

/// A fresh `exec_<uuid v7>` id.
pub fn new_execution_id() -> String {
    format!("exec_{}", Uuid::now_v7().simple())
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_name: String,
    /// Validated and defaulted inputs.
    pub inputs: Map<String, Value>,
    declared_inputs: Vec<String>,
    /// Results of completed steps, in completion order.
    step_results: IndexMap<String, Value>,
    sys: Value,
    pub start_time: DateTime<Utc>,
    pub current_step: Option<String>,
}

impl ExecutionContext {
    pub fn new(definition: &WorkflowDefinition, execution_id: String, inputs: Map<String, Value>) -> Self {
        let start_time = Utc::now();
        let sys = json!({
            "current_time": start_time.to_rfc3339(),
            "workflow_name": definition.name(),
            "execution_id": execution_id,
        });
        Self {
            execution_id,
            workflow_name: definition.name().to_string(),
            inputs,
            declared_inputs: definition.inputs.keys().cloned().collect(),
            step_results: IndexMap::new(),
            sys,
            start_time,
            current_step: None,
        }
    }

    /// Store the result of a completed step.
    ///
    /// A result over `MAX_STEP_RESULT_SIZE` is replaced by a truncation
    /// marker. Exceeding `MAX_CONTEXT_SIZE` in total is an error.
    pub fn set_step_result(&mut self, step_id: &str, result: Value) -> Result<(), WorkflowError> {
        let serialized = serde_json::to_string(&result)
            .map_err(|e| WorkflowError::ExecutionError(e.to_string()))?;

        if serialized.len() > MAX_STEP_RESULT_SIZE {
            tracing::warn!(
                step_id,
                size = serialized.len(),
                max = MAX_STEP_RESULT_SIZE,
                "step result exceeds size limit, truncating"
            );
            let truncated = json!({
                "_truncated": true,
                "_original_size": serialized.len(),
                "_message": format!(
                    "result exceeded {MAX_STEP_RESULT_SIZE} byte limit and was truncated"
                )
            });
            self.step_results.insert(step_id.to_string(), truncated);
        } else {
            self.step_results.insert(step_id.to_string(), result);
        }

        let total = self.total_size();
        if total > MAX_CONTEXT_SIZE {
            return Err(WorkflowError::ExecutionError(format!(
                "total context size ({total} bytes) exceeds maximum ({MAX_CONTEXT_SIZE} bytes)"
            )));
        }

        Ok(())
    }

    pub fn get_step_result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    /// Declared input names, in declaration order.
    pub fn declared_inputs(&self) -> &[String] {
        &self.declared_inputs
    }

    /// The active variable scope as one JSON object: declared inputs and step
    /// results at the top level, plus `input`, `inputs` and `sys` namespaces.
    ///
    /// Inputs are inserted after step results so an input shadows a step of
    /// the same name, matching reference resolution.
    pub fn variables(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        for (id, result) in &self.step_results {
            vars.insert(id.clone(), result.clone());
        }
        for (name, value) in &self.inputs {
            vars.insert(name.clone(), value.clone());
        }
        vars.insert("input".to_string(), Value::Object(self.inputs.clone()));
        vars.insert("inputs".to_string(), Value::Object(self.inputs.clone()));
        vars.insert("sys".to_string(), self.sys.clone());
        vars
    }

    /// `variables()` as a JSON object, for the condition evaluator.
    pub fn expression_scope(&self) -> Value {
        Value::Object(self.variables())
    }

    /// Total serialized size of inputs and step results in bytes.
    pub fn total_size(&self) -> usize {
        let results: usize = self
            .step_results
            .values()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum();
        let inputs = serde_json::to_string(&self.inputs)
            .map(|s| s.len())
            .unwrap_or(0);
        results + inputs
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }
}

impl Scope for ExecutionContext {
    fn sys(&self) -> &Value {
        &self.sys
    }

    fn is_declared_input(&self, name: &str) -> bool {
        self.declared_inputs.iter().any(|d| d == name)
    }

    fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    fn step_result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::template::{TemplateError, resolve_template};

    fn definition() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "metadata": {"name": "ctx_test", "description": "context test", "version": "1.0.0"},
            "inputs": {"x": {"type": "integer"}, "label": {"type": "string"}},
            "workflow": {"steps": [{"id": "start", "type": "start"}]},
            "outputs": {}
        }))
        .unwrap()
    }

    fn test_context() -> ExecutionContext {
        let mut inputs = Map::new();
        inputs.insert("x".to_string(), json!(41));
        ExecutionContext::new(&definition(), new_execution_id(), inputs)
    }

    #[test]
    fn test_execution_id_format() {
        let id = new_execution_id();
        assert!(id.starts_with("exec_"));
        assert_eq!(id.len(), "exec_".len() + 32);
        assert_ne!(id, new_execution_id());
    }

    #[test]
    fn test_sys_namespace() {
        let ctx = test_context();
        assert_eq!(ctx.sys()["workflow_name"], json!("ctx_test"));
        assert_eq!(ctx.sys()["execution_id"], json!(ctx.execution_id));
        assert!(ctx.sys()["current_time"].is_string());
    }

    #[test]
    fn test_set_and_get_step_result() {
        let mut ctx = test_context();
        ctx.set_step_result("fetch", json!({"total": 3})).unwrap();
        assert_eq!(ctx.get_step_result("fetch"), Some(&json!({"total": 3})));
        assert!(ctx.get_step_result("missing").is_none());
    }

    #[test]
    fn test_resolves_as_scope() {
        let mut ctx = test_context();
        ctx.set_step_result("fetch", json!({"total": 3})).unwrap();

        assert_eq!(resolve_template("${x}", &ctx).unwrap(), json!(41));
        assert_eq!(resolve_template("${input.x}", &ctx).unwrap(), json!(41));
        assert_eq!(resolve_template("${fetch.total}", &ctx).unwrap(), json!(3));

        // Declared but not supplied.
        let err = resolve_template("${label}", &ctx).unwrap_err();
        assert!(matches!(err, TemplateError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_variables_shape() {
        let mut ctx = test_context();
        ctx.set_step_result("fetch", json!(42)).unwrap();
        let vars = ctx.variables();
        assert_eq!(vars["x"], json!(41));
        assert_eq!(vars["fetch"], json!(42));
        assert_eq!(vars["inputs"]["x"], json!(41));
        assert_eq!(vars["sys"]["workflow_name"], json!("ctx_test"));
    }

    #[test]
    fn test_step_result_size_limit_truncates() {
        let mut ctx = test_context();
        let large = "x".repeat(MAX_STEP_RESULT_SIZE + 100);
        ctx.set_step_result("big", json!(large)).unwrap();

        let stored = ctx.get_step_result("big").unwrap();
        assert_eq!(stored["_truncated"], json!(true));
    }

    #[test]
    fn test_total_context_limit() {
        let mut ctx = test_context();
        let chunk = "x".repeat(MAX_STEP_RESULT_SIZE - 100);
        let mut failed = false;
        for i in 0..12 {
            if ctx.set_step_result(&format!("s{i}"), json!(chunk)).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "context should reject more than {MAX_CONTEXT_SIZE} bytes");
    }
}
