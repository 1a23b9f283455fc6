//! `WorkflowEngine`: the facade every calling layer uses.
//!
//! Wraps the registry, the validation pipeline and the executor behind the
//! operations a CLI or HTTP route needs: validate, load, run, cancel, list,
//! inspect and remove.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use stepflow_types::config::EngineConfig;
use stepflow_types::execution::ExecutionResult;
use stepflow_types::validation::{ValidationResult, ValidationWarning};
use stepflow_types::workflow::WorkflowDefinition;
use tokio_util::sync::CancellationToken;

use super::context::new_execution_id;
use super::definition::WorkflowError;
use super::executor::WorkflowExecutor;
use super::inputs::prepare_inputs;
use super::registry::WorkflowRegistry;
use super::step_runner::StepRunner;
use super::validator::{load_definition, validate_text};

/// Outcome of a successful `load_workflow`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedWorkflow {
    pub name: String,
    pub warnings: Vec<ValidationWarning>,
}

/// Keeps an execution id in the running map until the run completes or its
/// future is dropped.
struct RunningGuard<'a> {
    running: &'a DashMap<String, CancellationToken>,
    execution_id: String,
}

impl<'a> RunningGuard<'a> {
    fn register(
        running: &'a DashMap<String, CancellationToken>,
        execution_id: &str,
        token: &CancellationToken,
    ) -> Self {
        running.insert(execution_id.to_string(), token.clone());
        Self {
            running,
            execution_id: execution_id.to_string(),
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.execution_id);
    }
}

pub struct WorkflowEngine {
    registry: WorkflowRegistry,
    executor: WorkflowExecutor,
    /// Cancellation tokens of in-flight runs, keyed by execution id.
    running: DashMap<String, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(runner: StepRunner, config: &EngineConfig) -> Self {
        Self {
            registry: WorkflowRegistry::new(config.history_limit),
            executor: WorkflowExecutor::new(
                Arc::new(runner),
                Duration::from_millis(config.retry_delay_ms),
            ),
            running: DashMap::new(),
        }
    }

    /// Full validation report for `text`; never fails.
    pub fn validate(&self, text: &str) -> ValidationResult {
        validate_text(text)
    }

    /// Validate and register a workflow. Loading the same name again
    /// replaces the earlier definition.
    pub fn load_workflow(&self, text: &str) -> Result<LoadedWorkflow, WorkflowError> {
        let validated = load_definition(text).inspect_err(|e| {
            tracing::warn!(error = %e, "workflow rejected");
        })?;

        let name = validated.definition.name().to_string();
        let replaced = self.registry.insert(validated.definition);
        tracing::info!(
            workflow = name.as_str(),
            replaced,
            warnings = validated.report.warnings.len(),
            "workflow loaded"
        );

        Ok(LoadedWorkflow {
            name,
            warnings: validated.report.warnings,
        })
    }

    /// Run a registered workflow to completion.
    pub async fn run(&self, name: &str, inputs: Map<String, Value>) -> Result<ExecutionResult, WorkflowError> {
        self.run_with_cancellation(name, inputs, CancellationToken::new())
            .await
    }

    /// Run a registered workflow under a caller-owned cancellation token.
    ///
    /// Unknown names and invalid inputs are returned as `Err` before any
    /// step runs. Once execution starts, the outcome (including failure and
    /// cancellation) is in the returned `ExecutionResult`, which is also
    /// appended to the history.
    pub async fn run_with_cancellation(
        &self,
        name: &str,
        inputs: Map<String, Value>,
        token: CancellationToken,
    ) -> Result<ExecutionResult, WorkflowError> {
        let definition = self
            .registry
            .get(name)
            .ok_or_else(|| WorkflowError::NotFound(name.to_string()))?;
        let inputs = prepare_inputs(&definition.inputs, &inputs)?;

        let execution_id = new_execution_id();
        let _running = RunningGuard::register(&self.running, &execution_id, &token);

        let result = self
            .executor
            .execute(&definition, inputs, execution_id.clone(), &token)
            .await?;
        self.registry.record(result.clone());
        Ok(result)
    }

    /// Cancel an in-flight run. Returns false when no such run is active.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.running.get(execution_id) {
            Some(token) => {
                tracing::info!(execution_id, "cancelling workflow execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of runs currently executing.
    pub fn running_executions(&self) -> Vec<String> {
        self.running.iter().map(|e| e.key().clone()).collect()
    }

    /// Registered workflow names, sorted.
    pub fn list_workflows(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Finished runs, oldest first.
    pub fn get_execution_history(&self) -> Vec<ExecutionResult> {
        self.registry.history()
    }

    pub fn get_workflow_detail(&self, name: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.registry
            .get(name)
            .ok_or_else(|| WorkflowError::NotFound(name.to_string()))
    }

    pub fn remove_workflow(&self, name: &str) -> Result<(), WorkflowError> {
        if self.registry.remove(name) {
            tracing::info!(workflow = name, "workflow removed");
            Ok(())
        } else {
            Err(WorkflowError::NotFound(name.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step_runner::{BoxFuture, CodeSandbox, SandboxRequest, StepError};
    use serde_json::json;
    use stepflow_types::execution::{RunStatus, StepStatus};
    use stepflow_types::workflow::CodeLanguage;

    /// `main(x)` returns `x * 2`; code `"hang"` never finishes.
    struct DoublingSandbox;

    impl CodeSandbox for DoublingSandbox {
        fn supports(&self, language: CodeLanguage) -> bool {
            language == CodeLanguage::Javascript
        }

        fn execute(&self, _language: CodeLanguage, request: SandboxRequest) -> BoxFuture<'_, Result<Value, StepError>> {
            Box::pin(async move {
                if request.code.contains("hang") {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                let x = request.args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(json!({"doubled": x * 2}))
            })
        }
    }

    const DOUBLER: &str = r#"
metadata:
  name: doubler
  description: Doubles a number with a code step
  version: 1.0.0
inputs:
  x:
    type: integer
    required: true
workflow:
  steps:
    - id: start
      type: start
    - id: double
      type: code
      depends_on: [start]
      config:
        language: javascript
        code: "function main(x) { return { doubled: x * 2 }; }"
    - id: end
      type: end
      depends_on: [double]
outputs:
  result:
    source: "${double.doubled}"
"#;

    const HANGING: &str = r#"
metadata:
  name: hanging
  description: A code step that never returns
  version: 1.0.0
inputs: {}
workflow:
  steps:
    - id: start
      type: start
    - id: wait
      type: code
      depends_on: [start]
      config:
        language: javascript
        code: "function main() { hang(); }"
    - id: end
      type: end
      depends_on: [wait]
outputs: {}
"#;

    fn engine_with(config: EngineConfig) -> WorkflowEngine {
        let runner = StepRunner::new(config.timeouts.clone()).with_sandbox(Arc::new(DoublingSandbox));
        WorkflowEngine::new(runner, &config)
    }

    fn engine() -> WorkflowEngine {
        engine_with(EngineConfig::default())
    }

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_load_and_run() {
        let engine = engine();
        let loaded = engine.load_workflow(DOUBLER).unwrap();
        assert_eq!(loaded.name, "doubler");

        let result = engine.run("doubler", inputs(json!({"x": 21}))).await.unwrap();
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.outputs["result"], json!(42));
        assert_eq!(result.step_results["double"].status, StepStatus::Completed);
        assert_eq!(engine.get_execution_history().len(), 1);
    }

    #[tokio::test]
    async fn test_run_unknown_workflow() {
        let err = engine().run("missing", Map::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(ref n) if n == "missing"));
    }

    #[tokio::test]
    async fn test_invalid_inputs_do_not_start_a_run() {
        let engine = engine();
        engine.load_workflow(DOUBLER).unwrap();

        let err = engine.run("doubler", Map::new()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing required input 'x'"), "got: {msg}");

        let err = engine.run("doubler", inputs(json!({"x": "ten"}))).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput(_)));
        assert!(engine.get_execution_history().is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_document() {
        let engine = engine();
        let text = DOUBLER.replace("depends_on: [double]", "depends_on: [nowhere]");
        let err = engine.load_workflow(&text).unwrap_err();
        let report = err.validation_result().unwrap();
        assert!(report.has_error("MISSING_DEPENDENCY"));
        assert!(engine.list_workflows().is_empty());
    }

    #[test]
    fn test_load_rejects_unparsable_yaml() {
        let err = engine().load_workflow("metadata: [unclosed").unwrap_err();
        assert!(matches!(err, WorkflowError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn test_load_is_idempotent_and_last_wins() {
        let engine = engine();
        engine.load_workflow(DOUBLER).unwrap();
        engine.load_workflow(DOUBLER).unwrap();
        assert_eq!(engine.list_workflows(), vec!["doubler"]);

        let updated = DOUBLER.replace("version: 1.0.0", "version: 1.1.0");
        engine.load_workflow(&updated).unwrap();
        assert_eq!(engine.get_workflow_detail("doubler").unwrap().metadata.version, "1.1.0");
    }

    #[test]
    fn test_validate_reports_without_registering() {
        let engine = engine();
        let report = engine.validate(DOUBLER);
        assert!(report.valid, "errors: {}", report.error_summary());
        assert!(engine.list_workflows().is_empty());
    }

    #[test]
    fn test_remove_workflow() {
        let engine = engine();
        engine.load_workflow(DOUBLER).unwrap();
        engine.remove_workflow("doubler").unwrap();
        assert!(matches!(
            engine.remove_workflow("doubler"),
            Err(WorkflowError::NotFound(_))
        ));
        assert!(engine.get_workflow_detail("doubler").is_err());
    }

    #[tokio::test]
    async fn test_cancel_by_execution_id() {
        let engine = Arc::new(engine());
        engine.load_workflow(HANGING).unwrap();

        let runner = Arc::clone(&engine);
        let handle = tokio::spawn(async move { runner.run("hanging", Map::new()).await });

        // Wait for the run to register its token.
        let execution_id = loop {
            if let Some(id) = engine.running_executions().into_iter().next() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(engine.cancel(&execution_id));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.execution_id, execution_id);
        assert!(!engine.cancel(&execution_id));
        assert!(engine.running_executions().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_run_leaves_no_running_entry() {
        let engine = engine();
        engine.load_workflow(HANGING).unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(50), engine.run("hanging", Map::new())).await;
        assert!(timed_out.is_err());
        assert!(engine.running_executions().is_empty());
        assert!(engine.get_execution_history().is_empty());
    }

    #[tokio::test]
    async fn test_history_limit_from_config() {
        let engine = engine_with(EngineConfig {
            history_limit: 2,
            ..EngineConfig::default()
        });
        engine.load_workflow(DOUBLER).unwrap();
        for x in 0..3 {
            engine.run("doubler", inputs(json!({"x": x}))).await.unwrap();
        }
        let history = engine.get_execution_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outputs["result"], json!(4));
    }
}
