//! Workflow executor: sequential DAG execution with per-step error policies.
//!
//! The executor walks the planner's order one step at a time. Each step is
//! attempted under its timeout and the run's cancellation token; failures
//! are routed through the [`ErrorPolicyHandler`].
//!
//! # Execution flow
//!
//! 1. Compute the order via [`execution_order`] (re-detects cycles).
//! 2. For each step: skip it if its branch was not taken, otherwise run it
//!    with retries, then apply skip/fallback/fail on final failure.
//! 3. Accumulate results in the `ExecutionContext`.
//! 4. On completion, resolve the declared outputs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use stepflow_types::execution::{ExecutionMetadata, ExecutionResult, RunStatus, StepResult, StepStatus};
use stepflow_types::workflow::{StepSpec, ValueType, WorkflowDefinition};
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;
use super::dag::execution_order;
use super::definition::WorkflowError;
use super::policy::{ErrorPolicyHandler, PolicyDecision};
use super::step_runner::{StepError, StepRunner, project_outputs};
use super::template::resolve_template;

// ---------------------------------------------------------------------------
// Attempt bookkeeping
// ---------------------------------------------------------------------------

/// A step that produced a (projected) result.
struct StepSuccess {
    value: Value,
    not_taken: Option<String>,
    retries: u32,
    duration_ms: u64,
}

/// A step whose attempts are exhausted.
struct StepFailure {
    error: StepError,
    retries: u32,
    duration_ms: u64,
}

/// Why the loop stopped early.
enum Halt {
    Failed(String),
    Cancelled,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

pub struct WorkflowExecutor {
    runner: Arc<StepRunner>,
    retry_delay: Duration,
}

impl WorkflowExecutor {
    pub fn new(runner: Arc<StepRunner>, retry_delay: Duration) -> Self {
        Self { runner, retry_delay }
    }

    /// Execute `definition` with already validated inputs.
    ///
    /// Planning errors are returned as `Err`; everything that happens once
    /// steps start running is reported in the `ExecutionResult`.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        inputs: Map<String, Value>,
        execution_id: String,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, WorkflowError> {
        let order = execution_order(definition.steps())?;
        let mut ctx = ExecutionContext::new(definition, execution_id, inputs);
        let mut step_results: IndexMap<String, StepResult> = IndexMap::new();
        let mut branch_skipped: HashSet<String> = HashSet::new();

        tracing::info!(
            execution_id = ctx.execution_id.as_str(),
            workflow = definition.name(),
            steps = order.len(),
            "starting workflow execution"
        );

        let mut halt = None;
        for step in order {
            if cancel.is_cancelled() {
                halt = Some(Halt::Cancelled);
                break;
            }

            // Already executed as another step's fallback.
            if step_results.contains_key(&step.id) {
                continue;
            }

            let all_deps_skipped = !step.depends_on.is_empty()
                && step.depends_on.iter().all(|d| branch_skipped.contains(d));
            if branch_skipped.contains(&step.id) || all_deps_skipped {
                tracing::debug!(step_id = step.id.as_str(), "branch not taken, skipping step");
                branch_skipped.insert(step.id.clone());
                step_results.insert(step.id.clone(), StepResult::skipped("branch not taken"));
                continue;
            }

            ctx.current_step = Some(step.id.clone());
            match self.run_with_retries(step, &ctx, cancel).await {
                Ok(success) => {
                    if let Some(target) = &success.not_taken {
                        if !step_results.contains_key(target) {
                            branch_skipped.insert(target.clone());
                        }
                    }
                    if let Err(e) = self.record_success(&mut ctx, &mut step_results, step, success) {
                        halt = Some(Halt::Failed(e.to_string()));
                        break;
                    }
                }
                Err(failure) if failure.error.is_cancelled() => {
                    step_results.insert(
                        step.id.clone(),
                        StepResult::failed(failure.error.to_string(), failure.duration_ms, failure.retries),
                    );
                    halt = Some(Halt::Cancelled);
                    break;
                }
                Err(failure) => {
                    if let Some(stop) = self
                        .apply_policy(definition, &mut ctx, &mut step_results, step, failure, cancel)
                        .await
                    {
                        halt = Some(stop);
                        break;
                    }
                }
            }
        }
        ctx.current_step = None;

        let (status, error) = match halt {
            None => (RunStatus::Completed, None),
            Some(Halt::Failed(message)) => (RunStatus::Failed, Some(message)),
            Some(Halt::Cancelled) => (RunStatus::Cancelled, Some("execution cancelled".to_string())),
        };

        let outputs = if status == RunStatus::Completed {
            resolve_outputs(definition, &ctx)
        } else {
            Map::new()
        };

        let completed_steps = step_results
            .values()
            .filter(|r| r.status == StepStatus::Completed)
            .count();
        let result = ExecutionResult {
            execution_id: ctx.execution_id.clone(),
            workflow_name: definition.name().to_string(),
            status,
            success: status == RunStatus::Completed,
            outputs,
            error,
            execution_time_ms: ctx.elapsed_ms(),
            step_results,
            metadata: ExecutionMetadata {
                workflow_name: definition.name().to_string(),
                executed_at: ctx.start_time,
                total_steps: definition.steps().len(),
                completed_steps,
            },
        };

        tracing::info!(
            execution_id = result.execution_id.as_str(),
            workflow = definition.name(),
            status = %result.status,
            duration_ms = result.execution_time_ms,
            "workflow execution finished"
        );

        Ok(result)
    }

    /// Run one step, re-attempting while its policy allows.
    async fn run_with_retries(
        &self,
        step: &StepSpec,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepSuccess, StepFailure> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                step_id = step.id.as_str(),
                step_type = %step.step_type,
                attempt,
                "running step"
            );

            let error = match self.attempt(step, ctx, cancel).await {
                Ok((value, not_taken)) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    tracing::debug!(step_id = step.id.as_str(), duration_ms, "step completed");
                    return Ok(StepSuccess {
                        value,
                        not_taken,
                        retries: attempt - 1,
                        duration_ms,
                    });
                }
                Err(e) => e,
            };

            if !ErrorPolicyHandler::should_retry(step, attempt, &error) {
                return Err(StepFailure {
                    error,
                    retries: attempt - 1,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }

            tracing::warn!(
                step_id = step.id.as_str(),
                attempt,
                max_attempts = ErrorPolicyHandler::max_attempts(step),
                error = %error,
                "step failed, retrying"
            );

            if !self.retry_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(StepFailure {
                            error: StepError::Cancelled,
                            retries: attempt - 1,
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
    }

    /// A single attempt under the step timeout and the run's cancellation.
    async fn attempt(
        &self,
        step: &StepSpec,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(Value, Option<String>), StepError> {
        let limit = self.runner.timeout_for(step);
        let run = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, self.runner.run(step, ctx))
                    .await
                    .unwrap_or_else(|_| {
                        Err(StepError::Timeout {
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }),
                None => self.runner.run(step, ctx).await,
            }
        };

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            output = run => output?,
        };

        let not_taken = output.not_taken().map(str::to_string);
        let value = project_outputs(step, output.to_value())?;
        Ok((value, not_taken))
    }

    fn record_success(
        &self,
        ctx: &mut ExecutionContext,
        step_results: &mut IndexMap<String, StepResult>,
        step: &StepSpec,
        success: StepSuccess,
    ) -> Result<(), WorkflowError> {
        ctx.set_step_result(&step.id, success.value.clone())?;
        step_results.insert(
            step.id.clone(),
            StepResult::completed(success.value, success.duration_ms, success.retries),
        );
        Ok(())
    }

    /// Apply the failed step's policy. Returns `Some` when the run must stop.
    async fn apply_policy(
        &self,
        definition: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        step_results: &mut IndexMap<String, StepResult>,
        step: &StepSpec,
        failure: StepFailure,
        cancel: &CancellationToken,
    ) -> Option<Halt> {
        let message = failure.error.to_string();
        let failed = StepResult::failed(message.clone(), failure.duration_ms, failure.retries);

        match ErrorPolicyHandler::decide(step) {
            PolicyDecision::Fail => {
                tracing::error!(step_id = step.id.as_str(), error = %message, "step failed, aborting run");
                step_results.insert(step.id.clone(), failed);
                Some(Halt::Failed(format!("step '{}' failed: {message}", step.id)))
            }
            PolicyDecision::Skip => {
                tracing::warn!(step_id = step.id.as_str(), error = %message, "step failed, skipping");
                step_results.insert(step.id.clone(), failed);
                None
            }
            PolicyDecision::Fallback(target) => {
                tracing::warn!(
                    step_id = step.id.as_str(),
                    fallback_step = target.as_str(),
                    error = %message,
                    "step failed, running fallback"
                );

                let value = match self
                    .fallback_value(definition, ctx, step_results, &target, cancel)
                    .await
                {
                    Ok(value) => value,
                    Err(fallback_error) => {
                        step_results.insert(step.id.clone(), failed);
                        return Some(match fallback_error {
                            StepError::Cancelled => Halt::Cancelled,
                            e => Halt::Failed(format!(
                                "step '{}' failed ({message}) and fallback '{target}' failed: {e}",
                                step.id
                            )),
                        });
                    }
                };

                if let Err(e) = ctx.set_step_result(&step.id, value.clone()) {
                    step_results.insert(step.id.clone(), failed);
                    return Some(Halt::Failed(e.to_string()));
                }
                step_results.insert(
                    step.id.clone(),
                    StepResult::completed(value, failure.duration_ms, failure.retries).with_fallback(target),
                );
                None
            }
        }
    }

    /// The fallback step's result: reused when it already ran, otherwise the
    /// fallback step is executed now and recorded under its own id.
    async fn fallback_value(
        &self,
        definition: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        step_results: &mut IndexMap<String, StepResult>,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        if let Some(existing) = ctx.get_step_result(target) {
            return Ok(existing.clone());
        }

        let fallback = definition
            .step(target)
            .ok_or_else(|| StepError::ExecutionFailed(format!("fallback step '{target}' does not exist")))?;

        match self.run_with_retries(fallback, ctx, cancel).await {
            Ok(success) => {
                let value = success.value.clone();
                self.record_success(ctx, step_results, fallback, success)
                    .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
                Ok(value)
            }
            Err(failure) => {
                step_results.insert(
                    target.to_string(),
                    StepResult::failed(failure.error.to_string(), failure.duration_ms, failure.retries),
                );
                Err(failure.error)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Resolve declared outputs. An output that cannot be resolved is `null`.
fn resolve_outputs(definition: &WorkflowDefinition, ctx: &ExecutionContext) -> Map<String, Value> {
    let mut outputs = Map::new();
    for (name, spec) in &definition.outputs {
        let value = match resolve_template(&spec.source, ctx) {
            Ok(value) => coerce_output(value, spec.output_type),
            Err(e) => {
                tracing::warn!(output = name.as_str(), error = %e, "output could not be resolved");
                Value::Null
            }
        };
        outputs.insert(name.clone(), value);
    }
    outputs
}

/// Parse string values into the declared output type when possible.
fn coerce_output(value: Value, declared: Option<ValueType>) -> Value {
    let (Value::String(s), Some(declared)) = (&value, declared) else {
        return value;
    };
    let text = s.trim();
    let parsed = match declared {
        ValueType::String => None,
        ValueType::Integer => text.parse::<i64>().ok().map(Value::from),
        ValueType::Number => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ValueType::Boolean => text.parse::<bool>().ok().map(Value::Bool),
        ValueType::Array | ValueType::Object => serde_json::from_str::<Value>(text)
            .ok()
            .filter(|v| declared.matches(v)),
    };
    parsed.unwrap_or(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
