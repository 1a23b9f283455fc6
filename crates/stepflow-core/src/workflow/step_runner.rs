//! Step runner for the executable step types.
//!
//! `StepRunner` dispatches on `StepConfig`. Each handler resolves its
//! templates against the execution context, runs the step logic and returns
//! a `StepOutput`. Code, LLM and HTTP work is delegated to collaborator
//! traits defined here and implemented in `stepflow-infra`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use stepflow_types::config::TimeoutConfig;
use stepflow_types::workflow::{
    CodeConfig, CodeLanguage, ConditionConfig, HttpConfig, HttpMethod, LlmConfig, StepConfig,
    StepSpec,
};

use super::context::ExecutionContext;
use super::expression::{ConditionEvaluator, ExpressionError};
use super::template::{TemplateError, resolve_path, resolve_string, resolve_value, tokens};

/// Boxed future returned by collaborator trait methods (keeps them dyn-compatible).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur during step execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    /// A template names something not in scope (e.g. a skipped step).
    #[error("unresolved reference '${{{reference}}}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error("path not found: '{reference}' has no '{segment}'")]
    PathNotFound { reference: String, segment: String },

    #[error("malformed reference '${{{0}}}'")]
    MalformedReference(String),

    #[error("condition evaluation failed: {0}")]
    Condition(String),

    #[error("step timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("unsupported step type: {0}")]
    UnsupportedStepType(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("step cancelled")]
    Cancelled,
}

impl StepError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

impl From<TemplateError> for StepError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::Malformed(path) => StepError::MalformedReference(path),
            TemplateError::UnresolvedReference { reference, reason } => {
                StepError::UnresolvedReference { reference, reason }
            }
            TemplateError::PathNotFound { reference, segment } => {
                StepError::PathNotFound { reference, segment }
            }
        }
    }
}

impl From<ExpressionError> for StepError {
    fn from(e: ExpressionError) -> Self {
        StepError::Condition(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Parameters for one text generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub metadata: Value,
}

/// External text-generation service used by `llm` steps.
pub trait TextGenerator: Send + Sync {
    /// False when no credentials are configured; the runner then uses the
    /// prompt-echo fallback instead of calling out.
    fn is_available(&self) -> bool;

    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation, StepError>>;
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: IndexMap<String, String>,
    /// Only set for methods that carry a body.
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

/// Generic HTTP client used by `http` steps.
pub trait HttpExecutor: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, StepError>>;
}

/// Input to a sandboxed `main` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxRequest {
    pub step_id: String,
    pub code: String,
    /// Positional arguments for `main`.
    pub args: Vec<Value>,
    /// Scope variables exposed as globals.
    pub bindings: Map<String, Value>,
    pub timeout: Duration,
}

/// Isolated code execution used by `code` steps.
pub trait CodeSandbox: Send + Sync {
    fn supports(&self, language: CodeLanguage) -> bool;

    fn execute(
        &self,
        language: CodeLanguage,
        request: SandboxRequest,
    ) -> BoxFuture<'_, Result<Value, StepError>>;
}

// ---------------------------------------------------------------------------
// StepOutput
// ---------------------------------------------------------------------------

/// Output from a step execution.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// Generic JSON output.
    Value(Value),
    /// Result of a condition step.
    Branch {
        result: bool,
        selected_step: Option<String>,
        /// The target of the branch that was not taken.
        not_taken: Option<String>,
    },
}

impl StepOutput {
    /// Convert the step output to a JSON value for context storage.
    pub fn to_value(&self) -> Value {
        match self {
            StepOutput::Value(v) => v.clone(),
            StepOutput::Branch {
                result,
                selected_step,
                ..
            } => json!({
                "result": result,
                "branch": if *result { "true" } else { "false" },
                "selected_step": selected_step,
            }),
        }
    }

    pub fn not_taken(&self) -> Option<&str> {
        match self {
            StepOutput::Branch { not_taken, .. } => not_taken.as_deref(),
            StepOutput::Value(_) => None,
        }
    }
}

/// Apply a step's `outputs` projections to its raw result.
///
/// Each projection maps a name to a dotted path inside the result; `""` and
/// `"."` select the whole result. Without projections the raw result is kept.
pub fn project_outputs(step: &StepSpec, raw: Value) -> Result<Value, StepError> {
    if step.outputs.is_empty() {
        return Ok(raw);
    }

    let mut projected = Map::new();
    for (name, path) in &step.outputs {
        let path = path.trim();
        let mut current = &raw;
        if !path.is_empty() && path != "." {
            for segment in path.split('.') {
                let next = match current {
                    Value::Object(map) => map.get(segment),
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                };
                current = next.ok_or_else(|| StepError::PathNotFound {
                    reference: format!("{}.{path}", step.id),
                    segment: segment.to_string(),
                })?;
            }
        }
        projected.insert(name.clone(), current.clone());
    }
    Ok(Value::Object(projected))
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes individual workflow steps by dispatching to type-specific handlers.
pub struct StepRunner {
    timeouts: TimeoutConfig,
    sandbox: Option<Arc<dyn CodeSandbox>>,
    generator: Option<Arc<dyn TextGenerator>>,
    http: Option<Arc<dyn HttpExecutor>>,
}

impl StepRunner {
    /// A runner with no collaborators: code and HTTP steps fail, LLM steps use
    /// the fallback.
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self {
            timeouts,
            sandbox: None,
            generator: None,
            http: None,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpExecutor>) -> Self {
        self.http = Some(http);
        self
    }

    /// Wall-clock limit for a step: its own `timeout`, else the engine default
    /// for its type. Start, end and condition steps are unbounded.
    pub fn timeout_for(&self, step: &StepSpec) -> Option<Duration> {
        let ms = match &step.config {
            StepConfig::Code(c) => c.timeout.unwrap_or(self.timeouts.code_ms),
            StepConfig::Llm(c) => c.timeout.unwrap_or(self.timeouts.llm_ms),
            StepConfig::Http(c) => c.timeout.unwrap_or(self.timeouts.http_ms),
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }

    /// Run a step and return its output.
    pub async fn run(&self, step: &StepSpec, ctx: &ExecutionContext) -> Result<StepOutput, StepError> {
        match &step.config {
            StepConfig::Start => Ok(StepOutput::Value(json!({ "started_at": Utc::now().to_rfc3339() }))),
            StepConfig::End => Ok(StepOutput::Value(json!({ "completed_at": Utc::now().to_rfc3339() }))),
            StepConfig::Code(config) => self.run_code(step, config, ctx).await,
            StepConfig::Llm(config) => self.run_llm(config, ctx).await,
            StepConfig::Http(config) => self.run_http(step, config, ctx).await,
            StepConfig::Condition(config) => Self::run_condition(config, ctx),
            StepConfig::Reserved(_) => Err(StepError::UnsupportedStepType(step.step_type.to_string())),
        }
    }

    async fn run_code(
        &self,
        step: &StepSpec,
        config: &CodeConfig,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let sandbox = self
            .sandbox
            .as_ref()
            .filter(|s| s.supports(config.language))
            .ok_or_else(|| StepError::UnsupportedLanguage(config.language.to_string()))?;

        // main(...) receives declared inputs in declaration order.
        let args: Vec<Value> = ctx
            .declared_inputs()
            .iter()
            .filter_map(|name| ctx.inputs.get(name).cloned())
            .collect();

        let request = SandboxRequest {
            step_id: step.id.clone(),
            code: config.code.clone(),
            args,
            bindings: ctx.variables(),
            timeout: Duration::from_millis(config.timeout.unwrap_or(self.timeouts.code_ms)),
        };

        tracing::debug!(step_id = step.id.as_str(), language = %config.language, "running code step");
        let value = sandbox.execute(config.language, request).await?;
        Ok(StepOutput::Value(value))
    }

    async fn run_llm(&self, config: &LlmConfig, ctx: &ExecutionContext) -> Result<StepOutput, StepError> {
        let prompt = resolve_string(&config.prompt, ctx)?;
        let system_prompt = config
            .system_prompt
            .as_deref()
            .map(|s| resolve_string(s, ctx))
            .transpose()?;

        let generator = self.generator.as_ref().filter(|g| g.is_available());
        let Some(generator) = generator else {
            tracing::debug!(model = config.model.as_str(), "no text generator available, using fallback");
            return Ok(StepOutput::Value(json!({
                "text": prompt,
                "metadata": {
                    "model": config.model,
                    "generated_at": Utc::now().to_rfc3339(),
                    "method": "fallback",
                },
            })));
        };

        let generation = generator
            .generate(GenerationRequest {
                model: config.model.clone(),
                prompt,
                system_prompt,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            })
            .await?;

        Ok(StepOutput::Value(json!({
            "text": generation.text,
            "metadata": generation.metadata,
        })))
    }

    async fn run_http(
        &self,
        step: &StepSpec,
        config: &HttpConfig,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let url = resolve_string(&config.url, ctx)?;
        url::Url::parse(&url).map_err(|e| StepError::Http(format!("invalid url '{url}': {e}")))?;

        let mut headers = IndexMap::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            headers.insert(name.clone(), resolve_string(value, ctx)?);
        }

        let body = match &config.body {
            Some(body) if config.method.carries_body() => Some(resolve_value(body, ctx)?),
            _ => None,
        };

        let http = self
            .http
            .as_ref()
            .ok_or_else(|| StepError::Http("no HTTP client configured".to_string()))?;

        let request = HttpRequest {
            method: config.method,
            url: url.clone(),
            headers,
            body,
            timeout: Duration::from_millis(config.timeout.unwrap_or(self.timeouts.http_ms)),
        };

        tracing::debug!(step_id = step.id.as_str(), method = %config.method, url = url.as_str(), "sending request");
        let response = http.execute(request).await?;

        if response.status >= 400 {
            return Err(StepError::Http(format!(
                "{} {url} returned status {}",
                config.method, response.status
            )));
        }

        let data = serde_json::from_str::<Value>(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.clone()));

        Ok(StepOutput::Value(json!({
            "status": response.status,
            "headers": response.headers,
            "data": data,
        })))
    }

    fn run_condition(config: &ConditionConfig, ctx: &ExecutionContext) -> Result<StepOutput, StepError> {
        // Tokens follow template rules, so a skipped step is an unresolved
        // reference rather than an undefined JEXL identifier.
        for token in tokens(&config.condition) {
            resolve_path(token.path, ctx)?;
        }
        // Built per call: the evaluator's transforms are not Send.
        let result = ConditionEvaluator::new().evaluate_condition(&config.condition, &ctx.expression_scope())?;

        let (selected_step, not_taken) = if result {
            (config.true_step.clone(), config.false_step.clone())
        } else {
            (config.false_step.clone(), config.true_step.clone())
        };

        Ok(StepOutput::Branch {
            result,
            selected_step,
            not_taken,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::new_execution_id;
    use std::sync::Mutex;
    use stepflow_types::workflow::WorkflowDefinition;

    // -- stubs ----------------------------------------------------------------

    /// Returns the first argument plus one, and records the request.
    struct AddOneSandbox {
        seen: Mutex<Vec<SandboxRequest>>,
    }

    impl CodeSandbox for AddOneSandbox {
        fn supports(&self, language: CodeLanguage) -> bool {
            language == CodeLanguage::Javascript
        }

        fn execute(&self, _language: CodeLanguage, request: SandboxRequest) -> BoxFuture<'_, Result<Value, StepError>> {
            Box::pin(async move {
                let first = request.args.first().and_then(Value::as_i64).unwrap_or(0);
                self.seen.lock().unwrap().push(request);
                Ok(json!(first + 1))
            })
        }
    }

    struct EchoGenerator;

    impl TextGenerator for EchoGenerator {
        fn is_available(&self) -> bool {
            true
        }

        fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation, StepError>> {
            Box::pin(async move {
                Ok(Generation {
                    text: format!("echo: {}", request.prompt),
                    metadata: json!({"model": request.model}),
                })
            })
        }
    }

    struct CannedHttp {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl HttpExecutor for CannedHttp {
        fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, StepError>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(request);
                Ok(HttpResponse {
                    status: self.status,
                    headers: IndexMap::new(),
                    body: self.body.to_string(),
                })
            })
        }
    }

    // -- helpers --------------------------------------------------------------

    fn definition(steps: Value) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "metadata": {"name": "runner_test", "description": "runner test", "version": "1.0.0"},
            "inputs": {"x": {"type": "integer"}, "y": {"type": "integer"}, "topic": {"type": "string"}},
            "workflow": {"steps": steps},
            "outputs": {}
        }))
        .unwrap()
    }

    fn context(def: &WorkflowDefinition, inputs: Value) -> ExecutionContext {
        ExecutionContext::new(def, new_execution_id(), inputs.as_object().unwrap().clone())
    }

    fn runner() -> StepRunner {
        StepRunner::new(TimeoutConfig::default())
    }

    // -- tests ----------------------------------------------------------------

    #[tokio::test]
    async fn test_start_and_end() {
        let def = definition(json!([{"id": "start", "type": "start"}, {"id": "end", "type": "end"}]));
        let ctx = context(&def, json!({}));
        let start = runner().run(&def.steps()[0], &ctx).await.unwrap();
        assert!(start.to_value()["started_at"].is_string());
        let end = runner().run(&def.steps()[1], &ctx).await.unwrap();
        assert!(end.to_value()["completed_at"].is_string());
    }

    #[tokio::test]
    async fn test_code_step_args_in_declaration_order() {
        let def = definition(json!([{"id": "calc", "type": "code", "config": {"code": "function main(x, y) {}"}}]));
        // y is supplied first, x second; topic is absent and skipped.
        let ctx = context(&def, json!({"y": 5, "x": 41}));
        let sandbox = Arc::new(AddOneSandbox { seen: Mutex::new(vec![]) });
        let runner = runner().with_sandbox(sandbox.clone());

        let out = runner.run(&def.steps()[0], &ctx).await.unwrap();
        assert_eq!(out.to_value(), json!(42));

        let seen = sandbox.seen.lock().unwrap();
        assert_eq!(seen[0].args, vec![json!(41), json!(5)]);
        assert_eq!(seen[0].bindings["sys"]["workflow_name"], json!("runner_test"));
        assert_eq!(seen[0].timeout, Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_code_step_unsupported_language() {
        let def = definition(json!([{"id": "py", "type": "code", "config": {"language": "python3", "code": "def main(): pass"}}]));
        let ctx = context(&def, json!({}));
        let runner = runner().with_sandbox(Arc::new(AddOneSandbox { seen: Mutex::new(vec![]) }));
        let err = runner.run(&def.steps()[0], &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::UnsupportedLanguage(ref l) if l == "python3"), "got: {err}");
    }

    #[tokio::test]
    async fn test_llm_fallback_without_generator() {
        let def = definition(json!([{"id": "ask", "type": "llm",
            "config": {"model": "m1", "prompt": "Write about ${topic}"}}]));
        let ctx = context(&def, json!({"topic": "rust"}));
        let out = runner().run(&def.steps()[0], &ctx).await.unwrap().to_value();
        assert_eq!(out["text"], json!("Write about rust"));
        assert_eq!(out["metadata"]["method"], json!("fallback"));
        assert_eq!(out["metadata"]["model"], json!("m1"));
    }

    #[tokio::test]
    async fn test_llm_with_generator() {
        let def = definition(json!([{"id": "ask", "type": "llm",
            "config": {"model": "m1", "prompt": "Hi ${topic}"}}]));
        let ctx = context(&def, json!({"topic": "there"}));
        let runner = runner().with_generator(Arc::new(EchoGenerator));
        let out = runner.run(&def.steps()[0], &ctx).await.unwrap().to_value();
        assert_eq!(out["text"], json!("echo: Hi there"));
    }

    #[tokio::test]
    async fn test_http_step_parses_json_and_drops_get_body() {
        let def = definition(json!([{"id": "call", "type": "http", "config": {
            "url": "https://api.example.com/items/${x}",
            "headers": {"x-id": "${sys.workflow_name}"},
            "body": {"ignored": true}
        }}]));
        let ctx = context(&def, json!({"x": 7}));
        let http = Arc::new(CannedHttp { status: 200, body: r#"{"ok": true}"#, seen: Mutex::new(vec![]) });
        let runner = runner().with_http(http.clone());

        let out = runner.run(&def.steps()[0], &ctx).await.unwrap().to_value();
        assert_eq!(out["status"], json!(200));
        assert_eq!(out["data"]["ok"], json!(true));

        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://api.example.com/items/7");
        assert_eq!(seen[0].headers["x-id"], "runner_test");
        assert_eq!(seen[0].body, None);
    }

    #[tokio::test]
    async fn test_http_post_body_and_error_status() {
        let def = definition(json!([{"id": "call", "type": "http", "config": {
            "url": "https://api.example.com/items", "method": "POST", "body": {"n": "${x}"}
        }}]));
        let ctx = context(&def, json!({"x": 7}));
        let http = Arc::new(CannedHttp { status: 503, body: "down", seen: Mutex::new(vec![]) });
        let runner = runner().with_http(http.clone());

        let err = runner.run(&def.steps()[0], &ctx).await.unwrap_err();
        assert!(err.to_string().contains("503"), "got: {err}");
        assert_eq!(http.seen.lock().unwrap()[0].body, Some(json!({"n": 7})));
    }

    #[tokio::test]
    async fn test_http_text_body_kept_as_string() {
        let def = definition(json!([{"id": "call", "type": "http", "config": {"url": "https://example.com"}}]));
        let ctx = context(&def, json!({}));
        let runner = runner().with_http(Arc::new(CannedHttp { status: 200, body: "plain text", seen: Mutex::new(vec![]) }));
        let out = runner.run(&def.steps()[0], &ctx).await.unwrap().to_value();
        assert_eq!(out["data"], json!("plain text"));
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_step_error() {
        let def = definition(json!([{"id": "ask", "type": "llm",
            "config": {"model": "m1", "prompt": "Use ${gone.text}"}}]));
        let ctx = context(&def, json!({}));
        let err = runner().run(&def.steps()[0], &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::UnresolvedReference { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn test_condition_branches() {
        let def = definition(json!([{"id": "check", "type": "condition", "config": {
            "condition": "${x} > 10", "true_step": "big", "false_step": "small"
        }}]));
        let ctx = context(&def, json!({"x": 3}));
        let out = runner().run(&def.steps()[0], &ctx).await.unwrap();
        assert_eq!(out.not_taken(), Some("big"));
        assert_eq!(
            out.to_value(),
            json!({"result": false, "branch": "false", "selected_step": "small"})
        );
    }

    #[tokio::test]
    async fn test_reserved_type_is_unsupported() {
        let def = definition(json!([{"id": "each", "type": "loop"}]));
        let ctx = context(&def, json!({}));
        let err = runner().run(&def.steps()[0], &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::UnsupportedStepType(_)));
    }

    #[test]
    fn test_timeouts() {
        let def = definition(json!([
            {"id": "a", "type": "code", "config": {"code": "x", "timeout": 5}},
            {"id": "b", "type": "http", "config": {"url": "https://example.com"}},
            {"id": "c", "type": "start"}
        ]));
        let runner = runner();
        assert_eq!(runner.timeout_for(&def.steps()[0]), Some(Duration::from_millis(5)));
        assert_eq!(runner.timeout_for(&def.steps()[1]), Some(Duration::from_millis(30_000)));
        assert_eq!(runner.timeout_for(&def.steps()[2]), None);
    }

    #[test]
    fn test_project_outputs() {
        let def = definition(json!([{"id": "call", "type": "start",
            "outputs": {"total": "data.total", "first": "data.items.0", "all": "."}}]));
        let raw = json!({"data": {"total": 2, "items": ["a", "b"]}});
        let projected = project_outputs(&def.steps()[0], raw.clone()).unwrap();
        assert_eq!(projected["total"], json!(2));
        assert_eq!(projected["first"], json!("a"));
        assert_eq!(projected["all"], raw);

        let err = project_outputs(&def.steps()[0], json!({"data": {}})).unwrap_err();
        assert!(matches!(err, StepError::PathNotFound { .. }));
    }
}
