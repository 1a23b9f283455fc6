//! JavaScript sandbox for `code` steps, built on boa_engine.
//!
//! Each execution gets a fresh `boa_engine::Context` with no host
//! capabilities beyond the ECMAScript built-ins (JSON, Math, ...) and a
//! captured `console`. Scope variables are injected as globals, `main` is
//! called with the declared inputs, and its return value comes back as JSON.
//!
//! Limits: code size, an estimate of the injected data against the memory
//! limit, boa's loop-iteration and recursion limits, output size, and a
//! wall-clock timeout. boa cannot be interrupted, so after a timeout the
//! blocking thread runs on until the loop or recursion limit stops it.
//!
//! The memory limit is checked once, before the script starts. boa has no
//! heap cap, so allocations made while the script runs are bounded only
//! indirectly by the loop-iteration limit and the output size check.

use std::sync::LazyLock;
use std::time::Instant;

use boa_engine::property::Attribute;
use boa_engine::{Context, JsString, Source};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use stepflow_core::workflow::step_runner::{BoxFuture, CodeSandbox, SandboxRequest, StepError};
use stepflow_types::config::SandboxLimits;
use stepflow_types::workflow::CodeLanguage;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static regex"));

/// Names that cannot be injected as globals.
const RESERVED_NAMES: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "new", "null", "return", "super", "switch", "this", "throw", "true", "try",
    "typeof", "var", "void", "while", "with", "yield", "let", "static", "implements", "interface",
    "package", "private", "protected", "public", "await", "arguments", "eval", "undefined", "NaN",
    "Infinity", "globalThis", "console", "main", "JSON", "Math", "Object", "Array", "String",
    "Number", "Boolean", "Date", "Error", "RegExp", "Promise",
];

const PAYLOAD_GLOBAL: &str = "__stepflow_payload";

const PRELUDE: &str = r#"
var __logs = [];
var console = (function () {
  function capture(level) {
    return function () {
      var parts = [];
      for (var i = 0; i < arguments.length; i++) {
        var a = arguments[i];
        parts.push(typeof a === 'object' && a !== null ? JSON.stringify(a) : String(a));
      }
      __logs.push({ level: level, message: parts.join(' ') });
    };
  }
  return { log: capture('info'), info: capture('info'), debug: capture('debug'),
           warn: capture('warn'), error: capture('error') };
})();
var __payload = JSON.parse(__stepflow_payload);
Object.keys(__payload.bindings).forEach(function (k) { globalThis[k] = __payload.bindings[k]; });
"#;

const EPILOGUE: &str = r#"
;(function () {
  if (typeof main !== 'function') {
    throw new Error('code must define a main function');
  }
  var __result = main.apply(null, __payload.args);
  return JSON.stringify({ output: __result === undefined ? null : __result, logs: __logs });
})();
"#;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("code too large: {actual} bytes (max {max})")]
    CodeTooLarge { max: usize, actual: usize },

    #[error("memory limit exceeded: ~{estimate} bytes of code and bindings (limit {limit})")]
    MemoryLimitExceeded { estimate: usize, limit: usize },

    #[error("output too large: {actual} bytes (max {max})")]
    OutputTooLarge { max: usize, actual: usize },

    #[error("execution timed out after {0} ms")]
    Timeout(u64),

    #[error("runtime limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SandboxError> for StepError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::Timeout(timeout_ms) => StepError::Timeout { timeout_ms },
            other => StepError::Sandbox(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsoleLine {
    pub level: String,
    pub message: String,
}

/// What a successful script run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    pub output: Value,
    pub logs: Vec<ConsoleLine>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    logs: Vec<ConsoleLine>,
}

/// Scope variables that can be exposed as JavaScript globals.
fn injectable_bindings(bindings: &Map<String, Value>) -> Map<String, Value> {
    bindings
        .iter()
        .filter(|(name, _)| IDENTIFIER.is_match(name))
        .filter(|(name, _)| !name.starts_with("__"))
        .filter(|(name, _)| !RESERVED_NAMES.iter().any(|r| *r == name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Run `code` synchronously under `limits`.
pub fn run_script(
    limits: &SandboxLimits,
    code: &str,
    args: &[Value],
    bindings: &Map<String, Value>,
) -> Result<ScriptOutcome, SandboxError> {
    if code.len() > limits.max_code_bytes {
        return Err(SandboxError::CodeTooLarge {
            max: limits.max_code_bytes,
            actual: code.len(),
        });
    }

    let payload = serde_json::to_string(&json!({
        "args": args,
        "bindings": injectable_bindings(bindings),
    }))
    .map_err(|e| SandboxError::Serialization(e.to_string()))?;

    // Injected data exists at least twice in the heap (source string and parsed copy).
    let estimate = code.len() + payload.len() * 2;
    if estimate > limits.memory_limit_bytes {
        return Err(SandboxError::MemoryLimitExceeded {
            estimate,
            limit: limits.memory_limit_bytes,
        });
    }

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);
    context
        .register_global_property(
            JsString::from(PAYLOAD_GLOBAL),
            JsString::from(payload.as_str()),
            Attribute::all(),
        )
        .map_err(|e| SandboxError::Internal(e.to_string()))?;

    let source = format!("{PRELUDE}\n{code}\n{EPILOGUE}");
    let result = context
        .eval(Source::from_bytes(&source))
        .map_err(|e| classify_js_error(e.to_string()))?;

    let envelope_json = result
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| SandboxError::Internal("script did not produce a result envelope".to_string()))?;
    let envelope: Envelope =
        serde_json::from_str(&envelope_json).map_err(|e| SandboxError::Serialization(e.to_string()))?;

    let output_size = serde_json::to_string(&envelope.output)
        .map(|s| s.len())
        .map_err(|e| SandboxError::Serialization(e.to_string()))?;
    if output_size > limits.max_output_bytes {
        return Err(SandboxError::OutputTooLarge {
            max: limits.max_output_bytes,
            actual: output_size,
        });
    }

    Ok(ScriptOutcome {
        output: envelope.output,
        logs: envelope.logs,
    })
}

fn classify_js_error(message: String) -> SandboxError {
    let lower = message.to_lowercase();
    let limit_hit = ["runtimelimit", "iteration limit", "recursive calls", "recursion limit", "stack size"]
        .iter()
        .any(|needle| lower.contains(needle));
    if limit_hit {
        SandboxError::LimitExceeded(message)
    } else {
        SandboxError::Script(message)
    }
}

/// Re-emit captured console output through tracing.
fn emit_logs(step_id: &str, logs: &[ConsoleLine]) {
    for line in logs {
        let message = line.message.as_str();
        match line.level.as_str() {
            "error" => tracing::error!(target: "stepflow::sandbox", step_id, "{message}"),
            "warn" => tracing::warn!(target: "stepflow::sandbox", step_id, "{message}"),
            "debug" => tracing::debug!(target: "stepflow::sandbox", step_id, "{message}"),
            _ => tracing::info!(target: "stepflow::sandbox", step_id, "{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// JsSandbox
// ---------------------------------------------------------------------------

/// [`CodeSandbox`] for JavaScript. python3 and bash are not supported.
pub struct JsSandbox {
    limits: SandboxLimits,
}

impl JsSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    async fn execute_js(&self, request: SandboxRequest) -> Result<Value, SandboxError> {
        let limits = self.limits.clone();
        let timeout = request.timeout;
        let step_id = request.step_id.clone();
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || {
            run_script(&limits, &request.code, &request.args, &request.bindings)
        });

        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(|e| SandboxError::Internal(format!("task join error: {e}")))??,
            Err(_) => return Err(SandboxError::Timeout(timeout.as_millis() as u64)),
        };

        emit_logs(&step_id, &outcome.logs);
        tracing::debug!(
            step_id = step_id.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            console_lines = outcome.logs.len(),
            "script finished"
        );
        Ok(outcome.output)
    }
}

impl CodeSandbox for JsSandbox {
    fn supports(&self, language: CodeLanguage) -> bool {
        language == CodeLanguage::Javascript
    }

    fn execute(&self, language: CodeLanguage, request: SandboxRequest) -> BoxFuture<'_, Result<Value, StepError>> {
        Box::pin(async move {
            if !self.supports(language) {
                return Err(StepError::UnsupportedLanguage(language.to_string()));
            }
            Ok(self.execute_js(request).await?)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits() -> SandboxLimits {
        SandboxLimits::default()
    }

    fn run(code: &str, args: Value, bindings: Value) -> Result<ScriptOutcome, SandboxError> {
        run_script(
            &limits(),
            code,
            args.as_array().unwrap(),
            bindings.as_object().unwrap(),
        )
    }

    #[test]
    fn test_main_receives_positional_args() {
        let outcome = run("function main(a, b) { return { sum: a + b }; }", json!([2, 3]), json!({})).unwrap();
        assert_eq!(outcome.output, json!({"sum": 5}));
    }

    #[test]
    fn test_bindings_are_globals() {
        let outcome = run(
            "function main() { return fetch.total * 2 + sys.execution_id.length; }",
            json!([]),
            json!({"fetch": {"total": 10}, "sys": {"execution_id": "exec_1"}}),
        )
        .unwrap();
        assert_eq!(outcome.output, json!(26));
    }

    #[test]
    fn test_reserved_and_invalid_names_are_not_injected() {
        let bindings = json!({"new": 1, "my-step": 2, "__secret": 3, "ok": 4, "main": 5});
        let injected = injectable_bindings(bindings.as_object().unwrap());
        assert_eq!(injected.keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[test]
    fn test_console_is_captured() {
        let outcome = run(
            "function main() { console.log('hello', {a: 1}); console.warn('careful'); return null; }",
            json!([]),
            json!({}),
        )
        .unwrap();
        assert_eq!(outcome.output, Value::Null);
        assert_eq!(
            outcome.logs,
            vec![
                ConsoleLine { level: "info".into(), message: "hello {\"a\":1}".into() },
                ConsoleLine { level: "warn".into(), message: "careful".into() },
            ]
        );
    }

    #[test]
    fn test_undefined_result_is_null() {
        let outcome = run("function main() {}", json!([]), json!({})).unwrap();
        assert_eq!(outcome.output, Value::Null);
    }

    #[test]
    fn test_missing_main() {
        let err = run("var x = 1;", json!([]), json!({})).unwrap_err();
        assert!(err.to_string().contains("must define a main function"), "got: {err}");
    }

    #[test]
    fn test_thrown_error_is_script_error() {
        let err = run("function main() { throw new Error('boom'); }", json!([]), json!({})).unwrap_err();
        assert!(matches!(err, SandboxError::Script(ref m) if m.contains("boom")), "got: {err}");
    }

    #[test]
    fn test_loop_limit() {
        let limits = SandboxLimits {
            loop_iteration_limit: 1_000,
            ..SandboxLimits::default()
        };
        let err = run_script(&limits, "function main() { while (true) {} }", &[], &Map::new()).unwrap_err();
        assert!(matches!(err, SandboxError::LimitExceeded(_)), "got: {err}");
    }

    #[test]
    fn test_recursion_limit() {
        let limits = SandboxLimits {
            recursion_limit: 64,
            ..SandboxLimits::default()
        };
        let err = run_script(
            &limits,
            "function f(n) { return f(n + 1); } function main() { return f(0); }",
            &[],
            &Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::LimitExceeded(_)), "got: {err}");
    }

    #[test]
    fn test_code_size_limit() {
        let limits = SandboxLimits {
            max_code_bytes: 10,
            ..SandboxLimits::default()
        };
        let err = run_script(&limits, "function main() {}", &[], &Map::new()).unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { max: 10, .. }));
    }

    #[test]
    fn test_memory_estimate_limit() {
        let limits = SandboxLimits {
            memory_limit_bytes: 1_000,
            ..SandboxLimits::default()
        };
        let mut bindings = Map::new();
        bindings.insert("big".to_string(), json!("x".repeat(2_000)));
        let err = run_script(&limits, "function main() {}", &[], &bindings).unwrap_err();
        assert!(matches!(err, SandboxError::MemoryLimitExceeded { .. }), "got: {err}");
    }

    #[test]
    fn test_output_size_limit() {
        let limits = SandboxLimits {
            max_output_bytes: 100,
            ..SandboxLimits::default()
        };
        let err = run_script(&limits, "function main() { return 'y'.repeat(500); }", &[], &Map::new()).unwrap_err();
        assert!(matches!(err, SandboxError::OutputTooLarge { max: 100, .. }), "got: {err}");
    }

    fn request(code: &str, timeout: Duration) -> SandboxRequest {
        SandboxRequest {
            step_id: "calc".to_string(),
            code: code.to_string(),
            args: vec![json!(20)],
            bindings: Map::new(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_sandbox_executes_javascript() {
        let sandbox = JsSandbox::new(limits());
        let value = sandbox
            .execute(
                CodeLanguage::Javascript,
                request("function main(x) { return x + 22; }", Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_sandbox_rejects_other_languages() {
        let sandbox = JsSandbox::new(limits());
        assert!(!sandbox.supports(CodeLanguage::Python3));
        let err = sandbox
            .execute(CodeLanguage::Bash, request("echo hi", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err, StepError::UnsupportedLanguage("bash".to_string()));
    }

    #[tokio::test]
    async fn test_sandbox_timeout() {
        // The loop limit bounds how long the orphaned thread keeps running.
        let sandbox = JsSandbox::new(SandboxLimits {
            loop_iteration_limit: 5_000_000,
            ..SandboxLimits::default()
        });
        let err = sandbox
            .execute(
                CodeLanguage::Javascript,
                request("function main() { while (true) {} }", Duration::from_millis(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StepError::Timeout { timeout_ms: 1 });
    }
}
