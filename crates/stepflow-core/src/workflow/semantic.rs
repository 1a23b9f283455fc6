//! Cross-step semantic validation.
//!
//! Runs on a raw document that already passed the schema check, so the
//! overall shape (steps are objects with a string `id` and a known `type`)
//! can be relied upon. Config contents are not schema-checked and are read
//! leniently here.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use stepflow_types::validation::{Severity, ValidationError, ValidationResult, ValidationWarning};
use stepflow_types::workflow::{CodeLanguage, HttpMethod, StepType, ValueType};

use super::dag::{DagNode, DependencyGraph, format_cycle};
use super::template::{mask_tokens, parse_path, tokens};

/// Step ids that would shadow a reference namespace.
const RESERVED_IDS: [&str; 3] = ["sys", "input", "inputs"];

const MAX_CODE_CHARS: usize = 5000;
const MIN_PROMPT_CHARS: usize = 20;
const MAX_PROMPT_CHARS: usize = 8000;

static MAIN_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfunction\s+main\s*\(|\b(?:const|let|var)\s+main\s*=").expect("static regex")
});

// ---------------------------------------------------------------------------
// Raw step view
// ---------------------------------------------------------------------------

/// A validated-by-schema step read straight from the document.
struct RawStepView<'a> {
    index: usize,
    id: &'a str,
    step_type: StepType,
    depends_on: Vec<String>,
    config: Option<&'a Map<String, Value>>,
    error_handling: Option<&'a Map<String, Value>>,
}

impl RawStepView<'_> {
    fn path(&self) -> String {
        format!("/workflow/steps/{}", self.index)
    }

    fn config_path(&self, key: &str) -> String {
        format!("/workflow/steps/{}/config/{key}", self.index)
    }

    fn config_str(&self, key: &str) -> Option<&str> {
        self.config.and_then(|c| c.get(key)).and_then(Value::as_str)
    }
}

impl DagNode for RawStepView<'_> {
    fn node_id(&self) -> &str {
        self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

fn step_views(document: &Value) -> Vec<RawStepView<'_>> {
    let Some(steps) = document.pointer("/workflow/steps").and_then(Value::as_array) else {
        return Vec::new();
    };

    steps
        .iter()
        .enumerate()
        .filter_map(|(index, step)| {
            let map = step.as_object()?;
            let id = map.get("id")?.as_str()?;
            let step_type = map.get("type")?.as_str()?.parse().ok()?;
            let depends_on = map
                .get("depends_on")
                .and_then(Value::as_array)
                .map(|deps| {
                    deps.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(RawStepView {
                index,
                id,
                step_type,
                depends_on,
                config: map.get("config").and_then(Value::as_object),
                error_handling: map.get("error_handling").and_then(Value::as_object),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Check cross-step invariants of a schema-valid document.
pub fn validate_semantics(document: &Value) -> ValidationResult {
    let workflow_name = document
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let steps = step_views(document);
    let inputs: Vec<&str> = document
        .get("inputs")
        .and_then(Value::as_object)
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut checker = SemanticChecker {
        result: ValidationResult::new(workflow_name),
        step_ids: steps.iter().map(|s| s.id).collect(),
        inputs,
        graph: DependencyGraph::build(&steps),
    };

    checker.check_ids(&steps);
    checker.check_dependencies(&steps);
    checker.check_cycles();
    checker.check_flow_shape(&steps);
    for step in &steps {
        checker.check_step_config(step);
        checker.check_error_handling(step);
        checker.check_step_references(step);
    }
    checker.check_output_references(document);
    checker.check_input_specs(document);

    checker.result
}

struct SemanticChecker<'a> {
    result: ValidationResult,
    step_ids: HashSet<&'a str>,
    inputs: Vec<&'a str>,
    graph: DependencyGraph<'a>,
}

impl<'a> SemanticChecker<'a> {
    fn error(&mut self, code: &str, severity: Severity, path: String, message: String) {
        self.result
            .error(ValidationError::new(code, severity, message).at(path));
    }

    fn warn(&mut self, code: &str, path: String, message: String) {
        self.result.warning(ValidationWarning::new(code, message).at(path));
    }

    fn warn_suggest(&mut self, code: &str, path: String, message: String, suggestion: &str) {
        self.result
            .warning(ValidationWarning::new(code, message).at(path).suggest(suggestion));
    }

    fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| *i == name)
    }

    // -- ids and graph -----------------------------------------------------

    fn check_ids(&mut self, steps: &[RawStepView<'a>]) {
        let mut seen = HashSet::new();
        for step in steps {
            if !seen.insert(step.id) {
                self.error(
                    "DUPLICATE_STEP_ID",
                    Severity::Critical,
                    format!("{}/id", step.path()),
                    format!("duplicate step id '{}'", step.id),
                );
            }
            if RESERVED_IDS.iter().any(|r| *r == step.id) {
                self.error(
                    "RESERVED_STEP_ID",
                    Severity::Critical,
                    format!("{}/id", step.path()),
                    format!("step id '{}' is reserved for references", step.id),
                );
            }
        }
    }

    fn check_dependencies(&mut self, steps: &[RawStepView<'a>]) {
        for step in steps {
            for (j, dep) in step.depends_on.iter().enumerate() {
                if !self.step_ids.contains(dep.as_str()) {
                    self.error(
                        "MISSING_DEPENDENCY",
                        Severity::High,
                        format!("{}/depends_on/{j}", step.path()),
                        format!("step '{}' depends on unknown step '{dep}'", step.id),
                    );
                }
            }
        }
    }

    fn check_cycles(&mut self) {
        for cycle in self.graph.find_cycles() {
            self.error(
                "CIRCULAR_DEPENDENCY",
                Severity::Critical,
                "/workflow/steps".to_string(),
                format!("circular dependency: {}", format_cycle(&cycle)),
            );
        }
    }

    fn check_flow_shape(&mut self, steps: &[RawStepView<'a>]) {
        let starts: Vec<&str> = steps
            .iter()
            .filter(|s| s.step_type == StepType::Start)
            .map(|s| s.id)
            .collect();

        match starts.len() {
            0 => self.warn_suggest(
                "NO_START_STEP",
                "/workflow/steps".to_string(),
                "workflow has no start step".to_string(),
                "add a step with type: start",
            ),
            1 => {}
            n => self.warn(
                "MULTIPLE_START_STEPS",
                "/workflow/steps".to_string(),
                format!("workflow has {n} start steps: {}", starts.join(", ")),
            ),
        }

        if !steps.iter().any(|s| s.step_type == StepType::End) {
            self.warn_suggest(
                "NO_END_STEP",
                "/workflow/steps".to_string(),
                "workflow has no end step".to_string(),
                "add a step with type: end",
            );
        }

        // Without a start step every step would be reported; NO_START_STEP covers it.
        if !starts.is_empty() {
            let reachable = self.graph.reachable_from(&starts);
            for step in steps {
                if !reachable.contains(step.id) {
                    self.warn(
                        "UNREACHABLE_STEP",
                        step.path(),
                        format!("step '{}' is not reachable from any start step", step.id),
                    );
                }
            }
        }

        for step in steps {
            match step.step_type {
                StepType::Start if !step.depends_on.is_empty() => self.warn(
                    "START_STEP_DEPENDENCIES",
                    format!("{}/depends_on", step.path()),
                    format!("start step '{}' should not declare dependencies", step.id),
                ),
                StepType::End if step.depends_on.is_empty() => self.warn(
                    "END_STEP_NO_DEPENDENCIES",
                    step.path(),
                    format!("end step '{}' should depend on at least one step", step.id),
                ),
                _ => {}
            }
        }
    }

    // -- per-type config ---------------------------------------------------

    fn check_step_config(&mut self, step: &RawStepView<'a>) {
        let needs_config = matches!(
            step.step_type,
            StepType::Code | StepType::Llm | StepType::Http | StepType::Condition
        );
        if needs_config && step.config.is_none() {
            self.error(
                "MISSING_CONFIG",
                Severity::High,
                step.path(),
                format!("{} step '{}' requires a config", step.step_type, step.id),
            );
            return;
        }

        match step.step_type {
            StepType::Code => self.check_code(step),
            StepType::Llm => self.check_llm(step),
            StepType::Http => self.check_http(step),
            StepType::Condition => self.check_condition(step),
            kind if !kind.is_executable() => self.warn(
                "RESERVED_STEP_TYPE",
                format!("{}/type", step.path()),
                format!(
                    "step '{}' uses reserved type '{}' which cannot be executed yet",
                    step.id, step.step_type
                ),
            ),
            _ => {}
        }
    }

    fn check_code(&mut self, step: &RawStepView<'a>) {
        let language = match step.config.and_then(|c| c.get("language")) {
            None => {
                self.warn_suggest(
                    "MISSING_LANGUAGE",
                    step.config_path("language"),
                    format!("code step '{}' has no language", step.id),
                    "defaults to javascript",
                );
                Some(CodeLanguage::Javascript)
            }
            Some(raw) => {
                let parsed = serde_json::from_value::<CodeLanguage>(raw.clone()).ok();
                if parsed.is_none() {
                    self.error(
                        "UNSUPPORTED_LANGUAGE",
                        Severity::High,
                        step.config_path("language"),
                        format!(
                            "unsupported language {} in step '{}' (expected javascript, python3 or bash)",
                            raw, step.id
                        ),
                    );
                }
                parsed
            }
        };

        if matches!(language, Some(CodeLanguage::Python3 | CodeLanguage::Bash)) {
            self.warn(
                "LANGUAGE_NOT_EXECUTABLE",
                step.config_path("language"),
                format!(
                    "step '{}' validates but {} code cannot run in this engine; only javascript executes",
                    step.id,
                    language.map(|l| l.as_str()).unwrap_or_default()
                ),
            );
        }

        let code = step.config_str("code").unwrap_or_default();
        if code.trim().is_empty() {
            self.error(
                "MISSING_CODE",
                Severity::High,
                step.config_path("code"),
                format!("code step '{}' has an empty code body", step.id),
            );
            return;
        }

        if language == Some(CodeLanguage::Javascript) && !MAIN_FUNCTION.is_match(code) {
            self.warn_suggest(
                "MISSING_MAIN_FUNCTION",
                step.config_path("code"),
                format!("code step '{}' does not define main", step.id),
                "define function main(...) { ... } returning the step result",
            );
        }

        if code.chars().count() > MAX_CODE_CHARS {
            self.warn_suggest(
                "LONG_CODE",
                step.config_path("code"),
                format!("code body of step '{}' is longer than {MAX_CODE_CHARS} characters", step.id),
                "split the logic across several steps",
            );
        }
    }

    fn check_llm(&mut self, step: &RawStepView<'a>) {
        if step.config_str("model").is_none_or(|m| m.trim().is_empty()) {
            self.error(
                "MISSING_MODEL",
                Severity::High,
                step.config_path("model"),
                format!("llm step '{}' requires a model", step.id),
            );
        }

        match step.config_str("prompt").filter(|p| !p.trim().is_empty()) {
            None => self.error(
                "MISSING_PROMPT",
                Severity::High,
                step.config_path("prompt"),
                format!("llm step '{}' requires a prompt", step.id),
            ),
            Some(prompt) => {
                let len = prompt.chars().count();
                if len < MIN_PROMPT_CHARS {
                    self.warn(
                        "SHORT_PROMPT",
                        step.config_path("prompt"),
                        format!("prompt of step '{}' is shorter than {MIN_PROMPT_CHARS} characters", step.id),
                    );
                } else if len > MAX_PROMPT_CHARS {
                    self.warn(
                        "LONG_PROMPT",
                        step.config_path("prompt"),
                        format!("prompt of step '{}' is longer than {MAX_PROMPT_CHARS} characters", step.id),
                    );
                }
            }
        }

        if let Some(raw) = step.config.and_then(|c| c.get("temperature")) {
            let in_range = raw.as_f64().is_some_and(|t| (0.0..=2.0).contains(&t));
            if !in_range {
                self.error(
                    "INVALID_TEMPERATURE",
                    Severity::High,
                    step.config_path("temperature"),
                    format!("temperature of step '{}' must be a number in [0, 2], got {raw}", step.id),
                );
            }
        }

        if let Some(raw) = step.config.and_then(|c| c.get("max_tokens")) {
            let in_range = raw.as_u64().is_some_and(|t| (1..=4000).contains(&t));
            if !in_range {
                self.warn(
                    "INVALID_MAX_TOKENS",
                    step.config_path("max_tokens"),
                    format!("max_tokens of step '{}' is outside [1, 4000]: {raw}", step.id),
                );
            }
        }
    }

    fn check_http(&mut self, step: &RawStepView<'a>) {
        match step.config_str("url").filter(|u| !u.trim().is_empty()) {
            None => self.error(
                "MISSING_URL",
                Severity::High,
                step.config_path("url"),
                format!("http step '{}' requires a url", step.id),
            ),
            Some(raw_url) => {
                let masked = mask_tokens(raw_url.trim(), "placeholder");
                // A leading token usually supplies scheme and host.
                let candidate = if raw_url.trim_start().starts_with("${") {
                    format!("http://{masked}")
                } else {
                    masked
                };
                if let Err(e) = url::Url::parse(&candidate) {
                    self.error(
                        "INVALID_URL",
                        Severity::High,
                        step.config_path("url"),
                        format!("url '{raw_url}' of step '{}' is invalid: {e}", step.id),
                    );
                }
            }
        }

        match step.config.and_then(|c| c.get("method")) {
            None => self.warn_suggest(
                "MISSING_METHOD",
                step.config_path("method"),
                format!("http step '{}' has no method", step.id),
                "defaults to GET",
            ),
            Some(raw) => {
                let valid = raw.as_str().is_some_and(|m| m.parse::<HttpMethod>().is_ok());
                if !valid {
                    let allowed: Vec<_> = HttpMethod::ALL.iter().map(|m| m.as_str()).collect();
                    self.error(
                        "INVALID_METHOD",
                        Severity::High,
                        step.config_path("method"),
                        format!("method {raw} of step '{}' is not one of: {}", step.id, allowed.join(", ")),
                    );
                }
            }
        }

        if let Some(timeout) = step.config.and_then(|c| c.get("timeout")).and_then(Value::as_u64) {
            if !(1000..=300_000).contains(&timeout) {
                self.warn(
                    "UNUSUAL_TIMEOUT",
                    step.config_path("timeout"),
                    format!("timeout of step '{}' is {timeout} ms, outside [1000, 300000]", step.id),
                );
            }
        }
    }

    fn check_condition(&mut self, step: &RawStepView<'a>) {
        if step.config_str("condition").is_none_or(|c| c.trim().is_empty()) {
            self.error(
                "MISSING_CONDITION",
                Severity::High,
                step.config_path("condition"),
                format!("condition step '{}' requires a condition", step.id),
            );
        }

        let downstream = self.graph.descendants(step.id);
        for key in ["true_step", "false_step"] {
            let Some(target) = step.config_str(key) else {
                continue;
            };
            if !self.step_ids.contains(target) || target == step.id {
                self.error(
                    "INVALID_BRANCH_TARGET",
                    Severity::High,
                    step.config_path(key),
                    format!("{key} of step '{}' names unknown step '{target}'", step.id),
                );
            } else if !downstream.contains(target) {
                self.warn_suggest(
                    "BRANCH_NOT_DOWNSTREAM",
                    step.config_path(key),
                    format!("{key} '{target}' does not depend on condition step '{}'", step.id),
                    "add the condition step to the target's depends_on so it is not run first",
                );
            }
        }
    }

    fn check_error_handling(&mut self, step: &RawStepView<'a>) {
        let Some(handling) = step.error_handling else {
            return;
        };
        let path = format!("{}/error_handling/fallback_step", step.path());
        let is_fallback = handling.get("on_error").and_then(Value::as_str) == Some("fallback");

        match handling.get("fallback_step").and_then(Value::as_str) {
            Some(target) if target == step.id => self.error(
                "INVALID_FALLBACK_STEP",
                Severity::High,
                path,
                format!("step '{}' cannot be its own fallback", step.id),
            ),
            Some(target) if !self.step_ids.contains(target) => self.error(
                "INVALID_FALLBACK_STEP",
                Severity::High,
                path,
                format!("fallback_step of step '{}' names unknown step '{target}'", step.id),
            ),
            None if is_fallback => self.warn_suggest(
                "MISSING_FALLBACK_STEP",
                path,
                format!("step '{}' uses on_error: fallback without a fallback_step", step.id),
                "without a fallback_step the policy behaves like fail",
            ),
            _ => {}
        }
    }

    // -- references --------------------------------------------------------

    fn check_step_references(&mut self, step: &RawStepView<'a>) {
        let Some(config) = step.config else {
            return;
        };
        for (key, value) in config {
            // The code body is sandbox source, not a template.
            if step.step_type == StepType::Code && key == "code" {
                continue;
            }
            let path = step.config_path(key);
            self.check_value_references(value, &path);
        }
    }

    fn check_output_references(&mut self, document: &Value) {
        let Some(outputs) = document.get("outputs").and_then(Value::as_object) else {
            return;
        };
        for (name, spec) in outputs {
            if let Some(source) = spec.get("source").and_then(Value::as_str) {
                self.check_references(source, &format!("/outputs/{name}/source"));
            }
        }
    }

    fn check_value_references(&mut self, value: &Value, path: &str) {
        match value {
            Value::String(s) => self.check_references(s, path),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_value_references(item, &format!("{path}/{i}"));
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    self.check_value_references(item, &format!("{path}/{key}"));
                }
            }
            _ => {}
        }
    }

    fn check_references(&mut self, template: &str, path: &str) {
        for token in tokens(template) {
            let segments = match parse_path(token.path) {
                Ok(segments) => segments,
                Err(_) => {
                    self.error(
                        "INVALID_REFERENCE",
                        Severity::High,
                        path.to_string(),
                        format!("malformed reference '{}'", token.raw),
                    );
                    continue;
                }
            };

            match segments[0] {
                "sys" => {}
                "input" | "inputs" => match segments.get(1) {
                    None => self.error(
                        "INCOMPLETE_REFERENCE",
                        Severity::High,
                        path.to_string(),
                        format!("reference '{}' does not name an input", token.raw),
                    ),
                    Some(name) if !self.is_input(name) => self.error(
                        "INVALID_REFERENCE",
                        Severity::High,
                        path.to_string(),
                        format!("reference '{}' names undeclared input '{name}'", token.raw),
                    ),
                    Some(_) => {}
                },
                name if self.is_input(name) || self.step_ids.contains(name) => {}
                name => self.error(
                    "INVALID_REFERENCE",
                    Severity::High,
                    path.to_string(),
                    format!("reference '{}' names unknown input or step '{name}'", token.raw),
                ),
            }
        }
    }

    // -- inputs ------------------------------------------------------------

    fn check_input_specs(&mut self, document: &Value) {
        let Some(inputs) = document.get("inputs").and_then(Value::as_object) else {
            return;
        };
        for (name, spec) in inputs {
            let path = format!("/inputs/{name}");

            if let Some(pattern) = spec.pointer("/validation/pattern").and_then(Value::as_str) {
                if let Err(e) = Regex::new(pattern) {
                    self.error(
                        "INVALID_PATTERN",
                        Severity::High,
                        format!("{path}/validation/pattern"),
                        format!("pattern of input '{name}' is not a valid regex: {e}"),
                    );
                }
            }

            let declared = spec
                .get("type")
                .cloned()
                .and_then(|t| serde_json::from_value::<ValueType>(t).ok());
            if let (Some(value_type), Some(default)) = (declared, spec.get("default")) {
                if !default.is_null() && !value_type.matches(default) {
                    self.warn(
                        "DEFAULT_TYPE_MISMATCH",
                        format!("{path}/default"),
                        format!("default of input '{name}' is not a {value_type}"),
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
