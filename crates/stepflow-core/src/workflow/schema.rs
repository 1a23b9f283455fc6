//! Structural schema validation for raw workflow documents.
//!
//! Walks the untyped document once and records every violation instead of
//! stopping at the first. Severity follows the violated keyword:
//! `required`/`type`/`additionalProperties` are critical,
//! `pattern`/`format`/`enum` are high, everything else is medium.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use stepflow_types::validation::{Severity, ValidationError, ValidationResult};
use stepflow_types::workflow::{OnError, StepType, ValueType};

/// Workflow names: letter first, then letters, digits, `_` or `-`.
pub(crate) static WORKFLOW_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").expect("static regex"));

/// Input, output and step identifiers.
pub(crate) static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("static regex"));

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("static regex"));

const TOP_LEVEL_SECTIONS: [&str; 4] = ["metadata", "inputs", "workflow", "outputs"];

// ---------------------------------------------------------------------------
// Keywords
// ---------------------------------------------------------------------------

/// The schema constraint a violation broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Required,
    Type,
    AdditionalProperties,
    Pattern,
    Format,
    Enum,
    MinLength,
    MaxLength,
    MinItems,
    MaxItems,
    Minimum,
    Maximum,
}

impl Keyword {
    pub fn severity(self) -> Severity {
        match self {
            Keyword::Required | Keyword::Type | Keyword::AdditionalProperties => Severity::Critical,
            Keyword::Pattern | Keyword::Format | Keyword::Enum => Severity::High,
            _ => Severity::Medium,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validate a raw document against the fixed workflow schema.
pub fn validate_schema(document: &Value) -> ValidationResult {
    let workflow_name = document
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut checker = SchemaChecker {
        result: ValidationResult::new(workflow_name),
    };
    checker.check_document(document);
    checker.result
}

struct SchemaChecker {
    result: ValidationResult,
}

impl SchemaChecker {
    fn violation(&mut self, path: &str, keyword: Keyword, message: String) {
        let path = if path.is_empty() { "/" } else { path };
        self.result.error(
            ValidationError::new("SCHEMA_VALIDATION_ERROR", keyword.severity(), message).at(path),
        );
    }

    fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.violation(
                    path,
                    Keyword::Type,
                    format!("must be an object, got {}", json_type(other)),
                );
                None
            }
        }
    }

    fn require<'a>(
        &mut self,
        map: &'a Map<String, Value>,
        path: &str,
        key: &str,
    ) -> Option<&'a Value> {
        let value = map.get(key);
        if value.is_none() {
            self.violation(
                path,
                Keyword::Required,
                format!("missing required property '{key}'"),
            );
        }
        value
    }

    /// Check a string value; returns it when it is a string.
    fn string<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a str> {
        match value {
            Value::String(s) => Some(s),
            other => {
                self.violation(
                    path,
                    Keyword::Type,
                    format!("must be a string, got {}", json_type(other)),
                );
                None
            }
        }
    }

    fn length(&mut self, s: &str, path: &str, min: Option<usize>, max: Option<usize>) {
        let len = s.chars().count();
        match min {
            Some(min) if len < min => self.violation(
                path,
                Keyword::MinLength,
                format!("must be at least {min} characters"),
            ),
            _ => {}
        }
        match max {
            Some(max) if len > max => self.violation(
                path,
                Keyword::MaxLength,
                format!("must be at most {max} characters"),
            ),
            _ => {}
        }
    }

    fn pattern(&mut self, s: &str, path: &str, regex: &Regex) -> bool {
        if regex.is_match(s) {
            return true;
        }
        self.violation(
            path,
            Keyword::Pattern,
            format!("'{s}' does not match pattern {}", regex.as_str()),
        );
        false
    }

    fn optional_string(&mut self, map: &Map<String, Value>, path: &str, key: &str, max: usize) {
        if let Some(value) = map.get(key) {
            let field_path = format!("{path}/{key}");
            if let Some(s) = self.string(value, &field_path) {
                self.length(s, &field_path, None, Some(max));
            }
        }
    }

    fn check_document(&mut self, document: &Value) {
        let Some(root) = self.object(document, "") else {
            return;
        };

        for key in root.keys() {
            if !TOP_LEVEL_SECTIONS.contains(&key.as_str()) {
                self.violation(
                    &format!("/{key}"),
                    Keyword::AdditionalProperties,
                    format!("unknown top-level section '{key}'"),
                );
            }
        }

        if let Some(metadata) = self.require(root, "", "metadata") {
            self.check_metadata(metadata);
        }
        if let Some(inputs) = self.require(root, "", "inputs") {
            self.check_inputs(inputs);
        }
        if let Some(workflow) = self.require(root, "", "workflow") {
            if let Some(map) = self.object(workflow, "/workflow") {
                if let Some(steps) = self.require(map, "/workflow", "steps") {
                    self.check_steps(steps);
                }
            }
        }
        if let Some(outputs) = self.require(root, "", "outputs") {
            self.check_outputs(outputs);
        }
    }

    fn check_metadata(&mut self, value: &Value) {
        let path = "/metadata";
        let Some(map) = self.object(value, path) else {
            return;
        };

        if let Some(name) = self.require(map, path, "name") {
            if let Some(s) = self.string(name, "/metadata/name") {
                self.pattern(s, "/metadata/name", &WORKFLOW_NAME);
                self.length(s, "/metadata/name", Some(3), Some(100));
            }
        }

        if let Some(description) = self.require(map, path, "description") {
            if let Some(s) = self.string(description, "/metadata/description") {
                self.length(s, "/metadata/description", None, Some(500));
            }
        }

        if let Some(version) = self.require(map, path, "version") {
            if let Some(s) = self.string(version, "/metadata/version") {
                if self.pattern(s, "/metadata/version", &VERSION) {
                    if let Err(e) = semver::Version::parse(s) {
                        self.violation(
                            "/metadata/version",
                            Keyword::Format,
                            format!("'{s}' is not a semantic version: {e}"),
                        );
                    }
                }
            }
        }

        self.optional_string(map, path, "author", 100);

        if let Some(tags) = map.get("tags") {
            match tags {
                Value::Array(items) => {
                    if items.len() > 10 {
                        self.violation(
                            "/metadata/tags",
                            Keyword::MaxItems,
                            "must have at most 10 items".to_string(),
                        );
                    }
                    for (i, tag) in items.iter().enumerate() {
                        let tag_path = format!("/metadata/tags/{i}");
                        if let Some(s) = self.string(tag, &tag_path) {
                            self.length(s, &tag_path, None, Some(50));
                        }
                    }
                }
                other => self.violation(
                    "/metadata/tags",
                    Keyword::Type,
                    format!("must be an array, got {}", json_type(other)),
                ),
            }
        }
    }

    fn check_inputs(&mut self, value: &Value) {
        let Some(map) = self.object(value, "/inputs") else {
            return;
        };

        for (name, spec) in map {
            let path = format!("/inputs/{name}");
            self.pattern(name, &path, &IDENTIFIER);
            let Some(spec) = self.object(spec, &path) else {
                continue;
            };

            if let Some(t) = self.require(spec, &path, "type") {
                self.value_type_enum(t, &format!("{path}/type"));
            }
            if let Some(required) = spec.get("required").filter(|r| !r.is_boolean()) {
                self.violation(
                    &format!("{path}/required"),
                    Keyword::Type,
                    format!("must be a boolean, got {}", json_type(required)),
                );
            }
            self.optional_string(spec, &path, "description", 200);

            if let Some(validation) = spec.get("validation") {
                self.check_input_validation(validation, &format!("{path}/validation"));
            }
        }
    }

    fn check_input_validation(&mut self, value: &Value, path: &str) {
        let Some(map) = self.object(value, path) else {
            return;
        };
        if let Some(p) = map.get("pattern") {
            self.string(p, &format!("{path}/pattern"));
        }
        for key in ["min_length", "max_length", "minLength", "maxLength"] {
            if map.get(key).is_some_and(|v| v.as_u64().is_none()) {
                self.violation(
                    &format!("{path}/{key}"),
                    Keyword::Type,
                    "must be a non-negative integer".to_string(),
                );
            }
        }
        for key in ["minimum", "maximum"] {
            if let Some(v) = map.get(key).filter(|v| !v.is_number()) {
                self.violation(
                    &format!("{path}/{key}"),
                    Keyword::Type,
                    format!("must be a number, got {}", json_type(v)),
                );
            }
        }
        if let Some(v) = map.get("enum").filter(|v| !v.is_array()) {
            self.violation(
                &format!("{path}/enum"),
                Keyword::Type,
                format!("must be an array, got {}", json_type(v)),
            );
        }
    }

    fn check_steps(&mut self, value: &Value) {
        let path = "/workflow/steps";
        let steps = match value {
            Value::Array(steps) => steps,
            other => {
                self.violation(
                    path,
                    Keyword::Type,
                    format!("must be an array, got {}", json_type(other)),
                );
                return;
            }
        };
        if steps.is_empty() {
            self.violation(path, Keyword::MinItems, "must contain at least one step".to_string());
        }

        for (i, step) in steps.iter().enumerate() {
            let step_path = format!("{path}/{i}");
            let Some(map) = self.object(step, &step_path) else {
                continue;
            };

            if let Some(id) = self.require(map, &step_path, "id") {
                let id_path = format!("{step_path}/id");
                if let Some(s) = self.string(id, &id_path) {
                    self.pattern(s, &id_path, &IDENTIFIER);
                }
            }

            if let Some(t) = self.require(map, &step_path, "type") {
                let type_path = format!("{step_path}/type");
                if let Some(s) = self.string(t, &type_path) {
                    if s.parse::<StepType>().is_err() {
                        let allowed: Vec<_> = StepType::ALL.iter().map(|t| t.as_str()).collect();
                        self.violation(
                            &type_path,
                            Keyword::Enum,
                            format!("'{s}' is not one of: {}", allowed.join(", ")),
                        );
                    }
                }
            }

            self.optional_string(map, &step_path, "name", 100);
            self.optional_string(map, &step_path, "description", 200);

            if let Some(deps) = map.get("depends_on") {
                let deps_path = format!("{step_path}/depends_on");
                match deps {
                    Value::Array(items) => {
                        for (j, dep) in items.iter().enumerate() {
                            self.string(dep, &format!("{deps_path}/{j}"));
                        }
                    }
                    other => self.violation(
                        &deps_path,
                        Keyword::Type,
                        format!("must be an array, got {}", json_type(other)),
                    ),
                }
            }

            if let Some(config) = map.get("config") {
                self.object(config, &format!("{step_path}/config"));
            }

            if let Some(outputs) = map.get("outputs") {
                let outputs_path = format!("{step_path}/outputs");
                if let Some(projections) = self.object(outputs, &outputs_path) {
                    for (name, target) in projections {
                        self.string(target, &format!("{outputs_path}/{name}"));
                    }
                }
            }

            if let Some(handling) = map.get("error_handling") {
                self.check_error_handling(handling, &format!("{step_path}/error_handling"));
            }
        }
    }

    fn check_error_handling(&mut self, value: &Value, path: &str) {
        let Some(map) = self.object(value, path) else {
            return;
        };

        if let Some(on_error) = map.get("on_error") {
            let on_error_path = format!("{path}/on_error");
            if let Some(s) = self.string(on_error, &on_error_path) {
                if serde_json::from_value::<OnError>(Value::String(s.to_string())).is_err() {
                    self.violation(
                        &on_error_path,
                        Keyword::Enum,
                        format!("'{s}' is not one of: fail, skip, retry, fallback"),
                    );
                }
            }
        }

        if let Some(count) = map.get("retry_count") {
            let count_path = format!("{path}/retry_count");
            match count.as_u64() {
                None => self.violation(
                    &count_path,
                    Keyword::Type,
                    "must be a non-negative integer".to_string(),
                ),
                Some(n) if n > 10 => {
                    self.violation(&count_path, Keyword::Maximum, "must be at most 10".to_string())
                }
                Some(_) => {}
            }
        }

        if let Some(fallback) = map.get("fallback_step") {
            let fallback_path = format!("{path}/fallback_step");
            if let Some(s) = self.string(fallback, &fallback_path) {
                self.pattern(s, &fallback_path, &IDENTIFIER);
            }
        }
    }

    fn check_outputs(&mut self, value: &Value) {
        let Some(map) = self.object(value, "/outputs") else {
            return;
        };

        for (name, spec) in map {
            let path = format!("/outputs/{name}");
            self.pattern(name, &path, &IDENTIFIER);
            let Some(spec) = self.object(spec, &path) else {
                continue;
            };
            if let Some(source) = self.require(spec, &path, "source") {
                self.string(source, &format!("{path}/source"));
            }
            if let Some(t) = spec.get("type") {
                self.value_type_enum(t, &format!("{path}/type"));
            }
            self.optional_string(spec, &path, "description", 500);
        }
    }

    fn value_type_enum(&mut self, value: &Value, path: &str) {
        let Some(s) = self.string(value, path) else {
            return;
        };
        if !ValueType::ALL.iter().any(|t| t.as_str() == s) {
            let allowed: Vec<_> = ValueType::ALL.iter().map(|t| t.as_str()).collect();
            self.violation(
                path,
                Keyword::Enum,
                format!("'{s}' is not one of: {}", allowed.join(", ")),
            );
        }
    }
}

/// JSON type name used in messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
