//! Workflow document types for Stepflow.
//!
//! `WorkflowDefinition` is the typed, immutable form of a YAML workflow
//! document: declared inputs, an ordered list of typed steps forming a
//! dependency graph, and derived outputs. Instances are only built from
//! documents that passed validation, then shared read-only between runs.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DefinitionError;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A validated workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub metadata: WorkflowMetadata,
    /// Declared inputs, in declaration order.
    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,
    pub workflow: WorkflowGraph,
    /// Declared outputs, in declaration order.
    #[serde(default)]
    pub outputs: IndexMap<String, OutputSpec>,
}

impl WorkflowDefinition {
    /// The registry key of this workflow.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Steps in document order.
    pub fn steps(&self) -> &[StepSpec] {
        &self.workflow.steps
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.workflow.steps.iter().find(|s| s.id == id)
    }
}

/// Descriptive metadata for a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub name: String,
    pub description: String,
    /// Semantic version string (e.g. "1.0.0").
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The `workflow:` section of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub steps: Vec<StepSpec>,
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// JSON-level value types accepted for inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    /// All variants, in schema order.
    pub const ALL: [ValueType; 6] = [
        ValueType::String,
        ValueType::Number,
        ValueType::Integer,
        ValueType::Boolean,
        ValueType::Array,
        ValueType::Object,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }

    /// Whether `value` is an instance of this type.
    ///
    /// `integer` accepts any JSON number without a fractional part, so
    /// `41.0` counts as an integer.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a single workflow input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub input_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<InputValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

/// Value-level rules applied to a supplied input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, alias = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, alias = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

/// Declaration of a single workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Template expression, e.g. `"${fetch.data}"`.
    pub source: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The kind of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Start,
    End,
    Code,
    Llm,
    Http,
    Condition,
    /// Reserved; not executable.
    Loop,
    /// Reserved; not executable.
    Parallel,
}

impl StepType {
    pub const ALL: [StepType; 8] = [
        StepType::Start,
        StepType::End,
        StepType::Code,
        StepType::Llm,
        StepType::Http,
        StepType::Condition,
        StepType::Loop,
        StepType::Parallel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Start => "start",
            StepType::End => "end",
            StepType::Code => "code",
            StepType::Llm => "llm",
            StepType::Http => "http",
            StepType::Condition => "condition",
            StepType::Loop => "loop",
            StepType::Parallel => "parallel",
        }
    }

    /// Whether the engine has a handler for this type.
    pub fn is_executable(&self) -> bool {
        !matches!(self, StepType::Loop | StepType::Parallel)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown step type '{s}'"))
    }
}

/// A single step in the workflow graph.
///
/// Deserialized through [`RawStep`] so the untagged `config` mapping can be
/// interpreted according to the sibling `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct StepSpec {
    pub id: String,
    pub step_type: StepType,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Step ids that must complete before this one runs.
    pub depends_on: Vec<String>,
    pub config: StepConfig,
    /// Named projections over the raw step result (name -> dotted path).
    pub outputs: IndexMap<String, String>,
    pub error_handling: Option<ErrorHandling>,
}

impl StepSpec {
    /// The effective error policy (defaults to `fail`).
    pub fn on_error(&self) -> OnError {
        self.error_handling
            .as_ref()
            .map(|h| h.on_error)
            .unwrap_or_default()
    }

    /// Display label for logs: the name when present, else the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Wire shape of a step, used for (de)serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
}

impl TryFrom<RawStep> for StepSpec {
    type Error = DefinitionError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let config = StepConfig::from_raw(&raw.id, raw.step_type, raw.config)?;
        Ok(StepSpec {
            id: raw.id,
            step_type: raw.step_type,
            name: raw.name,
            description: raw.description,
            depends_on: raw.depends_on,
            config,
            outputs: raw.outputs,
            error_handling: raw.error_handling,
        })
    }
}

impl From<StepSpec> for RawStep {
    fn from(step: StepSpec) -> Self {
        RawStep {
            id: step.id,
            step_type: step.step_type,
            name: step.name,
            description: step.description,
            depends_on: step.depends_on,
            config: step.config.to_value(),
            outputs: step.outputs,
            error_handling: step.error_handling,
        }
    }
}

// ---------------------------------------------------------------------------
// Step configuration
// ---------------------------------------------------------------------------

/// Type-specific step configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Start,
    End,
    Code(CodeConfig),
    Llm(LlmConfig),
    Http(HttpConfig),
    Condition(ConditionConfig),
    /// Opaque config of a reserved step type (`loop`, `parallel`).
    Reserved(Value),
}

impl StepConfig {
    /// Interpret a raw config mapping according to the step type.
    pub fn from_raw(
        step_id: &str,
        step_type: StepType,
        raw: Option<Value>,
    ) -> Result<Self, DefinitionError> {
        fn typed<T: serde::de::DeserializeOwned>(
            step_id: &str,
            step_type: StepType,
            raw: Option<Value>,
        ) -> Result<T, DefinitionError> {
            let value = raw.ok_or_else(|| DefinitionError::MissingConfig {
                step_id: step_id.to_string(),
                step_type: step_type.to_string(),
            })?;
            serde_json::from_value(value).map_err(|e| DefinitionError::InvalidConfig {
                step_id: step_id.to_string(),
                step_type: step_type.to_string(),
                reason: e.to_string(),
            })
        }

        Ok(match step_type {
            StepType::Start => StepConfig::Start,
            StepType::End => StepConfig::End,
            StepType::Code => StepConfig::Code(typed(step_id, step_type, raw)?),
            StepType::Llm => StepConfig::Llm(typed(step_id, step_type, raw)?),
            StepType::Http => StepConfig::Http(typed(step_id, step_type, raw)?),
            StepType::Condition => StepConfig::Condition(typed(step_id, step_type, raw)?),
            StepType::Loop | StepType::Parallel => {
                StepConfig::Reserved(raw.unwrap_or(Value::Null))
            }
        })
    }

    /// Serialize back to the raw mapping (`None` for config-less steps).
    pub fn to_value(&self) -> Option<Value> {
        match self {
            StepConfig::Start | StepConfig::End => None,
            StepConfig::Code(c) => serde_json::to_value(c).ok(),
            StepConfig::Llm(c) => serde_json::to_value(c).ok(),
            StepConfig::Http(c) => serde_json::to_value(c).ok(),
            StepConfig::Condition(c) => serde_json::to_value(c).ok(),
            StepConfig::Reserved(v) if v.is_null() => None,
            StepConfig::Reserved(v) => Some(v.clone()),
        }
    }
}

/// Scripting dialects accepted by the document format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    #[default]
    Javascript,
    Python3,
    Bash,
}

impl CodeLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeLanguage::Javascript => "javascript",
            CodeLanguage::Python3 => "python3",
            CodeLanguage::Bash => "bash",
        }
    }
}

impl fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config for a `code` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeConfig {
    #[serde(default)]
    pub language: CodeLanguage,
    pub code: String,
    /// Wall-clock timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Config for an `llm` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Standard HTTP verbs accepted by `http` steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Whether a request body is sent for this method.
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = DefinitionError;

    /// Case-insensitive parse (`post` and `POST` are the same verb).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| DefinitionError::InvalidMethod(s.to_string()))
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = DefinitionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(m: HttpMethod) -> Self {
        m.as_str().to_string()
    }
}

/// Config for an `http` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,
    /// String bodies are sent as text, any other JSON value as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Config for a `condition` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// JEXL expression evaluated against the run scope.
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_step: Option<String>,
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// What to do when a step handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Abort the run.
    #[default]
    Fail,
    /// Record the failure and continue.
    Skip,
    /// Re-execute up to `retry_count` more times, then fail.
    Retry,
    /// Run `fallback_step` in place of the failed step.
    Fallback,
}

impl OnError {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Fail => "fail",
            OnError::Skip => "skip",
            OnError::Retry => "retry",
            OnError::Fallback => "fallback",
        }
    }
}

/// Per-step failure policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"
metadata:
  name: add_one
  description: Adds one to the supplied number
  version: 1.0.0
inputs:
  x:
    type: integer
    required: true
  label:
    type: string
    validation:
      minLength: 2
workflow:
  steps:
    - id: start
      type: start
    - id: fetch
      type: code
      depends_on: [start]
      config:
        code: "function main(x) { return x + 1 }"
    - id: call
      type: http
      depends_on: [fetch]
      config:
        url: "https://example.com/${fetch}"
        method: post
      error_handling:
        on_error: retry
        retry_count: 2
    - id: end
      type: end
      depends_on: [call]
outputs:
  result:
    source: "${fetch}"
    type: integer
"#;

    #[test]
    fn test_deserialize_document() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(DOC).unwrap();
        assert_eq!(def.name(), "add_one");
        assert_eq!(def.steps().len(), 4);

        let names: Vec<_> = def.inputs.keys().cloned().collect();
        assert_eq!(names, vec!["x", "label"], "declaration order is kept");
        assert_eq!(
            def.inputs["label"].validation.as_ref().unwrap().min_length,
            Some(2)
        );

        match &def.step("fetch").unwrap().config {
            StepConfig::Code(c) => assert_eq!(c.language, CodeLanguage::Javascript),
            other => panic!("expected code config, got {other:?}"),
        }
        match &def.step("call").unwrap().config {
            StepConfig::Http(c) => assert_eq!(c.method, HttpMethod::Post),
            other => panic!("expected http config, got {other:?}"),
        }
        assert_eq!(def.step("call").unwrap().on_error(), OnError::Retry);
        assert_eq!(def.step("end").unwrap().on_error(), OnError::Fail);
    }

    #[test]
    fn test_serialize_round_trips_through_raw_step() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(DOC).unwrap();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["workflow"]["steps"][2]["config"]["method"], "POST");
        assert!(json["workflow"]["steps"][0].get("config").is_none());

        let back: WorkflowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn test_missing_config_is_definition_error() {
        let err = StepConfig::from_raw("llm1", StepType::Llm, None).unwrap_err();
        assert!(err.to_string().contains("llm1"), "got: {err}");
    }

    #[test]
    fn test_unknown_language_rejected() {
        let err = StepConfig::from_raw(
            "c",
            StepType::Code,
            Some(json!({"language": "ruby", "code": "puts 1"})),
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidConfig { .. }));
    }

    #[test]
    fn test_value_type_matches() {
        assert!(ValueType::Integer.matches(&json!(41)));
        assert!(ValueType::Integer.matches(&json!(41.0)));
        assert!(!ValueType::Integer.matches(&json!(41.5)));
        assert!(ValueType::Number.matches(&json!(41.5)));
        assert!(!ValueType::String.matches(&json!(1)));
        assert!(ValueType::Object.matches(&json!({})));
    }

    #[test]
    fn test_http_method_parse_case_insensitive() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert!(HttpMethod::Put.carries_body());
        assert!(!HttpMethod::Get.carries_body());
    }

    #[test]
    fn test_step_type_parse() {
        assert_eq!("condition".parse::<StepType>().unwrap(), StepType::Condition);
        assert!("agent".parse::<StepType>().is_err());
        assert!(!StepType::Parallel.is_executable());
    }
}
