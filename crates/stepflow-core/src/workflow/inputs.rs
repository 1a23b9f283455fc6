//! Caller input validation against declared input specs.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use stepflow_types::workflow::{InputSpec, InputValidation, ValueType};

use super::definition::WorkflowError;

/// Check `supplied` against `specs`, fill in defaults, and drop undeclared
/// keys. Every problem is collected into one `InvalidInput` error.
pub fn prepare_inputs(
    specs: &IndexMap<String, InputSpec>,
    supplied: &Map<String, Value>,
) -> Result<Map<String, Value>, WorkflowError> {
    let mut problems = Vec::new();
    let mut prepared = Map::new();

    for key in supplied.keys().filter(|k| !specs.contains_key(*k)) {
        tracing::debug!(input = %key, "ignoring undeclared input");
    }

    for (name, spec) in specs {
        let value = match supplied.get(name).filter(|v| !v.is_null()) {
            Some(v) => v.clone(),
            None => match &spec.default {
                Some(default) => default.clone(),
                None if spec.required => {
                    problems.push(format!("missing required input '{name}'"));
                    continue;
                }
                None => continue,
            },
        };

        if !spec.input_type.matches(&value) {
            problems.push(format!(
                "input '{name}' must be of type {}, got {value}",
                spec.input_type
            ));
            continue;
        }

        if let Some(rules) = &spec.validation {
            check_rules(name, &value, spec.input_type, rules, &mut problems);
        }

        prepared.insert(name.clone(), value);
    }

    if problems.is_empty() {
        Ok(prepared)
    } else {
        Err(WorkflowError::InvalidInput(problems))
    }
}

fn check_rules(
    name: &str,
    value: &Value,
    value_type: ValueType,
    rules: &InputValidation,
    problems: &mut Vec<String>,
) {
    if let (Some(pattern), Some(s)) = (&rules.pattern, value.as_str()) {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => {
                problems.push(format!("input '{name}' does not match pattern '{pattern}'"));
            }
            Ok(_) => {}
            Err(e) => problems.push(format!("input '{name}' has an invalid pattern: {e}")),
        }
    }

    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = rules.min_length.filter(|min| len < *min) {
            problems.push(format!("input '{name}' is shorter than {min} (got {len})"));
        }
        if let Some(max) = rules.max_length.filter(|max| len > *max) {
            problems.push(format!("input '{name}' is longer than {max} (got {len})"));
        }
    }

    if matches!(value_type, ValueType::Number | ValueType::Integer) {
        if let Some(n) = value.as_f64() {
            if let Some(min) = rules.minimum.filter(|min| n < *min) {
                problems.push(format!("input '{name}' must be >= {min} (got {n})"));
            }
            if let Some(max) = rules.maximum.filter(|max| n > *max) {
                problems.push(format!("input '{name}' must be <= {max} (got {n})"));
            }
        }
    }

    if let Some(allowed) = &rules.allowed {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            problems.push(format!(
                "input '{name}' must be one of: {}",
                options.join(", ")
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(value: Value) -> IndexMap<String, InputSpec> {
        serde_json::from_value(value).unwrap()
    }

    fn supplied(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn problems(err: WorkflowError) -> Vec<String> {
        match err {
            WorkflowError::InvalidInput(p) => p,
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_and_undeclared() {
        let specs = specs(json!({
            "x": {"type": "integer", "required": true},
            "mode": {"type": "string", "default": "fast"},
            "note": {"type": "string"}
        }));
        let prepared = prepare_inputs(&specs, &supplied(json!({"x": 41, "extra": true}))).unwrap();
        assert_eq!(prepared.get("x"), Some(&json!(41)));
        assert_eq!(prepared.get("mode"), Some(&json!("fast")));
        assert!(!prepared.contains_key("note"));
        assert!(!prepared.contains_key("extra"));
    }

    #[test]
    fn test_required_uses_default_when_missing() {
        let specs = specs(json!({"x": {"type": "integer", "required": true, "default": 1}}));
        let prepared = prepare_inputs(&specs, &Map::new()).unwrap();
        assert_eq!(prepared.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_collects_every_problem() {
        let specs = specs(json!({
            "x": {"type": "integer", "required": true},
            "y": {"type": "integer"},
            "name": {"type": "string", "validation": {"pattern": "^[a-z]+$", "maxLength": 3}}
        }));
        let err = prepare_inputs(&specs, &supplied(json!({"y": 1.5, "name": "ABCD"}))).unwrap_err();
        let p = problems(err);
        assert_eq!(p.len(), 4, "got: {p:?}");
        assert!(p[0].contains("missing required input 'x'"));
        assert!(p[1].contains("type integer"));
    }

    #[test]
    fn test_range_and_enum_rules() {
        let specs = specs(json!({
            "n": {"type": "number", "validation": {"minimum": 0, "maximum": 10}},
            "color": {"type": "string", "validation": {"enum": ["red", "blue"]}},
            "tags": {"type": "array", "validation": {"min_length": 1}}
        }));
        let err = prepare_inputs(
            &specs,
            &supplied(json!({"n": 11, "color": "green", "tags": []})),
        )
        .unwrap_err();
        let p = problems(err);
        assert!(p.iter().any(|m| m.contains("<= 10")), "got: {p:?}");
        assert!(p.iter().any(|m| m.contains("one of")), "got: {p:?}");
        assert!(p.iter().any(|m| m.contains("shorter than 1")), "got: {p:?}");

        let ok = prepare_inputs(
            &specs,
            &supplied(json!({"n": 10, "color": "red", "tags": ["a"]})),
        );
        assert!(ok.is_ok());
    }
}
