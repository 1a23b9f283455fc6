//! Best-practice lint. Warnings only; never affects validity.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use stepflow_types::validation::{ValidationResult, ValidationWarning};

static SNAKE_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"));

const MIN_DESCRIPTION_CHARS: usize = 20;
const MAX_STEPS: usize = 20;
const MAX_INPUTS: usize = 15;

pub fn lint_document(document: &Value) -> ValidationResult {
    let name = document.pointer("/metadata/name").and_then(Value::as_str);
    let mut result = ValidationResult::new(name.map(str::to_string));

    if let Some(name) = name.filter(|n| !SNAKE_CASE.is_match(n)) {
        result.warning(
            ValidationWarning::new(
                "NAMING_CONVENTION",
                format!("workflow name '{name}' is not snake_case"),
            )
            .at("/metadata/name")
            .suggest(name.to_lowercase().replace('-', "_")),
        );
    }

    let description = document
        .pointer("/metadata/description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
        result.warning(
            ValidationWarning::new(
                "SHORT_DESCRIPTION",
                format!("description is shorter than {MIN_DESCRIPTION_CHARS} characters"),
            )
            .at("/metadata/description")
            .suggest("describe what the workflow does and what it returns"),
        );
    }

    let steps = document
        .pointer("/workflow/steps")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if steps > MAX_STEPS {
        result.warning(
            ValidationWarning::new("TOO_MANY_STEPS", format!("workflow has {steps} steps"))
                .at("/workflow/steps")
                .suggest("split it into smaller workflows"),
        );
    }

    let inputs = document
        .get("inputs")
        .and_then(Value::as_object)
        .map_or(0, |m| m.len());
    if inputs > MAX_INPUTS {
        result.warning(
            ValidationWarning::new("TOO_MANY_INPUTS", format!("workflow declares {inputs} inputs"))
                .at("/inputs")
                .suggest("group related inputs into an object input"),
        );
    }

    result
}
