//! JEXL evaluator for `condition` steps.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of string and collection
//! transforms. Conditions may be written as plain JEXL (`fetch.count > 2`)
//! or with template tokens (`${fetch.count} > 2`); tokens are unwrapped to
//! bare paths before evaluation.
//!
//! **Security note:** values are always passed as the context object, never
//! interpolated into the expression string.

use serde_json::{Value, json};

use super::template::unwrap_tokens;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

fn str_arg(args: &[Value], i: usize) -> &str {
    args.get(i).and_then(Value::as_str).unwrap_or("")
}

/// JEXL evaluator with standard transforms pre-registered.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| Ok(json!(str_arg(args, 0).to_lowercase())))
            .with_transform("upper", |args: &[Value]| Ok(json!(str_arg(args, 0).to_uppercase())))
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("contains", |args: &[Value]| {
                let found = match args.first() {
                    Some(Value::Array(items)) => args.get(1).is_some_and(|needle| items.contains(needle)),
                    _ => str_arg(args, 0).contains(str_arg(args, 1)),
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("not", |args: &[Value]| {
                Ok(json!(!truthy(args.first().unwrap_or(&Value::Null))))
            })
            // Works on strings, arrays, and objects
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate a condition against a JSON object scope, coercing the result
    /// with JavaScript-like truthiness.
    pub fn evaluate_condition(&self, condition: &str, scope: &Value) -> Result<bool, ExpressionError> {
        let expression = unwrap_tokens(condition);
        let value = self.evaluate_value(&expression, scope)?;
        Ok(truthy(&value))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, scope: &Value) -> Result<Value, ExpressionError> {
        if !scope.is_object() {
            return Err(ExpressionError::InvalidContext(
                "scope must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, scope)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
