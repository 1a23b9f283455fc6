//! `${path}` template resolution.
//!
//! A template string holds zero or more `${a.b.c}` tokens. The first path
//! segment picks the namespace (`sys`, `input`/`inputs`, a declared input
//! name, or a step id); the rest are property lookups, with numeric
//! segments indexing into arrays.
//!
//! A token that is the whole string keeps the JSON type of the value it
//! resolves to. Tokens embedded in surrounding text are stringified, with
//! objects and arrays rendered as compact JSON.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("static regex"));

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*|[0-9]+)$").expect("static regex"));

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("malformed reference '${{{0}}}'")]
    Malformed(String),

    /// The leading segment names nothing in scope (unknown name, or a step
    /// that was skipped, failed, or has not run).
    #[error("unresolved reference '${{{reference}}}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error("path not found: '${{{reference}}}' has no '{segment}'")]
    PathNotFound { reference: String, segment: String },
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// One `${...}` occurrence inside a template string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// The whole token including `${` and `}`.
    pub raw: &'a str,
    /// The trimmed path between the braces.
    pub path: &'a str,
}

/// All tokens in `template`, left to right.
pub fn tokens(template: &str) -> Vec<Token<'_>> {
    TOKEN
        .captures_iter(template)
        .filter_map(|caps| {
            let raw = caps.get(0)?.as_str();
            let path = caps.get(1)?.as_str().trim();
            Some(Token { raw, path })
        })
        .collect()
}

/// Replace every token with `replacement` (used to syntax-check URLs).
pub fn mask_tokens(template: &str, replacement: &str) -> String {
    TOKEN.replace_all(template, replacement).into_owned()
}

/// Replace every token with its bare path, turning `${a.items.0} > 1` into
/// `a.items[0] > 1` for the condition evaluator.
pub fn unwrap_tokens(expression: &str) -> String {
    TOKEN
        .replace_all(expression, |caps: &regex::Captures<'_>| {
            let path = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let mut out = String::with_capacity(path.len());
            for (i, segment) in path.split('.').map(str::trim).enumerate() {
                if i > 0 && segment.chars().all(|c| c.is_ascii_digit()) {
                    out.push_str(&format!("[{segment}]"));
                } else {
                    if i > 0 {
                        out.push('.');
                    }
                    out.push_str(segment);
                }
            }
            out
        })
        .into_owned()
}

/// Split and check a reference path.
pub fn parse_path(path: &str) -> Result<Vec<&str>, TemplateError> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if path.trim().is_empty() || segments.iter().any(|s| !SEGMENT.is_match(s)) {
        return Err(TemplateError::Malformed(path.to_string()));
    }
    // The namespace segment must be a name, not an index.
    if segments[0].starts_with(|c: char| c.is_ascii_digit()) {
        return Err(TemplateError::Malformed(path.to_string()));
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The values a template can see.
pub trait Scope {
    /// The reserved runtime-metadata object.
    fn sys(&self) -> &Value;
    fn is_declared_input(&self, name: &str) -> bool;
    /// A supplied (or defaulted) input value.
    fn input(&self, name: &str) -> Option<&Value>;
    /// The stored result of a completed step.
    fn step_result(&self, step_id: &str) -> Option<&Value>;
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a single reference path to a value.
pub fn resolve_path(path: &str, scope: &dyn Scope) -> Result<Value, TemplateError> {
    let segments = parse_path(path)?;
    let unresolved = |reason: String| TemplateError::UnresolvedReference {
        reference: path.to_string(),
        reason,
    };

    let (root, rest): (&Value, &[&str]) = match segments[0] {
        "sys" => (scope.sys(), &segments[1..]),
        "input" | "inputs" => {
            let Some(name) = segments.get(1) else {
                return Err(unresolved("no input name after the input namespace".to_string()));
            };
            let value = scope
                .input(name)
                .ok_or_else(|| unresolved(format!("input '{name}' was not provided")))?;
            (value, &segments[2..])
        }
        name if scope.is_declared_input(name) => {
            let value = scope
                .input(name)
                .ok_or_else(|| unresolved(format!("input '{name}' was not provided")))?;
            (value, &segments[1..])
        }
        step_id => {
            let value = scope
                .step_result(step_id)
                .ok_or_else(|| unresolved(format!("no result for '{step_id}' in scope")))?;
            (value, &segments[1..])
        }
    };

    walk(root, rest, path).cloned()
}

fn walk<'v>(root: &'v Value, segments: &[&str], reference: &str) -> Result<&'v Value, TemplateError> {
    let mut current = root;
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| TemplateError::PathNotFound {
            reference: reference.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current)
}

/// Resolve a template, preserving the value type for a whole-string token.
pub fn resolve_template(template: &str, scope: &dyn Scope) -> Result<Value, TemplateError> {
    let found = tokens(template);
    match found.as_slice() {
        [] => Ok(Value::String(template.to_string())),
        [only] if only.raw == template => resolve_path(only.path, scope),
        _ => splice(template, &found, scope).map(Value::String),
    }
}

/// Resolve a template to a string; whole-string tokens are stringified too.
pub fn resolve_string(template: &str, scope: &dyn Scope) -> Result<String, TemplateError> {
    let found = tokens(template);
    if found.is_empty() {
        return Ok(template.to_string());
    }
    splice(template, &found, scope)
}

fn splice(template: &str, found: &[Token<'_>], scope: &dyn Scope) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    for token in found {
        // Tokens are in order, so each one is found after the previous.
        let Some(at) = rest.find(token.raw) else {
            break;
        };
        out.push_str(&rest[..at]);
        out.push_str(&value_to_string(&resolve_path(token.path, scope)?));
        rest = &rest[at + token.raw.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve every string nested inside `value` (object keys are left alone).
pub fn resolve_value(value: &Value, scope: &dyn Scope) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => resolve_template(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Stringify a value for embedding in text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
