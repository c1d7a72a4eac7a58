//! # Value Resolution and Condition Evaluation
//!
//! [`TemplateResolver`] is the default [`ValueResolver`]. It turns value
//! sources into text and evaluates condition expressions against the run's
//! variable scope.
//!
//! ## Operands
//!
//! - `vars.name[.path]` reads a scope variable and optionally walks into it
//!   with dot segments and numeric indexes (`vars.items[0].id`). An unknown
//!   variable is an error; a missing path below a known variable is `null`.
//! - `env.NAME` reads an environment variable. Unset variables are `null`.
//! - JSON literals (`"text"`, `3`, `true`, `[1, 2]`, `null`) stand for themselves.
//!
//! ## Templates
//!
//! Template sources substitute every `${{ operand }}` placeholder with the
//! operand's text form. Strings are inserted raw, `null` becomes empty, and
//! arrays or objects are inserted as compact JSON. A placeholder without its
//! closing `}}` is a malformed template.
//!
//! ## Truthiness
//!
//! `null`, `false`, `0`, `""`, `"false"`, `"0"` and empty arrays or objects are
//! false; everything else is true. `==` and `!=` compare text forms, so
//! `vars.count == 3` holds for both the number `3` and the string `"3"`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use stepflow_registry::{ValueResolver, VariableScope};
use stepflow_types::{ResolveError, ValueSource};
use tokio_util::sync::CancellationToken;

use crate::condition_syntax::{
    find_top_level_operator, looks_like_json_literal, normalize_condition_expression, split_expression, split_includes,
    strip_leading_negations, validate_condition_expression,
};

/// Resolver for `${{ ... }}` templates, `vars.*` paths and `env.*` lookups.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    environment: Option<HashMap<String, String>>,
}

impl TemplateResolver {
    /// Resolver reading `env.*` from the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver reading `env.*` from a fixed map instead of the process environment.
    pub fn with_environment(environment: HashMap<String, String>) -> Self {
        Self {
            environment: Some(environment),
        }
    }

    fn environment_value(&self, name: &str) -> Option<String> {
        match &self.environment {
            Some(environment) => environment.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn operand_value(&self, expression: &str, scope: &dyn VariableScope) -> Result<Value, ResolveError> {
        let trimmed = expression.trim();
        if looks_like_json_literal(trimmed) {
            return serde_json::from_str(trimmed).map_err(|error| ResolveError::Malformed {
                expression: trimmed.to_string(),
                reason: error.to_string(),
            });
        }
        if let Some(name) = trimmed.strip_prefix("env.") {
            return Ok(self.environment_value(name).map(Value::String).unwrap_or(Value::Null));
        }
        if let Some(path) = trimmed.strip_prefix("vars.") {
            return variable_value(path, scope);
        }
        Err(ResolveError::Malformed {
            expression: trimmed.to_string(),
            reason: "expected a JSON literal, vars.* or env.*".into(),
        })
    }

    fn interpolate(&self, input: &str, scope: &dyn VariableScope) -> Result<String, ResolveError> {
        let mut output = String::with_capacity(input.len());
        let mut remaining = input;

        while let Some(start) = remaining.find("${{") {
            let (before, after) = remaining.split_at(start);
            output.push_str(before);
            let Some(end) = after.find("}}") else {
                return Err(ResolveError::Malformed {
                    expression: input.to_string(),
                    reason: "template placeholder is missing its closing '}}'".into(),
                });
            };
            let expression = after[3..end].trim();
            if expression.is_empty() {
                return Err(ResolveError::Malformed {
                    expression: input.to_string(),
                    reason: "template placeholder is empty".into(),
                });
            }
            output.push_str(&format_json_value(&self.operand_value(expression, scope)?));
            remaining = &after[end + 2..];
        }

        output.push_str(remaining);
        Ok(output)
    }

    fn evaluate_node(&self, expression: &str, scope: &dyn VariableScope) -> Result<bool, ResolveError> {
        if let Some(parts) = split_expression(expression, "||") {
            for part in parts {
                if self.evaluate_node(part, scope)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if let Some(parts) = split_expression(expression, "&&") {
            for part in parts {
                if !self.evaluate_node(part, scope)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        let (negations, inner) = strip_leading_negations(expression);
        let result = self.evaluate_atom(inner.trim(), scope)?;
        Ok(if negations % 2 == 1 { !result } else { result })
    }

    fn evaluate_atom(&self, expression: &str, scope: &dyn VariableScope) -> Result<bool, ResolveError> {
        if let Some((left, right)) = split_includes(expression) {
            let needle = format_json_value(&self.operand_value(right, scope)?);
            let found = match self.operand_value(left, scope)? {
                Value::Array(items) => items.iter().any(|item| format_json_value(item) == needle),
                Value::String(text) => text.contains(&needle),
                _ => false,
            };
            return Ok(found);
        }

        for (operator, equal) in [("!=", false), ("==", true)] {
            if let Some(position) = find_top_level_operator(expression, operator) {
                let left = format_json_value(&self.operand_value(&expression[..position], scope)?);
                let right = format_json_value(&self.operand_value(&expression[position + operator.len()..], scope)?);
                return Ok((left == right) == equal);
            }
        }

        Ok(is_truthy(&self.operand_value(expression, scope)?))
    }
}

#[async_trait]
impl ValueResolver for TemplateResolver {
    async fn resolve(&self, source: &ValueSource, scope: &dyn VariableScope, cancel: &CancellationToken) -> Result<String, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        match source {
            ValueSource::Literal(text) => Ok(text.clone()),
            ValueSource::Variable(path) => variable_value(path.trim(), scope).map(|value| format_json_value(&value)),
            ValueSource::Template(text) => self.interpolate(text, scope),
        }
    }

    async fn evaluate(&self, expression: &str, scope: &dyn VariableScope, cancel: &CancellationToken) -> Result<bool, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let normalized = normalize_condition_expression(expression);
        validate_condition_expression(&normalized).map_err(|error| ResolveError::Malformed {
            expression: expression.to_string(),
            reason: format!("{error:#}"),
        })?;
        self.evaluate_node(&normalized, scope)
    }
}

/// Looks up `name[.path]` in the scope.
fn variable_value(path: &str, scope: &dyn VariableScope) -> Result<Value, ResolveError> {
    let (head, rest) = path.split_once('.').unwrap_or((path, ""));
    let (name, indexes) = split_indices(head);
    let root = scope
        .try_get(name)
        .ok_or_else(|| ResolveError::UnknownVariable { name: name.to_string() })?;

    let mut current = root;
    for index in indexes {
        match current.get(index) {
            Some(next) => current = next,
            None => return Ok(Value::Null),
        }
    }
    Ok(select_path(current, rest).unwrap_or(Value::Null))
}

/// Selects a nested value by a dot path with optional numeric indexes.
///
/// Returns `None` when any segment is missing or applied to the wrong JSON type.
pub fn select_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.trim().split('.').filter(|segment| !segment.is_empty()) {
        let (key, indexes) = split_indices(segment);
        if !key.is_empty() {
            current = match current {
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                other => other.get(key)?,
            };
        }
        for index in indexes {
            current = current.get(index)?;
        }
    }
    Some(current.clone())
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let key_end = segment.find('[').unwrap_or(segment.len());
    let key = &segment[..key_end];
    let indexes = segment[key_end..]
        .split(']')
        .filter_map(|part| part.strip_prefix('['))
        .filter_map(|digits| digits.parse::<usize>().ok())
        .collect();
    (key, indexes)
}

/// Text form used by templates and comparisons.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|float| float != 0.0),
        Value::String(text) => !(text.is_empty() || text == "false" || text == "0"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
