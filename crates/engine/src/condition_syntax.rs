//! Condition expression normalization and syntax checks.
//!
//! Conditions are used by `control.if`, `control.while` and
//! `time.wait_until`. The grammar is deliberately small:
//!
//! ```text
//! expr     := or
//! or       := and ("||" and)*
//! and      := unary ("&&" unary)*
//! unary    := "!"* atom
//! atom     := operand ".includes(" operand ")"
//!           | operand ("==" | "!=") operand
//!           | operand
//! operand  := JSON literal | "vars." path | "env." NAME
//! ```
//!
//! A bare operand is tested for truthiness. An outer `${{ ... }}` wrapper is
//! accepted and stripped.

use anyhow::{Result, bail};

/// Trims a condition and unwraps an outer `${{ ... }}` wrapper.
pub fn normalize_condition_expression(raw_expression: &str) -> String {
    let trimmed = raw_expression.trim();
    if let Some(stripped) = trimmed.strip_prefix("${{") {
        let inner = stripped.trim();
        let inner = inner.strip_suffix("}}").unwrap_or(inner);
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Checks a condition against the supported grammar without evaluating it.
pub fn validate_condition_expression(expression: &str) -> Result<()> {
    let normalized = normalize_condition_expression(expression);
    if normalized.is_empty() {
        bail!("expression cannot be empty");
    }

    if contains_operator(&normalized, "===") || contains_operator(&normalized, "!==") {
        bail!("strict equality operators are unsupported; use '==' or '!='");
    }
    if [">=", "<=", ">", "<"].iter().any(|operator| contains_operator(&normalized, operator)) {
        bail!("unsupported comparison operator; only '==', '!=', '&&', '||', '!' and '.includes(...)' are supported");
    }

    validate_condition_node(&normalized)
}

fn validate_condition_node(expression: &str) -> Result<()> {
    for operator in ["||", "&&"] {
        if let Some(parts) = split_expression(expression, operator) {
            for part in parts {
                validate_condition_node(part)?;
            }
            return Ok(());
        }
    }

    let (_, inner) = strip_leading_negations(expression);
    let inner = inner.trim();
    if inner.is_empty() {
        bail!("expression cannot end with negation operator");
    }

    if let Some((left, right)) = split_includes(inner) {
        if right.is_empty() {
            bail!("includes expression is missing an argument");
        }
        validate_operand_expression(left)?;
        return validate_operand_expression(right);
    }

    for operator in ["!=", "=="] {
        if let Some(position) = find_top_level_operator(inner, operator) {
            let left = inner[..position].trim();
            let right = inner[position + operator.len()..].trim();
            if left.is_empty() || right.is_empty() {
                bail!("comparison expression must include both left and right operands");
            }
            validate_operand_expression(left)?;
            return validate_operand_expression(right);
        }
    }

    validate_operand_expression(inner)
}

fn validate_operand_expression(expression: &str) -> Result<()> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        bail!("operand cannot be empty");
    }
    if looks_like_json_literal(trimmed) && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(());
    }
    if !is_supported_path_expression(trimmed) {
        bail!("unsupported expression '{trimmed}'; supported roots are vars.* and env.*");
    }
    Ok(())
}

/// Splits `left.includes(right)` into its trimmed operands.
pub(crate) fn split_includes(expression: &str) -> Option<(&str, &str)> {
    let index = find_top_level_operator(expression, ".includes(")?;
    let (left, right_with_suffix) = expression.split_at(index);
    let right = right_with_suffix.trim_start_matches(".includes(").trim();
    let right = right.strip_suffix(')').unwrap_or(right).trim();
    Some((left.trim(), right))
}

pub(crate) fn looks_like_json_literal(expression: &str) -> bool {
    let starts_like_number = expression
        .chars()
        .next()
        .map(|character| character == '-' || character.is_ascii_digit())
        .unwrap_or(false);
    expression.starts_with('[')
        || expression.starts_with('{')
        || expression.starts_with('"')
        || expression == "null"
        || expression == "true"
        || expression == "false"
        || starts_like_number
}

fn is_supported_path_expression(expression: &str) -> bool {
    if expression.contains(char::is_whitespace) {
        return false;
    }
    if let Some(environment_key) = expression.strip_prefix("env.") {
        return !environment_key.is_empty() && environment_key.chars().all(is_identifier_character);
    }
    if let Some(rest) = expression.strip_prefix("vars.") {
        return rest.split('.').all(validate_path_segment);
    }
    false
}

/// Accepts `name` optionally followed by numeric indexes, e.g. `items[0][2]`.
fn validate_path_segment(segment: &str) -> bool {
    let base_end = segment.find('[').unwrap_or(segment.len());
    let (base, mut indexes) = segment.split_at(base_end);
    if base.is_empty() || !base.chars().all(is_identifier_character) {
        return false;
    }
    while !indexes.is_empty() {
        let Some(rest) = indexes.strip_prefix('[') else {
            return false;
        };
        let Some(close) = rest.find(']') else {
            return false;
        };
        let digits = &rest[..close];
        if digits.is_empty() || !digits.chars().all(|character| character.is_ascii_digit()) {
            return false;
        }
        indexes = &rest[close + 1..];
    }
    true
}

fn is_identifier_character(character: char) -> bool {
    character.is_ascii_alphanumeric() || character == '_' || character == '-'
}

/// Splits on a top-level operator; `None` when the operator does not occur.
pub(crate) fn split_expression<'a>(expression: &'a str, operator: &str) -> Option<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0usize;

    while start < expression.len() {
        match find_top_level_operator(&expression[start..], operator) {
            Some(relative_index) => {
                let absolute_index = start + relative_index;
                parts.push(expression[start..absolute_index].trim());
                start = absolute_index + operator.len();
            }
            None => {
                parts.push(expression[start..].trim());
                break;
            }
        }
    }

    let parts: Vec<&str> = parts.into_iter().filter(|part| !part.is_empty()).collect();
    if parts.len() > 1 { Some(parts) } else { None }
}

/// Returns the number of leading `!` operators and the remaining expression.
pub(crate) fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

fn contains_operator(expression: &str, operator: &str) -> bool {
    find_top_level_operator(expression, operator).is_some()
}

/// Byte index of `operator` outside quotes and parentheses.
pub(crate) fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            '(' if !in_single_quote && !in_double_quote => {
                depth += 1;
                continue;
            }
            ')' if !in_single_quote && !in_double_quote => {
                depth = (depth - 1).max(0);
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }

    None
}
