//! Human-friendly duration parsing for wait and polling settings.
//!
//! Accepts a non-negative integer followed by an optional unit: `ms`, `s`,
//! `m`, or `h`. A bare number is read as milliseconds.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("duration cannot be empty")]
    Empty,
    #[error("'{input}' is not a valid duration; expected forms like 250ms, 5s, 2m or 1h")]
    Invalid { input: String },
    #[error("duration '{input}' is too large")]
    Overflow { input: String },
}

/// Parses durations such as `"250ms"`, `"5s"`, `"2m"`, `"1h"` or `"750"`.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    let split_at = trimmed.find(|character: char| !character.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split_at);
    if digits.is_empty() {
        return Err(DurationParseError::Invalid { input: trimmed.to_string() });
    }
    let value: u64 = digits.parse().map_err(|_| DurationParseError::Overflow { input: trimmed.to_string() })?;

    let multiplier_ms: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return Err(DurationParseError::Invalid { input: trimmed.to_string() }),
    };
    let millis = value
        .checked_mul(multiplier_ms)
        .ok_or_else(|| DurationParseError::Overflow { input: trimmed.to_string() })?;
    Ok(Duration::from_millis(millis))
}

/// Formats a duration in the largest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0ms".into();
    }
    if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}
