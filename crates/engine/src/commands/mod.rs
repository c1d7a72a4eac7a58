//! Built-in command kinds.
//!
//! | kind | blocks | latest settings |
//! |---|---|---|
//! | `control.if` | `then`, `else` | v1 `{ condition }` |
//! | `control.while` | `body` | v2 `{ condition, max_iterations }` |
//! | `control.break` / `control.continue` / `control.stop` | | v1 `{}` |
//! | `control.fail` | | v1 `{ message }` |
//! | `time.wait` | | v2 `{ duration }` |
//! | `time.wait_until` | | v1 `{ condition, timeout, poll_interval }` |
//! | `vars.set` | | v2 `{ name, value, parse_json }` |
//! | `log.message` | | v1 `{ message, level }` |
//! | `input.click` | | v2 `{ x, y, button }` |

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use stepflow_registry::{CommandDescriptor, decode_settings, encode_settings, ensure_kind};
use stepflow_types::{Settings, SettingsError, ValueSource};
use stepflow_util::parse_duration;

use crate::{condition_syntax::validate_condition_expression, config::EngineConfig};

pub mod control;
pub mod input;
pub mod log;
pub mod time;
pub mod vars;

/// Every built-in descriptor, in palette order.
pub fn builtin_descriptors(config: &EngineConfig) -> Vec<Arc<dyn CommandDescriptor>> {
    vec![
        Arc::new(control::IfDescriptor::new()),
        Arc::new(control::WhileDescriptor::new(config.default_max_iterations)),
        Arc::new(control::SignalDescriptor::break_loop()),
        Arc::new(control::SignalDescriptor::continue_loop()),
        Arc::new(control::SignalDescriptor::stop_run()),
        Arc::new(control::FailDescriptor),
        Arc::new(time::WaitDescriptor),
        Arc::new(time::WaitUntilDescriptor::new(config.poll_interval(), config.wait_timeout())),
        Arc::new(vars::SetVariableDescriptor),
        Arc::new(log::LogMessageDescriptor),
        Arc::new(input::ClickDescriptor),
    ]
}

/// Decodes settings that must already be at `latest`.
pub(crate) fn decode_latest<T: DeserializeOwned>(kind: &str, latest: u32, settings: &Settings) -> Result<T, SettingsError> {
    ensure_kind(kind, settings)?;
    if settings.version() != latest {
        return Err(SettingsError::Stale {
            kind: kind.to_string(),
            version: settings.version(),
            latest,
        });
    }
    decode_settings(settings)
}

/// Checks that latest-version settings decode and returns them unchanged.
pub(crate) fn keep_latest<T: DeserializeOwned>(settings: &Settings) -> Result<Settings, SettingsError> {
    decode_settings::<T>(settings)?;
    Ok(settings.clone())
}

/// Default settings for a kind.
pub(crate) fn default_settings<T: Serialize + Default>(kind: &str, version: u32) -> Settings {
    encode_settings(kind, version, &T::default()).expect("schema defaults encode as a JSON object")
}

pub(crate) fn condition_problem(field: &str, expression: &str) -> Option<String> {
    validate_condition_expression(expression)
        .err()
        .map(|error| format!("{field}: {error}"))
}

/// Literal durations are checked eagerly; other sources are checked when resolved.
pub(crate) fn duration_problem(field: &str, source: &ValueSource) -> Option<String> {
    match source {
        ValueSource::Literal(text) => parse_duration(text).err().map(|error| format!("{field}: {error}")),
        ValueSource::Variable(name) if name.trim().is_empty() => Some(format!("{field}: variable name cannot be empty")),
        _ => None,
    }
}
