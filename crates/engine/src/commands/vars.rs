use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepflow_registry::{Command, CommandDescriptor, Invocation, Services, decode_settings, encode_settings, ensure_kind, unsupported_version};
use stepflow_types::{CommandError, ControlFlow, Settings, SettingsError, ValueSource};
use tracing::debug;

use super::{decode_latest, default_settings, keep_latest};

pub const SET_KIND: &str = "vars.set";

const SET_LATEST: u32 = 2;

static VARIABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable name regex should compile"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetVariableSettingsV1 {
    name: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetVariableSettings {
    pub name: String,
    pub value: ValueSource,
    /// Store the resolved text as parsed JSON instead of a string.
    #[serde(default)]
    pub parse_json: bool,
}

impl Default for SetVariableSettings {
    fn default() -> Self {
        Self {
            name: "result".into(),
            value: ValueSource::default(),
            parse_json: false,
        }
    }
}

pub struct SetVariableDescriptor;

impl CommandDescriptor for SetVariableDescriptor {
    fn kind(&self) -> &str {
        SET_KIND
    }

    fn display_name(&self) -> &str {
        "Set variable"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("variable")
    }

    fn summary(&self) -> &str {
        "Write a resolved value into the run's variable scope"
    }

    fn latest_settings_version(&self) -> u32 {
        SET_LATEST
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<SetVariableSettings>(SET_KIND, SET_LATEST)
    }

    /// Version 1 stored the value as raw text that was always interpolated,
    /// so it becomes a template source.
    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(SET_KIND, settings)?;
        match settings.version() {
            1 => {
                let previous: SetVariableSettingsV1 = decode_settings(settings)?;
                let upgraded = SetVariableSettings {
                    name: previous.name,
                    value: ValueSource::template(previous.value),
                    parse_json: false,
                };
                encode_settings(SET_KIND, SET_LATEST, &upgraded)
            }
            SET_LATEST => keep_latest::<SetVariableSettings>(settings),
            _ => Err(unsupported_version(settings, SET_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        let typed = match decode_latest::<SetVariableSettings>(SET_KIND, SET_LATEST, settings) {
            Ok(typed) => typed,
            Err(error) => return vec![error.to_string()],
        };
        let mut problems = Vec::new();
        if !VARIABLE_NAME_REGEX.is_match(&typed.name) {
            problems.push(format!("name: '{}' is not a valid variable name", typed.name));
        }
        if typed.parse_json
            && let ValueSource::Literal(text) = &typed.value
            && let Err(error) = serde_json::from_str::<Value>(text)
        {
            problems.push(format!("value: literal is not valid JSON: {error}"));
        }
        problems
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<SetVariableSettings>(SET_KIND, SET_LATEST, settings)?;
        Ok(Box::new(SetVariableCommand { settings: typed }))
    }
}

struct SetVariableCommand {
    settings: SetVariableSettings,
}

#[async_trait]
impl Command for SetVariableCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let text = invocation.context().resolve(&self.settings.value).await?;
        let value = if self.settings.parse_json {
            serde_json::from_str(&text)
                .map_err(|error| CommandError::failed(format!("value for '{}' is not valid JSON: {error}", self.settings.name)))?
        } else {
            Value::String(text)
        };
        debug!(command_id = %invocation.id(), variable = %self.settings.name, "variable set");
        invocation.context_mut().scope_mut().set(&self.settings.name, value);
        Ok(ControlFlow::Next)
    }
}
