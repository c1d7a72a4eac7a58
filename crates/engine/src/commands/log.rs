use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepflow_registry::{Command, CommandDescriptor, Invocation, LogLevel, Services, ensure_kind, unsupported_version};
use stepflow_types::{CommandError, ControlFlow, Settings, SettingsError, ValueSource};

use super::{decode_latest, default_settings, keep_latest};

pub const MESSAGE_KIND: &str = "log.message";

const MESSAGE_LATEST: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogMessageSettings {
    pub message: ValueSource,
    #[serde(default = "default_level")]
    pub level: LogLevel,
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LogMessageSettings {
    fn default() -> Self {
        Self {
            message: ValueSource::template("step reached"),
            level: default_level(),
        }
    }
}

pub struct LogMessageDescriptor;

impl CommandDescriptor for LogMessageDescriptor {
    fn kind(&self) -> &str {
        MESSAGE_KIND
    }

    fn display_name(&self) -> &str {
        "Log message"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("message")
    }

    fn summary(&self) -> &str {
        "Write a resolved message to the run log"
    }

    fn latest_settings_version(&self) -> u32 {
        MESSAGE_LATEST
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<LogMessageSettings>(MESSAGE_KIND, MESSAGE_LATEST)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(MESSAGE_KIND, settings)?;
        match settings.version() {
            MESSAGE_LATEST => keep_latest::<LogMessageSettings>(settings),
            _ => Err(unsupported_version(settings, MESSAGE_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        decode_latest::<LogMessageSettings>(MESSAGE_KIND, MESSAGE_LATEST, settings)
            .err()
            .map(|error| error.to_string())
            .into_iter()
            .collect()
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<LogMessageSettings>(MESSAGE_KIND, MESSAGE_LATEST, settings)?;
        Ok(Box::new(LogMessageCommand { settings: typed }))
    }
}

struct LogMessageCommand {
    settings: LogMessageSettings,
}

#[async_trait]
impl Command for LogMessageCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let message = invocation.context().resolve(&self.settings.message).await?;
        invocation.log(self.settings.level, &message);
        Ok(ControlFlow::Next)
    }
}
