use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepflow_registry::{
    Command, CommandDescriptor, DryRun, Invocation, LogLevel, Services, SleepOutcome, decode_settings, encode_settings, ensure_kind,
    unsupported_version,
};
use stepflow_types::{CommandError, ControlFlow, Settings, SettingsError, ValueSource};
use stepflow_util::{format_duration, parse_duration};
use tokio::time::Instant;
use tracing::debug;

use super::{condition_problem, decode_latest, default_settings, duration_problem, keep_latest};

pub const WAIT_KIND: &str = "time.wait";
pub const WAIT_UNTIL_KIND: &str = "time.wait_until";

const WAIT_LATEST: u32 = 2;
const WAIT_UNTIL_LATEST: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WaitSettingsV1 {
    milliseconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitSettings {
    pub duration: ValueSource,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            duration: ValueSource::literal("1s"),
        }
    }
}

/// Fixed delay. Durations accept `ms`, `s`, `m` and `h` suffixes.
pub struct WaitDescriptor;

impl CommandDescriptor for WaitDescriptor {
    fn kind(&self) -> &str {
        WAIT_KIND
    }

    fn display_name(&self) -> &str {
        "Wait"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("clock")
    }

    fn summary(&self) -> &str {
        "Pause for a fixed duration"
    }

    fn latest_settings_version(&self) -> u32 {
        WAIT_LATEST
    }

    fn supports_breakpoints(&self) -> bool {
        true
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<WaitSettings>(WAIT_KIND, WAIT_LATEST)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(WAIT_KIND, settings)?;
        match settings.version() {
            1 => {
                let previous: WaitSettingsV1 = decode_settings(settings)?;
                let upgraded = WaitSettings {
                    duration: ValueSource::literal(format_duration(Duration::from_millis(previous.milliseconds))),
                };
                encode_settings(WAIT_KIND, WAIT_LATEST, &upgraded)
            }
            WAIT_LATEST => keep_latest::<WaitSettings>(settings),
            _ => Err(unsupported_version(settings, WAIT_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        match decode_latest::<WaitSettings>(WAIT_KIND, WAIT_LATEST, settings) {
            Ok(typed) => duration_problem("duration", &typed.duration).into_iter().collect(),
            Err(error) => vec![error.to_string()],
        }
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<WaitSettings>(WAIT_KIND, WAIT_LATEST, settings)?;
        Ok(Box::new(WaitCommand { duration: typed.duration }))
    }
}

struct WaitCommand {
    duration: ValueSource,
}

impl WaitCommand {
    async fn resolve_duration(&self, invocation: &Invocation<'_>) -> Result<Duration, CommandError> {
        let text = invocation.context().resolve(&self.duration).await?;
        parse_duration(&text).map_err(|error| CommandError::failed(format!("invalid wait duration: {error}")))
    }
}

#[async_trait]
impl Command for WaitCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let duration = self.resolve_duration(invocation).await?;
        debug!(command_id = %invocation.id(), duration_ms = duration.as_millis() as u64, "waiting");
        match invocation.context().sleep(duration).await {
            SleepOutcome::Elapsed => Ok(ControlFlow::Next),
            SleepOutcome::Cancelled => Ok(ControlFlow::Stop),
        }
    }

    fn dry_run(&self) -> Option<&dyn DryRun> {
        Some(self)
    }
}

#[async_trait]
impl DryRun for WaitCommand {
    async fn simulate(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let duration = self.resolve_duration(invocation).await?;
        invocation.log(LogLevel::Info, &format!("would wait {}", format_duration(duration)));
        Ok(ControlFlow::Next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitUntilSettings {
    pub condition: String,
    pub timeout: String,
    pub poll_interval: String,
}

/// Polls a condition until it holds or a timeout elapses.
pub struct WaitUntilDescriptor {
    default_poll_interval: Duration,
    default_timeout: Duration,
}

impl WaitUntilDescriptor {
    pub fn new(default_poll_interval: Duration, default_timeout: Duration) -> Self {
        Self {
            default_poll_interval,
            default_timeout,
        }
    }
}

impl CommandDescriptor for WaitUntilDescriptor {
    fn kind(&self) -> &str {
        WAIT_UNTIL_KIND
    }

    fn display_name(&self) -> &str {
        "Wait until"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("hourglass")
    }

    fn summary(&self) -> &str {
        "Poll a condition until it holds or the timeout elapses"
    }

    fn latest_settings_version(&self) -> u32 {
        WAIT_UNTIL_LATEST
    }

    fn supports_breakpoints(&self) -> bool {
        true
    }

    fn create_default_settings(&self) -> Settings {
        let defaults = WaitUntilSettings {
            condition: "true".into(),
            timeout: format_duration(self.default_timeout),
            poll_interval: format_duration(self.default_poll_interval),
        };
        encode_settings(WAIT_UNTIL_KIND, WAIT_UNTIL_LATEST, &defaults).expect("wait_until defaults encode as a JSON object")
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(WAIT_UNTIL_KIND, settings)?;
        match settings.version() {
            WAIT_UNTIL_LATEST => keep_latest::<WaitUntilSettings>(settings),
            _ => Err(unsupported_version(settings, WAIT_UNTIL_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        let typed = match decode_latest::<WaitUntilSettings>(WAIT_UNTIL_KIND, WAIT_UNTIL_LATEST, settings) {
            Ok(typed) => typed,
            Err(error) => return vec![error.to_string()],
        };
        let mut problems: Vec<String> = condition_problem("condition", &typed.condition).into_iter().collect();
        for (field, text) in [("timeout", &typed.timeout), ("poll_interval", &typed.poll_interval)] {
            match parse_duration(text) {
                Ok(duration) if duration.is_zero() => problems.push(format!("{field}: must be greater than zero")),
                Ok(_) => {}
                Err(error) => problems.push(format!("{field}: {error}")),
            }
        }
        problems
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<WaitUntilSettings>(WAIT_UNTIL_KIND, WAIT_UNTIL_LATEST, settings)?;
        Ok(Box::new(WaitUntilCommand {
            timeout: parse_duration(&typed.timeout).unwrap_or(self.default_timeout),
            poll_interval: parse_duration(&typed.poll_interval).unwrap_or(self.default_poll_interval),
            condition: typed.condition,
        }))
    }
}

struct WaitUntilCommand {
    condition: String,
    timeout: Duration,
    poll_interval: Duration,
}

#[async_trait]
impl Command for WaitUntilCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let deadline = Instant::now() + self.timeout;
        let mut polls = 0u32;
        loop {
            if invocation.context().evaluate(&self.condition).await? {
                debug!(command_id = %invocation.id(), polls, "wait condition satisfied");
                return Ok(ControlFlow::Next);
            }
            polls += 1;

            let now = Instant::now();
            if now >= deadline {
                return Err(CommandError::TimedOut {
                    condition: self.condition.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            let pause = self.poll_interval.min(deadline - now);
            if invocation.context().sleep(pause).await == SleepOutcome::Cancelled {
                return Ok(ControlFlow::Stop);
            }
        }
    }

    fn dry_run(&self) -> Option<&dyn DryRun> {
        Some(self)
    }
}

#[async_trait]
impl DryRun for WaitUntilCommand {
    async fn simulate(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        invocation.log(
            LogLevel::Info,
            &format!("would wait up to {} for '{}'", format_duration(self.timeout), self.condition),
        );
        Ok(ControlFlow::Next)
    }
}
