//! Control-flow kinds: conditional, loop, loop signals, stop, and fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepflow_registry::{Command, CommandDescriptor, Invocation, LogLevel, Services, ensure_kind, unsupported_version};
use stepflow_types::{BlockSlot, CommandError, ControlFlow, Settings, SettingsError, ValueSource};
use tracing::{debug, warn};

use super::{condition_problem, decode_latest, default_settings, keep_latest};

pub const IF_KIND: &str = "control.if";
pub const WHILE_KIND: &str = "control.while";
pub const BREAK_KIND: &str = "control.break";
pub const CONTINUE_KIND: &str = "control.continue";
pub const STOP_KIND: &str = "control.stop";
pub const FAIL_KIND: &str = "control.fail";

pub const THEN_BLOCK: &str = "then";
pub const ELSE_BLOCK: &str = "else";
pub const BODY_BLOCK: &str = "body";

const IF_LATEST: u32 = 1;
const WHILE_LATEST: u32 = 2;
const SIGNAL_LATEST: u32 = 1;
const FAIL_LATEST: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IfSettings {
    pub condition: String,
}

impl Default for IfSettings {
    fn default() -> Self {
        Self { condition: "true".into() }
    }
}

pub struct IfDescriptor {
    slots: [BlockSlot; 2],
}

impl IfDescriptor {
    pub fn new() -> Self {
        Self {
            slots: [BlockSlot::optional(THEN_BLOCK), BlockSlot::optional(ELSE_BLOCK)],
        }
    }
}

impl Default for IfDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDescriptor for IfDescriptor {
    fn kind(&self) -> &str {
        IF_KIND
    }

    fn display_name(&self) -> &str {
        "If"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("branch")
    }

    fn summary(&self) -> &str {
        "Run the then block when a condition holds, otherwise the else block"
    }

    fn latest_settings_version(&self) -> u32 {
        IF_LATEST
    }

    fn block_slots(&self) -> &[BlockSlot] {
        &self.slots
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<IfSettings>(IF_KIND, IF_LATEST)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(IF_KIND, settings)?;
        match settings.version() {
            IF_LATEST => keep_latest::<IfSettings>(settings),
            _ => Err(unsupported_version(settings, IF_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        match decode_latest::<IfSettings>(IF_KIND, IF_LATEST, settings) {
            Ok(typed) => condition_problem("condition", &typed.condition).into_iter().collect(),
            Err(error) => vec![error.to_string()],
        }
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<IfSettings>(IF_KIND, IF_LATEST, settings)?;
        Ok(Box::new(IfCommand { condition: typed.condition }))
    }
}

struct IfCommand {
    condition: String,
}

#[async_trait]
impl Command for IfCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let holds = invocation.context().evaluate(&self.condition).await?;
        let branch = if holds { THEN_BLOCK } else { ELSE_BLOCK };
        debug!(command_id = %invocation.id(), branch, "conditional branch selected");
        Ok(invocation.run_block(branch).await)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WhileSettingsV1 {
    condition_expr: String,
    max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhileSettings {
    pub condition: String,
    pub max_iterations: u32,
}

impl From<WhileSettingsV1> for WhileSettings {
    fn from(previous: WhileSettingsV1) -> Self {
        Self {
            condition: previous.condition_expr,
            max_iterations: previous.max_iterations,
        }
    }
}

pub struct WhileDescriptor {
    slots: [BlockSlot; 1],
    default_max_iterations: u32,
}

impl WhileDescriptor {
    pub fn new(default_max_iterations: u32) -> Self {
        Self {
            slots: [BlockSlot::optional(BODY_BLOCK)],
            default_max_iterations: default_max_iterations.max(1),
        }
    }
}

impl CommandDescriptor for WhileDescriptor {
    fn kind(&self) -> &str {
        WHILE_KIND
    }

    fn display_name(&self) -> &str {
        "While"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("loop")
    }

    fn summary(&self) -> &str {
        "Repeat the body while a condition holds, up to an iteration limit"
    }

    fn latest_settings_version(&self) -> u32 {
        WHILE_LATEST
    }

    fn block_slots(&self) -> &[BlockSlot] {
        &self.slots
    }

    fn create_default_settings(&self) -> Settings {
        let defaults = WhileSettings {
            condition: "false".into(),
            max_iterations: self.default_max_iterations,
        };
        stepflow_registry::encode_settings(WHILE_KIND, WHILE_LATEST, &defaults).expect("while defaults encode as a JSON object")
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(WHILE_KIND, settings)?;
        match settings.version() {
            1 => {
                let previous: WhileSettingsV1 = stepflow_registry::decode_settings(settings)?;
                stepflow_registry::encode_settings(WHILE_KIND, WHILE_LATEST, &WhileSettings::from(previous))
            }
            WHILE_LATEST => keep_latest::<WhileSettings>(settings),
            _ => Err(unsupported_version(settings, WHILE_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        let typed = match decode_latest::<WhileSettings>(WHILE_KIND, WHILE_LATEST, settings) {
            Ok(typed) => typed,
            Err(error) => return vec![error.to_string()],
        };
        let mut problems: Vec<String> = condition_problem("condition", &typed.condition).into_iter().collect();
        if typed.max_iterations == 0 {
            problems.push("max_iterations must be at least 1".into());
        }
        problems
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<WhileSettings>(WHILE_KIND, WHILE_LATEST, settings)?;
        Ok(Box::new(WhileCommand {
            condition: typed.condition,
            max_iterations: typed.max_iterations,
        }))
    }
}

struct WhileCommand {
    condition: String,
    max_iterations: u32,
}

#[async_trait]
impl Command for WhileCommand {
    /// Loop boundary rules: `Continue` and `Next` from the body re-check the
    /// condition, `Break` ends the loop with `Next`, and `Stop` or `Error`
    /// propagate unchanged.
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let mut iterations = 0u32;
        loop {
            if invocation.context().is_cancelled() {
                return Ok(ControlFlow::Stop);
            }
            if !invocation.context().evaluate(&self.condition).await? {
                debug!(command_id = %invocation.id(), iterations, "loop condition no longer holds");
                return Ok(ControlFlow::Next);
            }
            if iterations >= self.max_iterations {
                warn!(command_id = %invocation.id(), iterations, "loop iteration guard tripped");
                return Err(CommandError::IterationLimitReached { max: self.max_iterations });
            }
            iterations += 1;

            match invocation.run_block(BODY_BLOCK).await {
                ControlFlow::Next | ControlFlow::Continue => continue,
                ControlFlow::Break => return Ok(ControlFlow::Next),
                flow @ (ControlFlow::Stop | ControlFlow::Error) => return Ok(flow),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptySettings {}

/// Leaf kinds that do nothing but return a fixed signal.
pub struct SignalDescriptor {
    kind: &'static str,
    display_name: &'static str,
    summary: &'static str,
    flow: ControlFlow,
}

impl SignalDescriptor {
    pub fn break_loop() -> Self {
        Self {
            kind: BREAK_KIND,
            display_name: "Break",
            summary: "Leave the nearest enclosing loop",
            flow: ControlFlow::Break,
        }
    }

    pub fn continue_loop() -> Self {
        Self {
            kind: CONTINUE_KIND,
            display_name: "Continue",
            summary: "Skip to the next iteration of the nearest enclosing loop",
            flow: ControlFlow::Continue,
        }
    }

    pub fn stop_run() -> Self {
        Self {
            kind: STOP_KIND,
            display_name: "Stop",
            summary: "Halt the whole run",
            flow: ControlFlow::Stop,
        }
    }
}

impl CommandDescriptor for SignalDescriptor {
    fn kind(&self) -> &str {
        self.kind
    }

    fn display_name(&self) -> &str {
        self.display_name
    }

    fn summary(&self) -> &str {
        self.summary
    }

    fn latest_settings_version(&self) -> u32 {
        SIGNAL_LATEST
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<EmptySettings>(self.kind, SIGNAL_LATEST)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(self.kind, settings)?;
        match settings.version() {
            SIGNAL_LATEST => keep_latest::<EmptySettings>(settings),
            _ => Err(unsupported_version(settings, SIGNAL_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        decode_latest::<EmptySettings>(self.kind, SIGNAL_LATEST, settings)
            .err()
            .map(|error| error.to_string())
            .into_iter()
            .collect()
    }

    fn create_command(&self, _settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        Ok(Box::new(SignalCommand { flow: self.flow }))
    }
}

struct SignalCommand {
    flow: ControlFlow,
}

#[async_trait]
impl Command for SignalCommand {
    async fn execute(&self, _invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        Ok(self.flow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailSettings {
    pub message: ValueSource,
}

impl Default for FailSettings {
    fn default() -> Self {
        Self {
            message: ValueSource::literal("script failed"),
        }
    }
}

pub struct FailDescriptor;

impl CommandDescriptor for FailDescriptor {
    fn kind(&self) -> &str {
        FAIL_KIND
    }

    fn display_name(&self) -> &str {
        "Fail"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("error")
    }

    fn summary(&self) -> &str {
        "End the run with an error message"
    }

    fn latest_settings_version(&self) -> u32 {
        FAIL_LATEST
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<FailSettings>(FAIL_KIND, FAIL_LATEST)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(FAIL_KIND, settings)?;
        match settings.version() {
            FAIL_LATEST => keep_latest::<FailSettings>(settings),
            _ => Err(unsupported_version(settings, FAIL_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        decode_latest::<FailSettings>(FAIL_KIND, FAIL_LATEST, settings)
            .err()
            .map(|error| error.to_string())
            .into_iter()
            .collect()
    }

    fn create_command(&self, settings: &Settings, _services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<FailSettings>(FAIL_KIND, FAIL_LATEST, settings)?;
        Ok(Box::new(FailCommand { message: typed.message }))
    }
}

struct FailCommand {
    message: ValueSource,
}

#[async_trait]
impl Command for FailCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let message = invocation.context().resolve(&self.message).await?;
        invocation.log(LogLevel::Error, &message);
        Err(CommandError::Failed { message })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn while_v1_renames_condition_field() {
        let descriptor = WhileDescriptor::new(50);
        let legacy = Settings::from_value(WHILE_KIND, 1, json!({ "condition_expr": "vars.go", "max_iterations": 7 })).expect("v1");

        let migrated = descriptor.migrate_to_latest(&legacy).expect("migrate");
        assert_eq!(migrated.version(), WHILE_LATEST);
        assert_eq!(migrated.field("condition"), Some(&json!("vars.go")));
        assert_eq!(migrated.field("max_iterations"), Some(&json!(7)));
        assert!(descriptor.validate_settings(&migrated).is_empty());
    }

    #[test]
    fn while_rejects_zero_iterations_and_bad_conditions() {
        let descriptor = WhileDescriptor::new(50);
        let settings = Settings::from_value(WHILE_KIND, 2, json!({ "condition": "vars.a > 1", "max_iterations": 0 })).expect("v2");

        let problems = descriptor.validate_settings(&settings);
        assert_eq!(problems.len(), 2, "{problems:?}");
    }

    #[test]
    fn while_default_uses_configured_bound() {
        let descriptor = WhileDescriptor::new(12);
        let defaults = descriptor.create_default_settings();
        assert_eq!(defaults.field("max_iterations"), Some(&json!(12)));
    }

    #[test]
    fn stale_settings_fail_validation() {
        let descriptor = WhileDescriptor::new(50);
        let legacy = Settings::from_value(WHILE_KIND, 1, json!({ "condition_expr": "true", "max_iterations": 3 })).expect("v1");
        let problems = descriptor.validate_settings(&legacy);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("must be migrated"));
    }

    #[test]
    fn unknown_versions_are_unsupported() {
        let descriptor = IfDescriptor::new();
        let future = Settings::from_value(IF_KIND, 9, json!({ "condition": "true" })).expect("v9");
        let result = descriptor.migrate_to_latest(&future);
        assert!(matches!(result, Err(SettingsError::UnsupportedVersion { version: 9, latest: 1, .. })));
    }

    #[test]
    fn signal_kinds_reject_unexpected_fields() {
        let descriptor = SignalDescriptor::break_loop();
        let settings = Settings::from_value(BREAK_KIND, 1, json!({ "label": "outer" })).expect("settings");
        let result = descriptor.migrate_to_latest(&settings);
        assert!(matches!(result, Err(SettingsError::ShapeMismatch { .. })));
    }
}
