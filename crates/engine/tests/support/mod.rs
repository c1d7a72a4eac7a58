#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stepflow_engine::{
    CommandDescriptor, CommandId, CommandRegistry, CommandTree, ControlFlow, EngineConfig, Location, RunEvent, Services, Settings,
    builtin_descriptors,
};
use stepflow_registry::{Command, DryRun, Invocation, decode_settings, encode_settings};
use stepflow_types::{CommandError, SettingsError};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SCRIPTED_KIND: &str = "test.scripted";

/// Labels of scripted commands in the order they ran.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<String>>,
}

impl ExecutionLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().expect("log lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("log lock").clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedSettings {
    pub label: String,
    #[serde(default = "next")]
    pub flow: ControlFlow,
    #[serde(default)]
    pub error: Option<String>,
    /// Cancel the run's token before returning.
    #[serde(default)]
    pub cancel_run: bool,
}

fn next() -> ControlFlow {
    ControlFlow::Next
}

/// Test kind that records its label and returns a configured signal.
pub struct ScriptedDescriptor;

impl CommandDescriptor for ScriptedDescriptor {
    fn kind(&self) -> &str {
        SCRIPTED_KIND
    }

    fn display_name(&self) -> &str {
        "Scripted"
    }

    fn latest_settings_version(&self) -> u32 {
        1
    }

    fn supports_breakpoints(&self) -> bool {
        true
    }

    fn create_default_settings(&self) -> Settings {
        scripted_settings("step", ControlFlow::Next)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        decode_settings::<ScriptedSettings>(settings)?;
        Ok(settings.clone())
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        decode_settings::<ScriptedSettings>(settings)
            .err()
            .map(|error| error.to_string())
            .into_iter()
            .collect()
    }

    fn create_command(&self, settings: &Settings, services: &Services) -> Result<Box<dyn Command>, CommandError> {
        Ok(Box::new(ScriptedCommand {
            settings: decode_settings(settings)?,
            log: services.require::<ExecutionLog>()?,
        }))
    }
}

struct ScriptedCommand {
    settings: ScriptedSettings,
    log: Arc<ExecutionLog>,
}

#[async_trait]
impl Command for ScriptedCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        self.log.record(&self.settings.label);
        if self.settings.cancel_run {
            invocation.context().cancellation().cancel();
        }
        match &self.settings.error {
            Some(message) => Err(CommandError::failed(message.clone())),
            None => Ok(self.settings.flow),
        }
    }

    fn dry_run(&self) -> Option<&dyn DryRun> {
        Some(self)
    }
}

#[async_trait]
impl DryRun for ScriptedCommand {
    async fn simulate(&self, _invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        self.log.record(format!("dry:{}", self.settings.label));
        Ok(ControlFlow::Next)
    }
}

pub fn scripted_settings(label: &str, flow: ControlFlow) -> Settings {
    encode_settings(
        SCRIPTED_KIND,
        1,
        &ScriptedSettings {
            label: label.to_string(),
            flow,
            error: None,
            cancel_run: false,
        },
    )
    .expect("scripted settings")
}

/// Built-in kinds plus the scripted test kind.
pub fn registry() -> CommandRegistry {
    let mut descriptors = builtin_descriptors(&EngineConfig::default());
    descriptors.push(Arc::new(ScriptedDescriptor));
    CommandRegistry::new(descriptors).expect("registry")
}

pub fn services(log: &Arc<ExecutionLog>) -> Services {
    let mut services = Services::new();
    services.insert(Arc::clone(log));
    services
}

pub fn add_scripted(tree: &mut CommandTree, location: &Location, label: &str, flow: ControlFlow) -> CommandId {
    add_with(tree, location, scripted_settings(label, flow))
}

pub fn add_failing(tree: &mut CommandTree, location: &Location, label: &str, message: &str) -> CommandId {
    let settings = Settings::from_value(SCRIPTED_KIND, 1, json!({ "label": label, "error": message })).expect("settings");
    add_with(tree, location, settings)
}

pub fn add_cancelling(tree: &mut CommandTree, location: &Location, label: &str) -> CommandId {
    let settings = Settings::from_value(SCRIPTED_KIND, 1, json!({ "label": label, "cancel_run": true })).expect("settings");
    add_with(tree, location, settings)
}

fn add_with(tree: &mut CommandTree, location: &Location, settings: Settings) -> CommandId {
    tree.add_with_settings(&ScriptedDescriptor, settings, location, None)
        .expect("add scripted")
}

/// Adds a built-in command with explicit latest-version settings.
pub fn add_builtin(tree: &mut CommandTree, registry: &CommandRegistry, location: &Location, kind: &str, fields: serde_json::Value) -> CommandId {
    let descriptor = registry.get(kind).expect("descriptor");
    let settings = Settings::from_value(kind, descriptor.latest_settings_version(), fields).expect("settings");
    tree.add_with_settings(descriptor.as_ref(), settings, location, None).expect("add builtin")
}

pub fn drain(events: &mut UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

pub fn started_ids(events: &[RunEvent]) -> Vec<CommandId> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::CommandStarting { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}
