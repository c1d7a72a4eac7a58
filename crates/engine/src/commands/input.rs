//! Pointer input. The actual device is a host service looked up when the
//! program is prepared, so scripts can be checked and dry-run without one.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepflow_registry::{
    Command, CommandDescriptor, DryRun, Invocation, LogLevel, Services, decode_settings, encode_settings, ensure_kind, unsupported_version,
};
use stepflow_types::{CommandError, ControlFlow, Settings, SettingsError};
use tracing::debug;

use super::{decode_latest, default_settings, keep_latest};

pub const CLICK_KIND: &str = "input.click";

const CLICK_LATEST: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        };
        f.write_str(label)
    }
}

/// Host-provided pointer device.
#[async_trait]
pub trait PointerDevice: Send + Sync {
    async fn click(&self, x: i32, y: i32, button: MouseButton) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClickSettingsV1 {
    x: i32,
    y: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickSettings {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub button: MouseButton,
}

pub struct ClickDescriptor;

impl CommandDescriptor for ClickDescriptor {
    fn kind(&self) -> &str {
        CLICK_KIND
    }

    fn display_name(&self) -> &str {
        "Click"
    }

    fn icon_key(&self) -> Option<&str> {
        Some("pointer")
    }

    fn summary(&self) -> &str {
        "Click a mouse button at screen coordinates"
    }

    fn latest_settings_version(&self) -> u32 {
        CLICK_LATEST
    }

    fn supports_breakpoints(&self) -> bool {
        true
    }

    fn create_default_settings(&self) -> Settings {
        default_settings::<ClickSettings>(CLICK_KIND, CLICK_LATEST)
    }

    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError> {
        ensure_kind(CLICK_KIND, settings)?;
        match settings.version() {
            1 => {
                let previous: ClickSettingsV1 = decode_settings(settings)?;
                let upgraded = ClickSettings {
                    x: previous.x,
                    y: previous.y,
                    button: MouseButton::Left,
                };
                encode_settings(CLICK_KIND, CLICK_LATEST, &upgraded)
            }
            CLICK_LATEST => keep_latest::<ClickSettings>(settings),
            _ => Err(unsupported_version(settings, CLICK_LATEST)),
        }
    }

    fn validate_settings(&self, settings: &Settings) -> Vec<String> {
        let typed = match decode_latest::<ClickSettings>(CLICK_KIND, CLICK_LATEST, settings) {
            Ok(typed) => typed,
            Err(error) => return vec![error.to_string()],
        };
        [("x", typed.x), ("y", typed.y)]
            .into_iter()
            .filter(|(_, coordinate)| *coordinate < 0)
            .map(|(field, coordinate)| format!("{field}: coordinate {coordinate} is off screen"))
            .collect()
    }

    fn create_command(&self, settings: &Settings, services: &Services) -> Result<Box<dyn Command>, CommandError> {
        let typed = decode_latest::<ClickSettings>(CLICK_KIND, CLICK_LATEST, settings)?;
        let device = services.require::<dyn PointerDevice>()?;
        Ok(Box::new(ClickCommand { settings: typed, device }))
    }
}

struct ClickCommand {
    settings: ClickSettings,
    device: Arc<dyn PointerDevice>,
}

#[async_trait]
impl Command for ClickCommand {
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let ClickSettings { x, y, button } = self.settings;
        debug!(command_id = %invocation.id(), x, y, %button, "clicking");
        self.device
            .click(x, y, button)
            .await
            .map_err(|error| CommandError::Device { message: format!("{error:#}") })?;
        Ok(ControlFlow::Next)
    }

    fn dry_run(&self) -> Option<&dyn DryRun> {
        Some(self)
    }
}

#[async_trait]
impl DryRun for ClickCommand {
    async fn simulate(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError> {
        let ClickSettings { x, y, button } = self.settings;
        invocation.log(LogLevel::Info, &format!("would {button}-click at ({x}, {y})"));
        Ok(ControlFlow::Next)
    }
}
