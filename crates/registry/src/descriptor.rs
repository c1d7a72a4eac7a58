//! The command descriptor contract and shared settings helpers.

use serde::{Serialize, de::DeserializeOwned};
use stepflow_types::{BlockSlot, CommandError, Settings, SettingsError};

use crate::{command::Command, services::Services};

/// Static definition of one command kind.
///
/// One descriptor instance exists per kind and it is shared read-only once
/// the registry is built.
///
/// # Settings protocol
///
/// Every settings value carries a version. Descriptors must be able to
/// upgrade every version they still recognize to
/// [`latest_settings_version`](CommandDescriptor::latest_settings_version)
/// through [`migrate_to_latest`](CommandDescriptor::migrate_to_latest), and
/// migration of an already-latest value returns an equal value. Only
/// latest-version settings that pass
/// [`validate_settings`](CommandDescriptor::validate_settings) with no
/// problems are handed to [`create_command`](CommandDescriptor::create_command).
pub trait CommandDescriptor: Send + Sync {
    /// Globally unique kind identifier, e.g. `time.wait`.
    fn kind(&self) -> &str;

    fn display_name(&self) -> &str;

    fn icon_key(&self) -> Option<&str> {
        None
    }

    /// Short help text shown next to the kind in palettes.
    fn summary(&self) -> &str {
        ""
    }

    fn latest_settings_version(&self) -> u32;

    /// Child blocks owned by commands of this kind. Empty for leaf kinds.
    fn block_slots(&self) -> &[BlockSlot] {
        &[]
    }

    fn supports_breakpoints(&self) -> bool {
        false
    }

    /// Fresh settings at the latest version.
    fn create_default_settings(&self) -> Settings;

    /// Upgrades `settings` to the latest version.
    ///
    /// Fails with [`SettingsError::TypeMismatch`] or
    /// [`SettingsError::ShapeMismatch`] when the value is not settings of this
    /// kind, and with [`SettingsError::UnsupportedVersion`] for versions this
    /// kind dropped or never had.
    fn migrate_to_latest(&self, settings: &Settings) -> Result<Settings, SettingsError>;

    /// Human-readable problems with `settings`; empty means valid.
    fn validate_settings(&self, settings: &Settings) -> Vec<String>;

    /// Creates a runnable command. Fails only when a required service is missing.
    fn create_command(&self, settings: &Settings, services: &Services) -> Result<Box<dyn Command>, CommandError>;
}

/// Fails unless `settings` belong to `expected_kind`.
pub fn ensure_kind(expected_kind: &str, settings: &Settings) -> Result<(), SettingsError> {
    if settings.kind() == expected_kind {
        Ok(())
    } else {
        Err(SettingsError::TypeMismatch {
            expected: expected_kind.to_string(),
            actual: settings.kind().to_string(),
        })
    }
}

/// Decodes the kind-specific fields of `settings` into a typed schema struct.
pub fn decode_settings<T: DeserializeOwned>(settings: &Settings) -> Result<T, SettingsError> {
    serde_json::from_value(settings.to_value()).map_err(|error| SettingsError::ShapeMismatch {
        kind: settings.kind().to_string(),
        version: settings.version(),
        message: error.to_string(),
    })
}

/// Encodes a typed schema struct as settings of `kind` at `version`.
pub fn encode_settings<T: Serialize>(kind: &str, version: u32, value: &T) -> Result<Settings, SettingsError> {
    let encoded = serde_json::to_value(value).map_err(|error| SettingsError::ShapeMismatch {
        kind: kind.to_string(),
        version,
        message: error.to_string(),
    })?;
    Settings::from_value(kind, version, encoded)
}

pub fn unsupported_version(settings: &Settings, latest: u32) -> SettingsError {
    SettingsError::UnsupportedVersion {
        kind: settings.kind().to_string(),
        version: settings.version(),
        latest,
    }
}
