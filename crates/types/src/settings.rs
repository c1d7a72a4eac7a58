//! Versioned, immutable command settings.
//!
//! A [`Settings`] value is owned by exactly one command node. It is never
//! edited in place: migration and authoring both produce a fresh value that
//! replaces the previous one wholesale.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::SettingsError;

/// Field names reserved by the persisted envelope.
const RESERVED_FIELDS: [&str; 2] = ["kind", "version"];

/// Kind-specific configuration tagged with its owning kind and schema version.
///
/// Persisted as a flat object: `{ "kind": "time.wait", "version": 2, "duration": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SettingsRecord")]
pub struct Settings {
    kind: String,
    version: u32,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Settings {
    /// Builds a settings value, rejecting version `0` and reserved field names.
    pub fn new(kind: impl Into<String>, version: u32, fields: Map<String, Value>) -> Result<Self, SettingsError> {
        let kind = kind.into();
        if version == 0 {
            return Err(SettingsError::InvalidVersion { kind });
        }
        if let Some(reserved) = RESERVED_FIELDS.iter().find(|name| fields.contains_key(**name)) {
            return Err(SettingsError::ShapeMismatch {
                kind,
                version,
                message: format!("field '{reserved}' is reserved"),
            });
        }
        Ok(Self { kind, version, fields })
    }

    /// Builds a settings value from an arbitrary JSON value, which must be an object.
    pub fn from_value(kind: impl Into<String>, version: u32, value: Value) -> Result<Self, SettingsError> {
        let kind = kind.into();
        match value {
            Value::Object(fields) => Self::new(kind, version, fields),
            Value::Null => Self::new(kind, version, Map::new()),
            other => Err(SettingsError::ShapeMismatch {
                kind,
                version,
                message: format!("expected an object, found {}", json_type_name(&other)),
            }),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Kind-specific fields as a JSON object, ready for typed decoding.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[derive(Deserialize)]
struct SettingsRecord {
    kind: String,
    version: u32,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl TryFrom<SettingsRecord> for Settings {
    type Error = SettingsError;

    fn try_from(record: SettingsRecord) -> Result<Self, Self::Error> {
        Settings::new(record.kind, record.version, record.fields)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
