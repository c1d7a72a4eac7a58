use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a setting's runtime value comes from.
///
/// The interpreter never looks inside a source; it hands it to the run's
/// value resolver. Persisted as `{ "source": "template", "value": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum ValueSource {
    /// Used verbatim.
    Literal(String),
    /// Read from the run's variable scope by name.
    Variable(String),
    /// Text with `${{ ... }}` placeholders.
    Template(String),
}

impl ValueSource {
    pub fn literal(value: impl Into<String>) -> Self {
        ValueSource::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        ValueSource::Variable(name.into())
    }

    pub fn template(text: impl Into<String>) -> Self {
        ValueSource::Template(text.into())
    }
}

impl Default for ValueSource {
    fn default() -> Self {
        ValueSource::Literal(String::new())
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Literal(value) => write!(f, "{value:?}"),
            ValueSource::Variable(name) => write!(f, "${name}"),
            ValueSource::Template(text) => f.write_str(text),
        }
    }
}
