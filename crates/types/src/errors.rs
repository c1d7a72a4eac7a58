//! Error types shared by the registry and the engine.

use thiserror::Error;

/// A block slot declaration that violates its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("block slot '{slot}' is invalid: {reason}")]
pub struct InvalidBlockSlot {
    pub slot: String,
    pub reason: String,
}

/// Configuration errors raised while building or querying the command registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No descriptor is registered for the requested kind.
    #[error("no command descriptor registered for kind '{kind}'")]
    DescriptorNotFound { kind: String },

    /// Two descriptors claim the same kind.
    #[error("command kind '{kind}' is registered more than once")]
    DuplicateDescriptor { kind: String },

    /// A descriptor declared an empty kind identifier.
    #[error("command descriptor '{display_name}' has an empty kind")]
    EmptyKind { display_name: String },

    /// A descriptor declared a kind with leading or trailing whitespace.
    #[error("command kind '{kind}' has surrounding whitespace")]
    PaddedKind { kind: String },

    /// A descriptor declared an invalid or duplicated block slot.
    #[error("command kind '{kind}' declares an invalid block slot")]
    InvalidBlockSlot {
        kind: String,
        #[source]
        source: InvalidBlockSlot,
    },
}

/// Errors raised while migrating or decoding settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// The settings belong to a different kind.
    #[error("settings of kind '{actual}' cannot be used by '{expected}'")]
    TypeMismatch { expected: String, actual: String },

    /// The fields do not match the schema of the declared version.
    #[error("'{kind}' settings v{version} do not match their schema: {message}")]
    ShapeMismatch { kind: String, version: u32, message: String },

    /// The version was dropped or never existed for this kind.
    #[error("'{kind}' settings v{version} are not supported (latest is v{latest})")]
    UnsupportedVersion { kind: String, version: u32, latest: u32 },

    /// A recognized older version was used where only the latest is accepted.
    #[error("'{kind}' settings v{version} must be migrated to v{latest} before use")]
    Stale { kind: String, version: u32, latest: u32 },

    /// Settings versions start at 1.
    #[error("'{kind}' settings version must be at least 1")]
    InvalidVersion { kind: String },
}

/// Errors raised by a value resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("malformed expression '{expression}': {reason}")]
    Malformed { expression: String, reason: String },

    #[error("value resolution was cancelled")]
    Cancelled,
}

/// Errors a command reports instead of a control-flow signal.
///
/// The runner maps every command error to `ControlFlow::Error` and records
/// the message as the run's failure.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A loop reached its iteration bound with its condition still true.
    #[error("loop reached its iteration limit of {max} with the condition still true")]
    IterationLimitReached { max: u32 },

    /// A polling command gave up waiting.
    #[error("condition '{condition}' was still false after {timeout_ms}ms")]
    TimedOut { condition: String, timeout_ms: u64 },

    /// A required host service was not registered.
    #[error("required service '{service}' is not registered")]
    MissingService { service: &'static str },

    /// A device collaborator reported a failure.
    #[error("device error: {message}")]
    Device { message: String },

    #[error("{message}")]
    Failed { message: String },
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed { message: message.into() }
    }
}
