//! Command descriptor contracts and the command registry.
//!
//! A *descriptor* is the static definition of one step kind: its identity,
//! its settings schema history, the child blocks it owns, and a factory for
//! runnable commands. The [`CommandRegistry`] maps kind identifiers to
//! descriptors and is built once at startup.
//!
//! This crate also defines the seams a runnable command sees at execution
//! time: the [`ExecutionContext`] with its variable scope, value resolver,
//! logger, cancellation token and delay primitive, and the [`Services`]
//! locator that hands host-provided devices to command factories.

pub mod command;
pub mod context;
pub mod descriptor;
pub mod models;
pub mod search;
pub mod services;

pub use command::{BlockRunner, Command, DryRun, Invocation};
pub use context::{Delay, ExecutionContext, LogLevel, RunLogger, SleepOutcome, ValueResolver, VariableScope};
pub use descriptor::{CommandDescriptor, decode_settings, encode_settings, ensure_kind, unsupported_version};
pub use models::CommandRegistry;
pub use search::PaletteEntry;
pub use services::Services;
pub use stepflow_types::{
    BlockSlot, CommandError, CommandId, ControlFlow, RegistryError, ResolveError, Settings, SettingsError, ValueSource,
};
