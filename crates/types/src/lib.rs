//! Shared type definitions for Stepflow.
//!
//! Everything in this crate is plain data: the control-flow signal returned by
//! commands, versioned settings values, block slot declarations, run events,
//! and the error enums shared by the registry and the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod block;
pub mod errors;
pub mod run;
pub mod settings;
pub mod value;

pub use block::BlockSlot;
pub use errors::{CommandError, InvalidBlockSlot, RegistryError, ResolveError, SettingsError};
pub use run::{BreakpointFlags, CommandFailure, PauseReason, RunControl, RunEvent, RunOutcome};
pub use settings::Settings;
pub use value::ValueSource;

/// Signal returned by every executed command.
///
/// Exactly one signal is produced per execution. `Next` lets the enclosing
/// sequence continue; every other signal stops the sequence and propagates
/// to the enclosing composite command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlow {
    /// Continue with the next sibling.
    Next,
    /// Leave the nearest enclosing loop.
    Break,
    /// Skip to the next iteration of the nearest enclosing loop.
    Continue,
    /// Halt the whole run.
    Stop,
    /// The command failed.
    Error,
}

impl ControlFlow {
    pub fn is_next(self) -> bool {
        matches!(self, ControlFlow::Next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlFlow::Next => "next",
            ControlFlow::Break => "break",
            ControlFlow::Continue => "continue",
            ControlFlow::Stop => "stop",
            ControlFlow::Error => "error",
        }
    }
}

impl fmt::Display for ControlFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identity of a command node within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
