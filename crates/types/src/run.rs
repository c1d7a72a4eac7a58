//! Run lifecycle events, debugger controls, and outcomes.
//!
//! Events are produced in program order on a single channel so consumers
//! can rely on `CommandFinished` for one command arriving before
//! `CommandStarting` for the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CommandId, ControlFlow};

/// Pause points requested on a command node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointFlags {
    #[serde(default)]
    pub before: bool,
    #[serde(default)]
    pub after: bool,
}

impl BreakpointFlags {
    pub fn is_set(&self) -> bool {
        self.before || self.after
    }
}

/// Why a debug session paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    BreakpointBefore,
    BreakpointAfter,
    Requested,
}

/// Control commands accepted by a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunControl {
    Pause,
    Resume,
    Cancel,
}

/// The first command failure observed in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    pub id: CommandId,
    pub kind: String,
    pub message: String,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Signal the root sequence ended with.
    pub flow: ControlFlow,
    /// True when the run ended because cancellation was requested.
    pub cancelled: bool,
    /// First failing command, when any command failed.
    pub failure: Option<CommandFailure>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.failure.is_none() && self.flow != ControlFlow::Error
    }
}

/// Lifecycle notifications emitted while a program runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        at: DateTime<Utc>,
    },
    CommandStarting {
        id: CommandId,
        kind: String,
    },
    CommandFinished {
        id: CommandId,
        kind: String,
        flow: ControlFlow,
        message: Option<String>,
        duration_ms: u64,
    },
    Paused {
        id: CommandId,
        reason: PauseReason,
    },
    Resumed {
        id: CommandId,
    },
    RunCompleted {
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_outcome_is_not_success() {
        let outcome = RunOutcome {
            flow: ControlFlow::Stop,
            cancelled: true,
            failure: None,
        };
        assert!(!outcome.succeeded());
    }

    #[test]
    fn stop_without_cancellation_is_success() {
        let outcome = RunOutcome {
            flow: ControlFlow::Stop,
            cancelled: false,
            failure: None,
        };
        assert!(outcome.succeeded());
    }

    #[test]
    fn events_are_tagged() {
        let event = RunEvent::CommandStarting {
            id: CommandId::new(3),
            kind: "time.wait".into(),
        };
        let encoded = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(encoded["event"], "command_starting");
        assert_eq!(encoded["id"], 3);
    }
}
