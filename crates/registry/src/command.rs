//! Runnable command contracts.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use stepflow_types::{CommandError, CommandId, ControlFlow};

use crate::context::{ExecutionContext, LogLevel};

/// A runnable step created by a descriptor from validated, latest-version settings.
#[async_trait]
pub trait Command: Send + Sync {
    /// Performs the step and reports how the enclosing sequence should proceed.
    ///
    /// Returning `Err` is equivalent to `ControlFlow::Error`; the runner records
    /// the error message as the run's failure.
    async fn execute(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError>;

    /// Alternate entry point without real-world effects, when the kind offers one.
    fn dry_run(&self) -> Option<&dyn DryRun> {
        None
    }
}

/// Simulation capability for commands with side effects.
#[async_trait]
pub trait DryRun: Send + Sync {
    async fn simulate(&self, invocation: &mut Invocation<'_>) -> Result<ControlFlow, CommandError>;
}

/// Executes named child blocks of the command currently running.
///
/// Implemented by the runner; composite commands reach it through
/// [`Invocation::run_block`] so block execution follows the same sequence
/// rules as the root.
pub trait BlockRunner: Send + Sync {
    fn run_block<'a>(&'a self, name: &'a str, context: &'a mut ExecutionContext) -> BoxFuture<'a, ControlFlow>;
}

/// Everything a command sees while it executes.
pub struct Invocation<'a> {
    id: CommandId,
    kind: &'a str,
    context: &'a mut ExecutionContext,
    blocks: &'a dyn BlockRunner,
}

impl<'a> Invocation<'a> {
    pub fn new(id: CommandId, kind: &'a str, context: &'a mut ExecutionContext, blocks: &'a dyn BlockRunner) -> Self {
        Self {
            id,
            kind,
            context,
            blocks,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn kind(&self) -> &str {
        self.kind
    }

    pub fn context(&self) -> &ExecutionContext {
        &*self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut *self.context
    }

    /// Runs the child block `name` and returns the signal it ended with.
    ///
    /// A missing block behaves like an empty one and yields `Next`.
    pub async fn run_block(&mut self, name: &str) -> ControlFlow {
        self.blocks.run_block(name, &mut *self.context).await
    }

    /// Logs a line attributed to this command.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.context.log(level, Some(self.id), message);
    }
}
