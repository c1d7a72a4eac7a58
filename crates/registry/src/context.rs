//! Per-run execution context and the collaborator contracts it carries.
//!
//! One [`ExecutionContext`] exists per run. Commands reach the variable scope,
//! value resolution, logging, cancellation and waiting only through it, so a
//! host can swap any collaborator without touching command code.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepflow_types::{CommandId, ResolveError, ValueSource};
use tokio_util::sync::CancellationToken;

/// Name to value mapping shared by every command of a run.
///
/// Writes are unconditional and the last write wins.
pub trait VariableScope: Send + Sync {
    fn try_get(&self, name: &str) -> Option<&Value>;
    fn set(&mut self, name: &str, value: Value);
    /// Variable names in the scope's iteration order.
    fn names(&self) -> Vec<String>;
}

/// Turns value sources into text and evaluates condition expressions.
///
/// Implementations must honor `cancel` when resolution can suspend.
#[async_trait]
pub trait ValueResolver: Send + Sync {
    async fn resolve(&self, source: &ValueSource, scope: &dyn VariableScope, cancel: &CancellationToken) -> Result<String, ResolveError>;

    async fn evaluate(&self, expression: &str, scope: &dyn VariableScope, cancel: &CancellationToken) -> Result<bool, ResolveError>;
}

/// Severity attached to run log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(label)
    }
}

/// Sink for user-facing run log lines.
pub trait RunLogger: Send + Sync {
    fn log(&self, level: LogLevel, command: Option<CommandId>, message: &str);
}

/// How a cancellable sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

/// Cancellable delay primitive.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome;
}

pub struct ExecutionContext {
    scope: Box<dyn VariableScope>,
    resolver: Arc<dyn ValueResolver>,
    logger: Arc<dyn RunLogger>,
    delay: Arc<dyn Delay>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        scope: Box<dyn VariableScope>,
        resolver: Arc<dyn ValueResolver>,
        logger: Arc<dyn RunLogger>,
        delay: Arc<dyn Delay>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            scope,
            resolver,
            logger,
            delay,
            cancellation,
        }
    }

    pub fn scope(&self) -> &dyn VariableScope {
        self.scope.as_ref()
    }

    pub fn scope_mut(&mut self) -> &mut dyn VariableScope {
        self.scope.as_mut()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves a value source against the current scope.
    pub async fn resolve(&self, source: &ValueSource) -> Result<String, ResolveError> {
        self.resolver.resolve(source, self.scope.as_ref(), &self.cancellation).await
    }

    /// Evaluates a condition expression against the current scope.
    pub async fn evaluate(&self, expression: &str) -> Result<bool, ResolveError> {
        self.resolver.evaluate(expression, self.scope.as_ref(), &self.cancellation).await
    }

    /// Sleeps for `duration` unless the run is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> SleepOutcome {
        self.delay.sleep(duration, &self.cancellation).await
    }

    pub fn log(&self, level: LogLevel, command: Option<CommandId>, message: &str) {
        self.logger.log(level, command, message);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("variables", &self.scope.names())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}
