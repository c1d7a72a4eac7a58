//! Control-flow runner.
//!
//! A sequence runs its commands in order and ends at the first signal other
//! than `Next`, which it hands to its owner: the composite command whose block
//! it is, or the run itself for the root sequence. Composite commands decide
//! what a signal means for them (a loop consumes `Break` and `Continue`, a
//! conditional passes everything through). Disabled commands are skipped
//! without any notification.
//!
//! Every executed command produces exactly one `CommandStarting` and one
//! `CommandFinished` event, in program order. Command errors become
//! `ControlFlow::Error` and the first one is kept as the run's failure.
//! Cancellation is observed between commands and inside any command that
//! waits; once observed, the run ends with `Stop` and `cancelled` set.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::BoxFuture;
use stepflow_registry::{BlockRunner, ExecutionContext, Invocation};
use stepflow_types::{BreakpointFlags, CommandFailure, CommandId, ControlFlow, RunEvent, RunOutcome};
use tokio::{sync::mpsc::UnboundedSender, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::prepare::{Program, ProgramNode};

/// Failure message for a command that returned `ControlFlow::Error` without an error value.
pub const SIGNALLED_ERROR: &str = "command reported an error";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Route commands that offer a simulation through it instead of `execute`.
    pub dry_run: bool,
}

/// The command about to run or that just ran.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo<'a> {
    pub id: CommandId,
    pub kind: &'a str,
    pub breakpoints: BreakpointFlags,
}

/// Hooks around every executed command. Used by debug sessions to pause.
#[async_trait]
pub trait StepInterceptor: Send + Sync {
    async fn before(&self, step: &StepInfo<'_>, cancel: &CancellationToken);

    async fn after(&self, step: &StepInfo<'_>, flow: ControlFlow, cancel: &CancellationToken);
}

#[derive(Default, Clone)]
pub struct Runner {
    events: Option<UnboundedSender<RunEvent>>,
    interceptor: Option<Arc<dyn StepInterceptor>>,
    options: RunOptions,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn StepInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs the program's root sequence to completion.
    pub async fn run(&self, program: &Program, context: &mut ExecutionContext) -> RunOutcome {
        info!(commands = program.len(), dry_run = self.options.dry_run, "run started");
        self.emit(RunEvent::RunStarted { at: Utc::now() });

        let state = RunState {
            runner: self,
            program,
            failure: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        };
        let flow = state.run_sequence(program.root(), context).await;

        let cancelled = state.cancelled.load(Ordering::SeqCst);
        let failure = state.failure.into_inner().ok().flatten();
        let outcome = RunOutcome {
            flow: if cancelled { ControlFlow::Stop } else { flow },
            cancelled,
            failure,
        };
        info!(flow = %outcome.flow, cancelled, failed = outcome.failure.is_some(), "run completed");
        self.emit(RunEvent::RunCompleted {
            outcome: outcome.clone(),
            finished_at: Utc::now(),
        });
        outcome
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("events", &self.events.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .field("options", &self.options)
            .finish()
    }
}

struct RunState<'r> {
    runner: &'r Runner,
    program: &'r Program,
    failure: Mutex<Option<CommandFailure>>,
    cancelled: AtomicBool,
}

impl RunState<'_> {
    fn run_sequence<'s>(&'s self, sequence: &'s [usize], context: &'s mut ExecutionContext) -> BoxFuture<'s, ControlFlow> {
        Box::pin(async move {
            for &index in sequence {
                let flow = self.run_node(self.program.node(index), context).await;
                if !flow.is_next() {
                    return flow;
                }
            }
            ControlFlow::Next
        })
    }

    async fn run_node(&self, node: &ProgramNode, context: &mut ExecutionContext) -> ControlFlow {
        if context.is_cancelled() {
            return self.observe_cancellation(node.id());
        }
        let Some(command) = node.command() else {
            return ControlFlow::Next;
        };

        let step = StepInfo {
            id: node.id(),
            kind: node.kind(),
            breakpoints: node.breakpoints(),
        };
        if let Some(interceptor) = &self.runner.interceptor {
            interceptor.before(&step, context.cancellation()).await;
            if context.is_cancelled() {
                return self.observe_cancellation(node.id());
            }
        }

        debug!(command_id = %node.id(), kind = node.kind(), "command starting");
        self.runner.emit(RunEvent::CommandStarting {
            id: node.id(),
            kind: node.kind().to_string(),
        });
        let started_at = Instant::now();

        let blocks = NodeBlocks { state: self, node };
        let result = {
            let mut invocation = Invocation::new(node.id(), node.kind(), context, &blocks);
            match command.dry_run().filter(|_| self.runner.options.dry_run) {
                Some(simulation) => simulation.simulate(&mut invocation).await,
                None => command.execute(&mut invocation).await,
            }
        };

        let (flow, message) = match result {
            Ok(ControlFlow::Error) => {
                let message = SIGNALLED_ERROR.to_string();
                let recorded = self.record_failure(node, message.clone());
                (ControlFlow::Error, recorded.then_some(message))
            }
            Ok(ControlFlow::Stop) if context.is_cancelled() => {
                self.cancelled.store(true, Ordering::SeqCst);
                (ControlFlow::Stop, None)
            }
            Ok(flow) => (flow, None),
            Err(error) if context.is_cancelled() => {
                debug!(command_id = %node.id(), error = %error, "command interrupted by cancellation");
                self.cancelled.store(true, Ordering::SeqCst);
                (ControlFlow::Stop, Some(error.to_string()))
            }
            Err(error) => {
                let message = error.to_string();
                warn!(command_id = %node.id(), kind = node.kind(), error = %message, "command failed");
                self.record_failure(node, message.clone());
                (ControlFlow::Error, Some(message))
            }
        };

        let duration_ms = started_at.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        debug!(command_id = %node.id(), flow = %flow, duration_ms, "command finished");
        self.runner.emit(RunEvent::CommandFinished {
            id: node.id(),
            kind: node.kind().to_string(),
            flow,
            message,
            duration_ms,
        });

        if let Some(interceptor) = &self.runner.interceptor {
            interceptor.after(&step, flow, context.cancellation()).await;
            if flow.is_next() && context.is_cancelled() {
                return self.observe_cancellation(node.id());
            }
        }
        flow
    }

    fn observe_cancellation(&self, id: CommandId) -> ControlFlow {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!(command_id = %id, "run cancelled");
        }
        ControlFlow::Stop
    }

    /// Keeps only the first failure; composite commands propagating a child's
    /// `Error` do not replace it. Returns whether `message` was recorded.
    fn record_failure(&self, node: &ProgramNode, message: String) -> bool {
        let Ok(mut failure) = self.failure.lock() else {
            return false;
        };
        if failure.is_some() {
            return false;
        }
        *failure = Some(CommandFailure {
            id: node.id(),
            kind: node.kind().to_string(),
            message,
        });
        true
    }
}

/// Block access for the command currently running.
struct NodeBlocks<'a, 'r> {
    state: &'a RunState<'r>,
    node: &'a ProgramNode,
}

impl BlockRunner for NodeBlocks<'_, '_> {
    fn run_block<'b>(&'b self, name: &'b str, context: &'b mut ExecutionContext) -> BoxFuture<'b, ControlFlow> {
        match self.node.block(name) {
            Some(children) => self.state.run_sequence(children, context),
            None => Box::pin(async { ControlFlow::Next }),
        }
    }
}
