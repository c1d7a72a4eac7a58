//! Debug sessions: a run that streams lifecycle events and responds to
//! pause, resume and cancel controls.
//!
//! The caller owns the event receiver and the control sender. Pausing takes
//! effect before the next command starts; breakpoints pause before or after
//! the command that carries them. Cancel interrupts a pause as well as any
//! command that is waiting.

use std::sync::Arc;

use async_trait::async_trait;
use stepflow_registry::ExecutionContext;
use stepflow_types::{CommandId, ControlFlow, PauseReason, RunControl, RunEvent, RunOutcome};
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    watch,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::{Program, RunOptions, Runner, StepInfo, StepInterceptor};

/// Runs `program` while applying controls from `control_rx`.
///
/// Queued controls are applied before the run advances, so a `Pause` sent
/// before the session starts holds at the first command.
/// Returns when the run completes. Dropping the control sender does not end
/// the run; it only means no further controls arrive.
pub async fn drive_session(
    program: &Program,
    context: &mut ExecutionContext,
    mut control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
    options: RunOptions,
) -> RunOutcome {
    let (pause_tx, _) = watch::channel(false);
    let pause_tx = Arc::new(pause_tx);
    let cancel = context.cancellation().clone();

    let interceptor = SessionInterceptor {
        paused: Arc::clone(&pause_tx),
        events: event_tx.clone(),
    };
    let runner = Runner::new()
        .with_events(event_tx)
        .with_interceptor(Arc::new(interceptor))
        .with_options(options);

    let run = runner.run(program, context);
    tokio::pin!(run);
    let mut controls_open = true;

    loop {
        tokio::select! {
            biased;
            control = control_rx.recv(), if controls_open => match control {
                Some(RunControl::Pause) => {
                    debug!("pause requested");
                    pause_tx.send_replace(true);
                }
                Some(RunControl::Resume) => {
                    debug!("resume requested");
                    pause_tx.send_replace(false);
                }
                Some(RunControl::Cancel) => {
                    debug!("cancel requested");
                    cancel.cancel();
                    pause_tx.send_replace(false);
                }
                None => controls_open = false,
            },
            outcome = &mut run => return outcome,
        }
    }
}

struct SessionInterceptor {
    paused: Arc<watch::Sender<bool>>,
    events: UnboundedSender<RunEvent>,
}

impl SessionInterceptor {
    /// Blocks until the session is resumed or cancelled.
    async fn hold(&self, id: CommandId, reason: PauseReason, cancel: &CancellationToken) {
        self.paused.send_replace(true);
        let _ = self.events.send(RunEvent::Paused { id, reason });

        let mut paused = self.paused.subscribe();
        loop {
            let still_paused = *paused.borrow_and_update();
            if !still_paused {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        if !cancel.is_cancelled() {
            let _ = self.events.send(RunEvent::Resumed { id });
        }
    }
}

#[async_trait]
impl StepInterceptor for SessionInterceptor {
    async fn before(&self, step: &StepInfo<'_>, cancel: &CancellationToken) {
        let requested = *self.paused.borrow();
        let reason = if step.breakpoints.before {
            Some(PauseReason::BreakpointBefore)
        } else if requested {
            Some(PauseReason::Requested)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.hold(step.id, reason, cancel).await;
        }
    }

    async fn after(&self, step: &StepInfo<'_>, _flow: ControlFlow, cancel: &CancellationToken) {
        if step.breakpoints.after {
            self.hold(step.id, PauseReason::BreakpointAfter, cancel).await;
        }
    }
}
