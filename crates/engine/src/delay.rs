use std::time::Duration;

use async_trait::async_trait;
use stepflow_registry::{Delay, SleepOutcome};
use tokio_util::sync::CancellationToken;

/// Delay backed by the tokio timer. Cancellation wins over an elapsed timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => SleepOutcome::Cancelled,
            _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
        }
    }
}
