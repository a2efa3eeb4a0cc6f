//! Periodic task scheduling shared by the poller and the stale-tx sweeper.

use anyhow::Result;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to a serially-ticking background task.
///
/// Exactly one tick runs at a time. When a tick outlasts the interval, the
/// missed fire is skipped rather than queued, so a slow catch-up pass never
/// causes a burst of back-to-back ticks afterwards.
pub struct Periodic {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Periodic {
    /// Spawns the loop as a child of `parent`, so cancelling the parent token
    /// stops the task, while [`Periodic::stop`] leaves the parent intact.
    pub fn spawn<F>(
        name: &'static str,
        tick_interval: Duration,
        parent: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let token = parent.child_token();
        let run_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = run_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = tick().await {
                            tracing::warn!(task = name, error = %err, "periodic tick failed");
                        }
                        if run_token.is_cancelled() {
                            break;
                        }
                    }
                }
            }

            tracing::info!(task = name, "periodic task stopped");
        });

        Self { token, handle }
    }

    /// Cancels the task and waits for the in-flight tick (if any) to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "periodic task join failed");
        }
    }
}
