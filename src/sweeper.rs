//! Periodic staleness sweep over pending/proposed transactions.

use crate::chain::store::ChainStore;
use crate::events::{ChainEvent, EventSink};
use crate::lifecycle::TxLifecycleTracker;
use crate::runtime::config::IngestConfig;
use crate::runtime::scheduler::Periodic;
use crate::runtime::telemetry::Telemetry;
use crate::types::now_ms;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct SweeperCore {
    chain: Arc<ChainStore>,
    tracker: Arc<TxLifecycleTracker>,
    sink: Arc<dyn EventSink>,
    telemetry: Arc<Telemetry>,
    age_threshold_ms: u64,
    lookback_blocks: usize,
}

impl SweeperCore {
    /// One sweep pass. The lookback window guards against dropping a tx whose
    /// inclusion the tracker has not caught up with yet.
    async fn sweep_at(&self, now_ms: u64) -> Result<()> {
        let recent = self
            .chain
            .recent_canonical_blocks(self.lookback_blocks)
            .await?;

        let dropped = self
            .tracker
            .drop_stale(now_ms, self.age_threshold_ms, &recent)
            .await?;
        if dropped.is_empty() {
            return Ok(());
        }

        tracing::info!(count = dropped.len(), "stale transactions dropped");
        self.sink
            .publish(ChainEvent::DroppedTxs { txs: dropped })
            .await?;
        self.telemetry.record_event_published();
        Ok(())
    }
}

/// Owns the periodic sweep task. Sweep failures are logged and retried on
/// the next tick; they never shut the engine down.
pub struct DroppedTxDetector {
    core: Arc<SweeperCore>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
    task: Option<Periodic>,
}

impl DroppedTxDetector {
    pub fn new(
        config: &IngestConfig,
        chain: Arc<ChainStore>,
        tracker: Arc<TxLifecycleTracker>,
        sink: Arc<dyn EventSink>,
        telemetry: Arc<Telemetry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            core: Arc::new(SweeperCore {
                chain,
                tracker,
                sink,
                telemetry,
                age_threshold_ms: config.dropped_tx_age_threshold_ms(),
                lookback_blocks: config.dropped_tx_lookback_blocks(),
            }),
            sweep_interval: config.sweep_interval(),
            shutdown,
            task: None,
        }
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let core = Arc::clone(&self.core);
        self.task = Some(Periodic::spawn(
            "dropped-tx-sweeper",
            self.sweep_interval,
            &self.shutdown,
            move || {
                let core = Arc::clone(&core);
                Box::pin(async move { core.sweep_at(now_ms()).await })
            },
        ));

        tracing::info!(
            interval = ?self.sweep_interval,
            age_threshold_ms = self.core.age_threshold_ms,
            lookback_blocks = self.core.lookback_blocks,
            "dropped-tx sweeper started"
        );
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
            tracing::info!("dropped-tx sweeper stopped");
        }
    }

    /// Runs a single sweep at the given clock reading, outside the periodic
    /// task.
    pub async fn sweep_once_at(&self, now_ms: u64) -> Result<()> {
        self.core.sweep_at(now_ms).await
    }
}
