//! Catch-up block polling.
//!
//! Each tick asks the next pooled node for the chain tip, folds the pending
//! pool into the lifecycle tracker, then fetches at most one bounded batch of
//! blocks in ascending height order. Transient RPC failures end the tick
//! early and the next tick retries against the next node; only a
//! non-converging reorg reconciliation is fatal.

use crate::chain::store::{ChainError, ChainStore, StoredBlock};
use crate::events::{ChainEvent, EventSink};
use crate::lifecycle::TxLifecycleTracker;
use crate::rpc::pool::NodePool;
use crate::runtime::config::IngestConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::progress::ProcessedHeight;
use crate::runtime::scheduler::Periodic;
use crate::runtime::telemetry::Telemetry;
use crate::types::now_ms;
use anyhow::Result;
use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a single poll tick accomplished. Returned so callers driving the
/// poller manually (catch-up, tests) can tell whether to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickProgress {
    /// The batch advanced the processed height.
    Advanced,
    /// Nothing new: at the tip, or the tick bailed on a transient error.
    Idle,
}

struct PollerCore {
    pool: Arc<NodePool>,
    chain: Arc<ChainStore>,
    tracker: Arc<TxLifecycleTracker>,
    sink: Arc<dyn EventSink>,
    telemetry: Arc<Telemetry>,
    fatal: FatalErrorHandler,
    processed: ProcessedHeight,
    max_batch_size: u64,
}

impl PollerCore {
    async fn publish(&self, event: ChainEvent) -> Result<()> {
        self.sink.publish(event).await?;
        self.telemetry.record_event_published();
        Ok(())
    }

    async fn observe_pending_pool(&self, node: &Arc<dyn crate::rpc::client::RollupNode>) {
        let batch = match node.pending_transactions().await {
            Ok(batch) => batch,
            Err(err) => {
                self.telemetry.record_rpc_error();
                tracing::warn!(node = node.name(), error = %err, "pending pool fetch failed");
                return;
            }
        };

        match self.tracker.observe_pending(batch, now_ms()).await {
            Ok(entered) if !entered.is_empty() => {
                if let Err(err) = self.publish(ChainEvent::PendingTxs { txs: entered }).await {
                    tracing::warn!(error = %err, "failed to publish pending-tx event");
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "pending pool observation failed");
            }
        }
    }

    /// Runs one poll cycle: tip query, pending-pool observation, one bounded
    /// batch of block fetches.
    async fn tick_once(&self) -> Result<TickProgress> {
        let node = self.pool.next();

        let tip = match node.chain_height().await {
            Ok(tip) => tip,
            Err(err) => {
                self.telemetry.record_rpc_error();
                tracing::warn!(node = node.name(), error = %err, "chain height query failed");
                return Ok(TickProgress::Idle);
            }
        };

        self.observe_pending_pool(&node).await;

        let first = self.processed.next_height();
        if first > tip {
            return Ok(TickProgress::Idle);
        }
        let batch_end = min(tip, first.saturating_add(self.max_batch_size - 1));

        let mut progress = TickProgress::Idle;
        for height in first..=batch_end {
            let block = match node.block_at(height).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    // The node's tip claim outpaced its block availability.
                    tracing::debug!(node = node.name(), height, "block not yet available");
                    break;
                }
                Err(err) => {
                    self.telemetry.record_rpc_error();
                    tracing::warn!(node = node.name(), height, error = %err, "block fetch failed");
                    break;
                }
            };

            match self.chain.store(block.clone()).await {
                Ok(StoredBlock::Inserted) => {
                    self.telemetry.record_block_ingested();
                }
                Ok(StoredBlock::AlreadyCanonical) => {}
                Ok(StoredBlock::Reorged { orphaned }) => {
                    self.telemetry.record_block_ingested();
                    self.handle_orphaned(&orphaned).await?;
                }
                Ok(StoredBlock::Rewound {
                    orphaned,
                    resume_height,
                }) => {
                    self.handle_orphaned(&orphaned).await?;
                    self.processed.reset(resume_height);
                    tracing::info!(resume_height, "rewinding poll cursor after deep reorg");
                    return Ok(TickProgress::Advanced);
                }
                Err(err) => {
                    if err.downcast_ref::<ChainError>().is_some() {
                        return Err(self.fatal.trigger("block poller", err));
                    }
                    tracing::warn!(height, error = %err, "block store failed; retrying next tick");
                    break;
                }
            }

            self.tracker.reconcile_block(&block).await?;
            self.publish(ChainEvent::BlockDiscovered {
                height,
                block_payload: serde_json::to_value(&block)?,
            })
            .await?;
            self.processed.mark(height);
            progress = TickProgress::Advanced;
        }

        Ok(progress)
    }

    async fn handle_orphaned(&self, orphaned: &[crate::types::Block]) -> Result<()> {
        let events = self.tracker.on_effects_orphaned(orphaned, now_ms()).await?;
        if !events.is_empty() {
            self.publish(ChainEvent::DroppedTxs { txs: events }).await?;
        }
        Ok(())
    }

    /// Drains batches until the poller is caught up with the current tip.
    async fn catch_up(&self) -> Result<()> {
        loop {
            match self.tick_once().await? {
                TickProgress::Advanced => continue,
                TickProgress::Idle => return Ok(()),
            }
        }
    }
}

/// Owns the periodic polling task and the poll cursor.
pub struct BlockPoller {
    core: Arc<PollerCore>,
    poll_interval: Duration,
    genesis_catchup: bool,
    ignore_processed_height: Option<u64>,
    start_height: u64,
    shutdown: CancellationToken,
    task: Option<Periodic>,
}

impl BlockPoller {
    pub fn new(
        config: &IngestConfig,
        pool: Arc<NodePool>,
        chain: Arc<ChainStore>,
        tracker: Arc<TxLifecycleTracker>,
        sink: Arc<dyn EventSink>,
        telemetry: Arc<Telemetry>,
        fatal: FatalErrorHandler,
        shutdown: CancellationToken,
    ) -> Self {
        let core = Arc::new(PollerCore {
            pool,
            chain,
            tracker,
            sink,
            telemetry,
            fatal,
            processed: ProcessedHeight::starting_at(config.start_height()),
            max_batch_size: config.max_batch_size(),
        });
        Self {
            core,
            poll_interval: config.poll_interval(),
            genesis_catchup: config.genesis_catchup(),
            ignore_processed_height: config.ignore_processed_height(),
            start_height: config.start_height(),
            shutdown,
            task: None,
        }
    }

    /// Positions the poll cursor and starts the periodic task. The operator
    /// override wins over persisted progress; otherwise polling resumes right
    /// after the stored canonical tip.
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        if let Some(height) = self.ignore_processed_height {
            tracing::info!(height, "ignoring processed height; reprocessing from override");
            self.core.processed.reset(height);
        } else if let Some(tip) = self.core.chain.latest_height().await? {
            // Resume AT the stored tip, not after it: a block stored right
            // before a shutdown may never have had its discovery published,
            // so the tip is re-announced for at-least-once delivery.
            self.core.processed.reset(tip);
        } else {
            self.core.processed.reset(self.start_height);
        }

        if self.genesis_catchup {
            tracing::info!(
                from = self.core.processed.next_height(),
                "running catch-up before periodic polling"
            );
            self.core.catch_up().await?;
        }

        let core = Arc::clone(&self.core);
        self.task = Some(Periodic::spawn(
            "block-poller",
            self.poll_interval,
            &self.shutdown,
            move || {
                let core = Arc::clone(&core);
                Box::pin(async move { core.tick_once().await.map(|_| ()) })
            },
        ));

        tracing::info!(
            interval = ?self.poll_interval,
            next_height = self.core.processed.next_height(),
            nodes = self.core.pool.len(),
            "block poller started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
            tracing::info!("block poller stopped");
        }
    }

    /// Runs a single poll cycle outside the periodic task. Used by tests and
    /// one-shot tooling.
    pub async fn poll_once(&self) -> Result<()> {
        self.core.tick_once().await.map(|_| ())
    }

    /// Height of the last processed block, if any.
    pub fn processed_height(&self) -> Option<u64> {
        self.core.processed.current()
    }
}
