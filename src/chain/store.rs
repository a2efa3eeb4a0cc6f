//! Block persistence with reorg detection and reconciliation.
//!
//! `ChainStore` is the single writer of canonical/orphan state. The
//! detect-and-retry sequence around a conflicting insert is an explicit
//! bounded loop: exceeding the bound means the ingestion assumptions are
//! contradicted (non-monotonic node, corrupted store) and is fatal.

use crate::chain::version::RollupVersionCache;
use crate::ledger::store::{BlockInsert, LedgerStore, ReplaceOutcome};
use crate::runtime::telemetry::Telemetry;
use crate::types::{now_ms, Block, ChainInfo};
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug)]
pub enum ChainError {
    /// The bounded insert-reconcile-retry loop could not converge.
    ReorgRetriesExhausted { height: u64, attempts: usize },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::ReorgRetriesExhausted { height, attempts } => write!(
                f,
                "reorg reconciliation for height {height} did not converge after {attempts} attempts"
            ),
        }
    }
}

impl std::error::Error for ChainError {}

/// Outcome of [`ChainStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredBlock {
    Inserted,
    /// Idempotent re-store of a block that is already canonical.
    AlreadyCanonical,
    /// A same-height fork: the stale branch was orphaned and the incoming
    /// block is now canonical.
    Reorged { orphaned: Vec<Block> },
    /// The fork sits below the incoming height. The stale branch was
    /// orphaned; the caller rewinds and refetches from `resume_height`.
    Rewound {
        orphaned: Vec<Block>,
        resume_height: u64,
    },
}

pub struct ChainStore {
    ledger: Arc<dyn LedgerStore>,
    versions: RollupVersionCache,
    telemetry: Arc<Telemetry>,
    max_reorg_retries: usize,
}

impl ChainStore {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        telemetry: Arc<Telemetry>,
        max_reorg_retries: usize,
    ) -> Self {
        let versions = RollupVersionCache::new(ledger.clone());
        Self {
            ledger,
            versions,
            telemetry,
            max_reorg_retries: max_reorg_retries.max(1),
        }
    }

    /// Stores a block, reconciling the canonical chain when the block
    /// contradicts it. Orphan marking plus new-block insert happen inside one
    /// transactional ledger call, so concurrent readers never observe two
    /// canonical blocks at a height or a canonical gap.
    pub async fn store(&self, block: Block) -> Result<StoredBlock> {
        let height = block.height;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let existing = match self.ledger.store_block(block.clone()).await? {
                BlockInsert::Inserted => {
                    self.versions.observe(block.protocol_version);
                    tracing::debug!(height, hash = %block.hash, "block stored as canonical");
                    return Ok(StoredBlock::Inserted);
                }
                BlockInsert::AlreadyCanonical => {
                    tracing::debug!(height, hash = %block.hash, "block already canonical; no-op");
                    return Ok(StoredBlock::AlreadyCanonical);
                }
                BlockInsert::Conflict { existing } => existing,
            };

            if attempt > self.max_reorg_retries {
                return Err(ChainError::ReorgRetriesExhausted { height, attempts: attempt }.into());
            }

            tracing::warn!(
                height,
                incoming = %block.hash,
                conflicting = %existing.hash,
                fork_height = existing.height,
                attempt,
                "canonical conflict detected; orphaning stale branch"
            );

            match self
                .ledger
                .orphan_and_replace(block.clone(), existing.hash, now_ms())
                .await?
            {
                ReplaceOutcome::Replaced { orphaned } => {
                    self.telemetry.record_reorg();
                    self.versions.observe(block.protocol_version);
                    tracing::info!(
                        height,
                        hash = %block.hash,
                        orphaned = orphaned.len(),
                        "reorg reconciled; incoming block is canonical"
                    );
                    return Ok(StoredBlock::Reorged { orphaned });
                }
                ReplaceOutcome::Rewound {
                    orphaned,
                    resume_height,
                } => {
                    self.telemetry.record_reorg();
                    tracing::info!(
                        height,
                        resume_height,
                        orphaned = orphaned.len(),
                        "stale branch orphaned below incoming height; rewinding"
                    );
                    return Ok(StoredBlock::Rewound {
                        orphaned,
                        resume_height,
                    });
                }
                ReplaceOutcome::Raced => {
                    tracing::warn!(height, attempt, "reorg reconciliation raced; retrying insert");
                }
            }
        }
    }

    /// Height of the canonical tip, if any block has been stored.
    pub async fn latest_height(&self) -> Result<Option<u64>> {
        Ok(self.latest_block().await?.map(|block| block.height))
    }

    /// The canonical tip block. Canonical lookups always filter to
    /// non-orphaned rows; ties cannot occur given the uniqueness invariant.
    pub async fn latest_block(&self) -> Result<Option<Block>> {
        self.ledger.latest_canonical_block().await
    }

    /// The `limit` most recent canonical blocks, height descending. Used by
    /// the dropped-tx sweep's lookback window.
    pub async fn recent_canonical_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        self.ledger.canonical_blocks_desc(limit).await
    }

    /// Upserts network chain info and ratchets the version cache.
    pub async fn update_chain_info(&self, info: ChainInfo) -> Result<()> {
        self.versions.observe(info.rollup_version);
        self.ledger.upsert_chain_info(info).await
    }

    /// Absence is a valid cold-start state, not an error.
    pub async fn chain_info(&self, network_id: &str) -> Result<Option<ChainInfo>> {
        self.ledger.chain_info(network_id.to_owned()).await
    }

    /// Highest observed rollup version, ledger-seeded on cold start.
    pub async fn rollup_version(&self) -> Result<Option<u64>> {
        self.versions.get().await
    }
}
