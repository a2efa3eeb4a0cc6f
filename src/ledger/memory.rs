//! In-memory `LedgerStore`. One mutex acquisition per trait call is the
//! transaction boundary: readers never observe a half-applied mutation.

use crate::ledger::store::{BlockInsert, CasOutcome, LedgerStore, ReplaceOutcome};
use crate::types::{
    Block, BlockHash, ChainInfo, DroppedTx, OrphanInfo, TrackedTx, TxHash, TxState,
};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct LedgerInner {
    blocks: HashMap<BlockHash, Block>,
    // Hashes per height, canonical or orphaned. Among non-orphaned entries,
    // height is unique.
    by_height: BTreeMap<u64, Vec<BlockHash>>,
    txs: HashMap<TxHash, TrackedTx>,
    dropped: HashMap<TxHash, DroppedTx>,
    chain_infos: HashMap<String, ChainInfo>,
}

impl LedgerInner {
    fn canonical_at(&self, height: u64) -> Option<&Block> {
        self.by_height.get(&height).and_then(|hashes| {
            hashes
                .iter()
                .filter_map(|hash| self.blocks.get(hash))
                .find(|block| block.is_canonical())
        })
    }

    fn canonical_tip_height(&self) -> Option<u64> {
        self.by_height
            .iter()
            .rev()
            .find_map(|(height, _)| self.canonical_at(*height).map(|_| *height))
    }

    fn insert_canonical(&mut self, mut block: Block) {
        block.orphan = None;
        self.by_height
            .entry(block.height)
            .or_default()
            .push(block.hash.clone());
        self.blocks.insert(block.hash.clone(), block);
    }

    fn classify_insert(&self, block: &Block) -> BlockInsert {
        if let Some(existing) = self.canonical_at(block.height) {
            if existing.hash == block.hash {
                return BlockInsert::AlreadyCanonical;
            }
            // A conflicting sibling. If the incoming block links to the
            // canonical parent the fork is exactly this height; otherwise the
            // fork is deeper and the conflict is reported against the parent.
            if block.height > 0 {
                if let Some(parent) = self.canonical_at(block.height - 1) {
                    if parent.hash != block.parent_hash {
                        return BlockInsert::Conflict {
                            existing: parent.clone(),
                        };
                    }
                }
            }
            return BlockInsert::Conflict {
                existing: existing.clone(),
            };
        }

        if block.height > 0 {
            if let Some(parent) = self.canonical_at(block.height - 1) {
                if parent.hash != block.parent_hash {
                    return BlockInsert::Conflict {
                        existing: parent.clone(),
                    };
                }
            }
        }

        BlockInsert::Inserted
    }

    /// Orphans every canonical block at `fork_height` and above. Returns the
    /// orphaned blocks in ascending height order. Given the uniqueness
    /// invariant these are exactly the parent-linked descendants of the block
    /// at the fork height.
    fn orphan_from(&mut self, fork_height: u64, now_ms: u64) -> Vec<Block> {
        let stale: Vec<BlockHash> = self
            .by_height
            .range(fork_height..)
            .flat_map(|(_, hashes)| hashes.iter().cloned())
            .filter(|hash| {
                self.blocks
                    .get(hash)
                    .map(Block::is_canonical)
                    .unwrap_or(false)
            })
            .collect();

        let mut orphaned = Vec::with_capacity(stale.len());
        for hash in stale {
            if let Some(block) = self.blocks.get_mut(&hash) {
                block.orphan = Some(OrphanInfo {
                    timestamp_ms: now_ms,
                    has_orphaned_parent: block.height > fork_height,
                });
                orphaned.push(block.clone());
            }
        }
        orphaned.sort_by_key(|block| block.height);
        orphaned
    }
}

/// Mutex-protected in-memory ledger, the reference store implementation.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored blocks, canonical and orphaned.
    pub async fn block_count(&self) -> usize {
        self.inner.lock().await.blocks.len()
    }

    pub async fn block_by_hash(&self, hash: &BlockHash) -> Option<Block> {
        self.inner.lock().await.blocks.get(hash).cloned()
    }
}

impl LedgerStore for MemoryLedger {
    fn store_block(&self, block: Block) -> BoxFuture<'_, Result<BlockInsert>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;

            // A block beyond tip + 1 would leave canonical heights with no
            // row, so a later reader could never walk the chain contiguously.
            if let Some(tip) = inner.canonical_tip_height() {
                if block.height > tip.saturating_add(1) {
                    bail!(
                        "refusing block {} at height {}: it would leave a canonical gap above tip {tip}",
                        block.hash,
                        block.height
                    );
                }
            }

            let outcome = inner.classify_insert(&block);
            if matches!(outcome, BlockInsert::Inserted) {
                inner.insert_canonical(block);
            }
            Ok(outcome)
        })
    }

    fn orphan_and_replace(
        &self,
        block: Block,
        expected_existing: BlockHash,
        now_ms: u64,
    ) -> BoxFuture<'_, Result<ReplaceOutcome>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;

            let fork_height = match inner.blocks.get(&expected_existing) {
                Some(existing) if existing.is_canonical() => existing.height,
                // The conflict this call was issued for is gone; the caller
                // re-runs detection.
                _ => return Ok(ReplaceOutcome::Raced),
            };

            let orphaned = inner.orphan_from(fork_height, now_ms);

            if fork_height == block.height {
                inner.insert_canonical(block);
                Ok(ReplaceOutcome::Replaced { orphaned })
            } else {
                Ok(ReplaceOutcome::Rewound {
                    orphaned,
                    resume_height: fork_height,
                })
            }
        })
    }

    fn latest_canonical_block(&self) -> BoxFuture<'_, Result<Option<Block>>> {
        Box::pin(async {
            let inner = self.inner.lock().await;
            let latest = inner
                .by_height
                .iter()
                .rev()
                .find_map(|(height, _)| inner.canonical_at(*height).cloned());
            Ok(latest)
        })
    }

    fn canonical_blocks_desc(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Block>>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let blocks = inner
                .by_height
                .iter()
                .rev()
                .filter_map(|(height, _)| inner.canonical_at(*height).cloned())
                .take(limit)
                .collect();
            Ok(blocks)
        })
    }

    fn upsert_transaction(&self, tx: TrackedTx) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.lock().await.txs.insert(tx.tx_hash.clone(), tx);
            Ok(())
        })
    }

    fn update_tx_state(
        &self,
        tx_hash: TxHash,
        expected: Vec<TxState>,
        new: TxState,
    ) -> BoxFuture<'_, Result<CasOutcome>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let Some(tx) = inner.txs.get_mut(&tx_hash) else {
                return Ok(CasOutcome::Missing);
            };

            if expected.contains(&tx.state) {
                let previous = tx.state;
                tx.state = new;
                Ok(CasOutcome::Updated { previous })
            } else {
                Ok(CasOutcome::Skipped { actual: tx.state })
            }
        })
    }

    fn transactions_by_state(&self, states: Vec<TxState>) -> BoxFuture<'_, Result<Vec<TrackedTx>>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let mut txs: Vec<TrackedTx> = inner
                .txs
                .values()
                .filter(|tx| states.contains(&tx.state))
                .cloned()
                .collect();
            txs.sort_by_key(|tx| (tx.birth_timestamp_ms, tx.tx_hash.clone()));
            Ok(txs)
        })
    }

    fn transaction_by_hash(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<TrackedTx>>> {
        Box::pin(async move { Ok(self.inner.lock().await.txs.get(&tx_hash).cloned()) })
    }

    fn remove_transaction(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<TrackedTx>>> {
        Box::pin(async move { Ok(self.inner.lock().await.txs.remove(&tx_hash)) })
    }

    fn upsert_dropped_tx(&self, dropped: DroppedTx) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .dropped
                .insert(dropped.tx_hash.clone(), dropped);
            Ok(())
        })
    }

    fn dropped_tx_by_hash(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<DroppedTx>>> {
        Box::pin(async move { Ok(self.inner.lock().await.dropped.get(&tx_hash).cloned()) })
    }

    fn remove_dropped_tx(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<DroppedTx>>> {
        Box::pin(async move { Ok(self.inner.lock().await.dropped.remove(&tx_hash)) })
    }

    fn highest_stored_rollup_version(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async {
            let inner = self.inner.lock().await;
            let from_blocks = inner
                .blocks
                .values()
                .filter(|block| block.is_canonical())
                .map(|block| block.protocol_version)
                .max();
            let from_info = inner
                .chain_infos
                .values()
                .map(|info| info.rollup_version)
                .max();
            Ok(from_blocks.max(from_info))
        })
    }

    fn upsert_chain_info(&self, info: ChainInfo) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .chain_infos
                .insert(info.network_id.clone(), info);
            Ok(())
        })
    }

    fn chain_info(&self, network_id: String) -> BoxFuture<'_, Result<Option<ChainInfo>>> {
        Box::pin(async move { Ok(self.inner.lock().await.chain_infos.get(&network_id).cloned()) })
    }
}
