//! The `LedgerStore` trait consumed by the chain store and the lifecycle
//! tracker.

use crate::types::{Block, BlockHash, ChainInfo, DroppedTx, TrackedTx, TxHash, TxState};
use anyhow::Result;
use futures::future::BoxFuture;

/// Outcome of a block insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockInsert {
    /// The block was inserted as canonical at its height.
    Inserted,
    /// A canonical block with the same hash already sits at this height.
    /// Re-storing it is a no-op.
    AlreadyCanonical,
    /// The incoming block contradicts the stored canonical chain. `existing`
    /// is the canonical block the incoming one conflicts with: either a
    /// different hash at the same height, or the canonical parent the
    /// incoming block does not link to.
    Conflict { existing: Block },
}

/// Outcome of the transactional orphan-and-insert reconciliation.
///
/// Orphaned blocks are returned in ascending height order so their
/// transaction effects can be routed to the lifecycle layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Same-height conflict: the stale branch was orphaned and the incoming
    /// block installed as canonical in its place.
    Replaced { orphaned: Vec<Block> },
    /// The fork point sits below the incoming block's height. The stale
    /// branch was orphaned but the incoming block was NOT installed, since
    /// that would leave a canonical gap. The caller refetches the new branch
    /// starting at `resume_height`.
    Rewound {
        orphaned: Vec<Block>,
        resume_height: u64,
    },
    /// The canonical chain no longer matches the conflict this call was
    /// issued for. The caller re-runs its detect-and-retry loop.
    Raced,
}

/// Result of a compare-and-set transaction-state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Updated { previous: TxState },
    /// The row exists but its state was not in the expected set.
    Skipped { actual: TxState },
    Missing,
}

/// Persistence interface consumed by the ingestion core. Implementations must
/// make each method a single transaction: concurrent readers never observe a
/// half-applied mutation.
pub trait LedgerStore: Send + Sync {
    fn store_block(&self, block: Block) -> BoxFuture<'_, Result<BlockInsert>>;

    /// Atomically orphans the canonical branch starting at the conflict the
    /// caller observed (`expected_existing`) and inserts `block` as
    /// canonical. Returns [`ReplaceOutcome::Raced`] when the canonical chain
    /// changed since the conflict was observed.
    fn orphan_and_replace(
        &self,
        block: Block,
        expected_existing: BlockHash,
        now_ms: u64,
    ) -> BoxFuture<'_, Result<ReplaceOutcome>>;

    fn latest_canonical_block(&self) -> BoxFuture<'_, Result<Option<Block>>>;

    /// The most recent canonical blocks, height descending, at most `limit`.
    fn canonical_blocks_desc(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Block>>>;

    fn upsert_transaction(&self, tx: TrackedTx) -> BoxFuture<'_, Result<()>>;

    /// Compare-and-set on the expected current state, never a blind
    /// overwrite, so concurrent sweep and inclusion updates cannot clobber
    /// each other.
    fn update_tx_state(
        &self,
        tx_hash: TxHash,
        expected: Vec<TxState>,
        new: TxState,
    ) -> BoxFuture<'_, Result<CasOutcome>>;

    fn transactions_by_state(&self, states: Vec<TxState>) -> BoxFuture<'_, Result<Vec<TrackedTx>>>;

    fn transaction_by_hash(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<TrackedTx>>>;

    fn remove_transaction(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<TrackedTx>>>;

    fn upsert_dropped_tx(&self, dropped: DroppedTx) -> BoxFuture<'_, Result<()>>;

    fn dropped_tx_by_hash(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<DroppedTx>>>;

    fn remove_dropped_tx(&self, tx_hash: TxHash) -> BoxFuture<'_, Result<Option<DroppedTx>>>;

    /// Highest rollup protocol version recorded anywhere in the store, from
    /// blocks or chain info. `None` is a valid cold-start state.
    fn highest_stored_rollup_version(&self) -> BoxFuture<'_, Result<Option<u64>>>;

    fn upsert_chain_info(&self, info: ChainInfo) -> BoxFuture<'_, Result<()>>;

    fn chain_info(&self, network_id: String) -> BoxFuture<'_, Result<Option<ChainInfo>>>;
}
