//! Transaction lifecycle state machine.
//!
//! The tracker is the single writer of transaction state. Transitions:
//!
//! | from              | to             | trigger                                   |
//! |-------------------|----------------|-------------------------------------------|
//! | (none)            | pending        | pending-pool observation / resurrection   |
//! | pending           | proposed       | hash found in a fetched block body        |
//! | pending/proposed  | included       | transaction effect durably stored         |
//! | pending/proposed  | dropped STALE  | staleness sweep                           |
//! | (included effect) | dropped REORG  | containing block orphaned                 |
//! | dropped           | pending        | hash reappears in the pending pool        |
//!
//! Every write is a compare-and-set on the expected current state so a sweep
//! cannot clobber a concurrent inclusion, and vice versa.

use crate::events::{DroppedTxEvent, PendingTxEvent};
use crate::ledger::store::{CasOutcome, LedgerStore};
use crate::runtime::telemetry::Telemetry;
use crate::types::{
    Block, DropReason, DroppedTx, PendingTxObservation, TrackedTx, TxHash, TxState,
};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

pub struct TxLifecycleTracker {
    ledger: Arc<dyn LedgerStore>,
    telemetry: Arc<Telemetry>,
}

impl TxLifecycleTracker {
    pub fn new(ledger: Arc<dyn LedgerStore>, telemetry: Arc<Telemetry>) -> Self {
        Self { ledger, telemetry }
    }

    /// Records a pending-pool observation batch. New hashes enter as pending;
    /// dropped hashes are resurrected with their original birth timestamp so
    /// age metrics stay correct; hashes already tracked are a no-op. Returns
    /// the entries that (re-)entered pending, for the `PENDING_TXS` event.
    pub async fn observe_pending(
        &self,
        batch: Vec<PendingTxObservation>,
        now_ms: u64,
    ) -> Result<Vec<PendingTxEvent>> {
        let mut entered = Vec::new();

        for observation in batch {
            if let Some(dropped) = self
                .ledger
                .dropped_tx_by_hash(observation.tx_hash.clone())
                .await?
            {
                self.ledger
                    .remove_dropped_tx(observation.tx_hash.clone())
                    .await?;
                let resurrected = TrackedTx {
                    tx_hash: observation.tx_hash.clone(),
                    fee_payer: observation.fee_payer.clone(),
                    birth_timestamp_ms: dropped.created_at_ms,
                    state: TxState::Pending,
                };
                tracing::info!(
                    tx = %resurrected.tx_hash,
                    reason = %dropped.reason,
                    "dropped transaction reappeared in pending pool; resurrecting"
                );
                self.ledger.upsert_transaction(resurrected.clone()).await?;
                entered.push(PendingTxEvent {
                    tx_hash: resurrected.tx_hash,
                    fee_payer: resurrected.fee_payer,
                    birth_timestamp_ms: resurrected.birth_timestamp_ms,
                });
                continue;
            }

            if self
                .ledger
                .transaction_by_hash(observation.tx_hash.clone())
                .await?
                .is_some()
            {
                // Duplicate observation: a no-op beyond the timestamp refresh
                // the upsert would perform; not re-announced.
                continue;
            }

            let tx = TrackedTx {
                tx_hash: observation.tx_hash,
                fee_payer: observation.fee_payer,
                birth_timestamp_ms: now_ms,
                state: TxState::Pending,
            };
            self.ledger.upsert_transaction(tx.clone()).await?;
            entered.push(PendingTxEvent {
                tx_hash: tx.tx_hash,
                fee_payer: tx.fee_payer,
                birth_timestamp_ms: tx.birth_timestamp_ms,
            });
        }

        Ok(entered)
    }

    /// Reconciles tracked transactions against a freshly stored block body:
    /// pending rows found in the body move to proposed, then to included once
    /// the store call has made their effects durable. Included rows leave the
    /// active set; a matching dropped row is cleared (confirmed
    /// re-inclusion).
    pub async fn reconcile_block(&self, block: &Block) -> Result<()> {
        for effect in &block.effects {
            match self
                .ledger
                .update_tx_state(
                    effect.tx_hash.clone(),
                    vec![TxState::Pending],
                    TxState::Proposed,
                )
                .await?
            {
                CasOutcome::Updated { .. } => {
                    tracing::trace!(tx = %effect.tx_hash, height = block.height, "tx proposed");
                }
                CasOutcome::Skipped { .. } | CasOutcome::Missing => {}
            }

            let included = self
                .ledger
                .update_tx_state(
                    effect.tx_hash.clone(),
                    vec![TxState::Pending, TxState::Proposed],
                    TxState::Included,
                )
                .await?;
            if let CasOutcome::Updated { .. } = included {
                self.ledger.remove_transaction(effect.tx_hash.clone()).await?;
                self.telemetry.record_tx_included();
                tracing::debug!(tx = %effect.tx_hash, height = block.height, "tx included");
            }

            if self
                .ledger
                .remove_dropped_tx(effect.tx_hash.clone())
                .await?
                .is_some()
            {
                tracing::info!(
                    tx = %effect.tx_hash,
                    height = block.height,
                    "previously dropped tx confirmed re-included"
                );
            }
        }

        Ok(())
    }

    /// Handles the transaction effects of reorg-orphaned blocks. Each effect
    /// yields a REORG drop signal carrying the orphaned effect hash. A
    /// transaction still in the active set is restored to pending (its body
    /// may still be valid and eligible for re-inclusion) rather than left in
    /// a dropped state; one that was already included-and-removed gains a
    /// dropped row so a later resubmission resurrects it.
    pub async fn on_effects_orphaned(
        &self,
        orphaned_blocks: &[Block],
        now_ms: u64,
    ) -> Result<Vec<DroppedTxEvent>> {
        let mut events = Vec::new();

        for block in orphaned_blocks {
            for effect in &block.effects {
                // A compare-and-set keeps the restore from racing a sweep: if
                // the sweep already moved the row out of pending/proposed,
                // the tx is treated as dropped, never blindly re-activated.
                match self
                    .ledger
                    .update_tx_state(
                        effect.tx_hash.clone(),
                        vec![TxState::Pending, TxState::Proposed],
                        TxState::Pending,
                    )
                    .await?
                {
                    CasOutcome::Updated { previous } => {
                        tracing::info!(
                            tx = %effect.tx_hash,
                            height = block.height,
                            "effect orphaned by reorg; tx restored to pending"
                        );
                        events.push(DroppedTxEvent {
                            tx_hash: effect.tx_hash.clone(),
                            reason: DropReason::Reorg,
                            previous_state: previous,
                            orphaned_tx_effect_hash: Some(effect.effect_hash.clone()),
                        });
                    }
                    CasOutcome::Skipped { .. } | CasOutcome::Missing => {
                        // Either included-and-removed, or a concurrent sweep
                        // got there first. An existing dropped row keeps its
                        // birth timestamp so a resurrection stays aged.
                        let (created_at_ms, previous_state) = match self
                            .ledger
                            .dropped_tx_by_hash(effect.tx_hash.clone())
                            .await?
                        {
                            Some(existing) => (existing.created_at_ms, existing.previous_state),
                            None => (now_ms, TxState::Included),
                        };
                        let dropped = DroppedTx {
                            tx_hash: effect.tx_hash.clone(),
                            reason: DropReason::Reorg,
                            previous_state,
                            orphaned_tx_effect_hash: Some(effect.effect_hash.clone()),
                            created_at_ms,
                            dropped_at_ms: now_ms,
                        };
                        self.ledger.upsert_dropped_tx(dropped.clone()).await?;
                        self.telemetry.record_tx_dropped();
                        tracing::info!(
                            tx = %effect.tx_hash,
                            height = block.height,
                            "included effect orphaned by reorg; tx marked dropped"
                        );
                        events.push(DroppedTxEvent {
                            tx_hash: dropped.tx_hash,
                            reason: DropReason::Reorg,
                            previous_state: dropped.previous_state,
                            orphaned_tx_effect_hash: dropped.orphaned_tx_effect_hash,
                        });
                    }
                }
            }
        }

        Ok(events)
    }

    /// Drops every pending/proposed transaction older than the age threshold
    /// whose hash does not appear in any of the given recent canonical
    /// blocks. Idempotent: rows a previous sweep already dropped are gone
    /// from the active set and are not re-processed.
    pub async fn drop_stale(
        &self,
        now_ms: u64,
        age_threshold_ms: u64,
        recent_blocks: &[Block],
    ) -> Result<Vec<DroppedTxEvent>> {
        let recent_hashes: HashSet<&TxHash> = recent_blocks
            .iter()
            .flat_map(|block| block.effects.iter().map(|effect| &effect.tx_hash))
            .collect();

        let candidates = self
            .ledger
            .transactions_by_state(vec![TxState::Pending, TxState::Proposed])
            .await?;

        let mut events = Vec::new();
        for tx in candidates {
            let age = now_ms.saturating_sub(tx.birth_timestamp_ms);
            if age <= age_threshold_ms || recent_hashes.contains(&tx.tx_hash) {
                continue;
            }

            let outcome = self
                .ledger
                .update_tx_state(
                    tx.tx_hash.clone(),
                    vec![TxState::Pending, TxState::Proposed],
                    TxState::Dropped,
                )
                .await?;
            let previous = match outcome {
                CasOutcome::Updated { previous } => previous,
                // A concurrent inclusion won the race; nothing to drop.
                CasOutcome::Skipped { .. } | CasOutcome::Missing => continue,
            };

            self.ledger.remove_transaction(tx.tx_hash.clone()).await?;
            self.ledger
                .upsert_dropped_tx(DroppedTx {
                    tx_hash: tx.tx_hash.clone(),
                    reason: DropReason::Stale,
                    previous_state: previous,
                    orphaned_tx_effect_hash: None,
                    created_at_ms: tx.birth_timestamp_ms,
                    dropped_at_ms: now_ms,
                })
                .await?;
            self.telemetry.record_tx_dropped();
            tracing::info!(
                tx = %tx.tx_hash,
                age_ms = age,
                previous_state = %previous,
                "stale transaction dropped"
            );
            events.push(DroppedTxEvent {
                tx_hash: tx.tx_hash,
                reason: DropReason::Stale,
                previous_state: previous,
                orphaned_tx_effect_hash: None,
            });
        }

        Ok(events)
    }

    /// Active transactions currently in any of the given states.
    pub async fn txs_in_states(&self, states: &[TxState]) -> Result<Vec<TrackedTx>> {
        self.ledger.transactions_by_state(states.to_vec()).await
    }

    pub async fn tx_by_hash(&self, hash: &TxHash) -> Result<Option<TrackedTx>> {
        self.ledger.transaction_by_hash(hash.clone()).await
    }

    pub async fn dropped_tx(&self, hash: &TxHash) -> Result<Option<DroppedTx>> {
        self.ledger.dropped_tx_by_hash(hash.clone()).await
    }
}
