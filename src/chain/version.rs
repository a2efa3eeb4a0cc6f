//! Monotonic cache of the highest observed rollup protocol version.

use crate::ledger::store::LedgerStore;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const UNSET: u64 = u64::MAX;

/// Per-instance ratchet: observations only move the value forward within the
/// instance's lifetime. A cold `get()` falls through to the ledger once.
pub struct RollupVersionCache {
    ledger: Arc<dyn LedgerStore>,
    highest: AtomicU64,
}

impl RollupVersionCache {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            ledger,
            highest: AtomicU64::new(UNSET),
        }
    }

    /// Ratchets the cached maximum. Observations arriving out of order
    /// converge to the same value.
    pub fn observe(&self, version: u64) {
        if version == UNSET {
            return;
        }
        let _ = self
            .highest
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == UNSET || version > current {
                    Some(version)
                } else {
                    None
                }
            });
    }

    /// The highest version seen so far, seeding from the ledger on a cold
    /// start. An empty ledger is a valid cold-start state, not an error.
    pub async fn get(&self) -> Result<Option<u64>> {
        if let Some(cached) = self.cached() {
            return Ok(Some(cached));
        }

        // Concurrent cold-start reads may race here; the ratchet converges
        // to the same maximum regardless of read order.
        match self.ledger.highest_stored_rollup_version().await? {
            Some(stored) => {
                self.observe(stored);
                Ok(self.cached())
            }
            None => {
                tracing::debug!("no rollup version recorded yet; cache stays unset");
                Ok(None)
            }
        }
    }

    fn cached(&self) -> Option<u64> {
        match self.highest.load(Ordering::SeqCst) {
            UNSET => None,
            value => Some(value),
        }
    }
}
