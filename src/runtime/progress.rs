use std::sync::atomic::{AtomicU64, Ordering};

const UNINITIALIZED: u64 = u64::MAX;

/// Tracks the last fully processed block height in memory. The poller only
/// advances this after a height's full pipeline (store + lifecycle update +
/// publish) has succeeded.
#[derive(Debug)]
pub struct ProcessedHeight {
    last_processed: AtomicU64,
}

impl ProcessedHeight {
    /// Starts so that `start_height` is the first height to process.
    pub fn starting_at(start_height: u64) -> Self {
        Self {
            last_processed: AtomicU64::new(Self::initial_value(start_height)),
        }
    }

    pub fn reset(&self, start_height: u64) {
        self.last_processed
            .store(Self::initial_value(start_height), Ordering::SeqCst);
    }

    pub fn mark(&self, height: u64) {
        self.last_processed.store(height, Ordering::SeqCst);
    }

    /// The last processed height, or `None` before the first block.
    pub fn current(&self) -> Option<u64> {
        match self.last_processed.load(Ordering::SeqCst) {
            UNINITIALIZED => None,
            value => Some(value),
        }
    }

    /// The next height to fetch.
    pub fn next_height(&self) -> u64 {
        match self.current() {
            Some(height) => height.saturating_add(1),
            None => 0,
        }
    }

    fn initial_value(start_height: u64) -> u64 {
        if start_height == 0 {
            UNINITIALIZED
        } else {
            start_height.saturating_sub(1)
        }
    }
}
