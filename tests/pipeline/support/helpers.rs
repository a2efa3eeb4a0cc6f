use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use rollstream::{ChainEvent, IngestEngine, TxHash, TxLifecycleTracker};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub async fn wait_for_processed_height(
    engine: &IngestEngine,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = engine.processed_height();
        if let Some(height) = current {
            if height >= target {
                return Ok(());
            }
        }
        if start.elapsed() > timeout {
            let reported = current
                .map(|height| height.to_string())
                .unwrap_or_else(|| "<none>".to_owned());
            bail!(
                "engine did not reach height {target} within {:?} (last processed: {reported})",
                timeout
            );
        }
        sleep(Duration::from_millis(25)).await;
    }
}

pub async fn wait_for_dropped_tx(
    tracker: &TxLifecycleTracker,
    tx_hash: &TxHash,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if tracker.dropped_tx(tx_hash).await?.is_some() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("tx {tx_hash} was not dropped within {:?}", timeout);
        }
        sleep(Duration::from_millis(25)).await;
    }
}

pub fn discovered_heights(events: &[ChainEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            ChainEvent::BlockDiscovered { height, .. } => Some(*height),
            _ => None,
        })
        .collect()
}

pub fn assert_is_contiguous(heights: &[u64]) {
    for window in heights.windows(2) {
        if let [lhs, rhs] = window {
            assert_eq!(rhs, &(lhs + 1), "heights must increase monotonically");
        }
    }
}
