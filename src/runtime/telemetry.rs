use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls
/// back to `info`. Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    blocks_ingested: AtomicU64,
    reorgs: AtomicU64,
    txs_included: AtomicU64,
    txs_dropped: AtomicU64,
    rpc_errors: AtomicU64,
    events_published: AtomicU64,
}

impl Telemetry {
    pub fn record_block_ingested(&self) {
        self.blocks_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reorg(&self) {
        self.reorgs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_included(&self) {
        self.txs_included.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_dropped(&self) {
        self.txs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_error(&self) {
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            blocks_ingested: self.blocks_ingested.load(Ordering::Relaxed),
            reorgs: self.reorgs.load(Ordering::Relaxed),
            txs_included: self.txs_included.load(Ordering::Relaxed),
            txs_dropped: self.txs_dropped.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
        }
    }

}

/// Spawns a background task that periodically logs the counter snapshot
/// until the token is cancelled.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    report_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        blocks_ingested = snapshot.blocks_ingested,
                        reorgs = snapshot.reorgs,
                        txs_included = snapshot.txs_included,
                        txs_dropped = snapshot.txs_dropped,
                        rpc_errors = snapshot.rpc_errors,
                        events_published = snapshot.events_published,
                        "ingestion metrics"
                    );
                }
            }
        }
    })
}

/// Point-in-time view of the telemetry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub blocks_ingested: u64,
    pub reorgs: u64,
    pub txs_included: u64,
    pub txs_dropped: u64,
    pub rpc_errors: u64,
    pub events_published: u64,
}
