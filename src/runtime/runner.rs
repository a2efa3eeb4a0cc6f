use crate::chain::store::ChainStore;
use crate::events::EventSink;
use crate::ledger::store::LedgerStore;
use crate::lifecycle::TxLifecycleTracker;
use crate::poller::BlockPoller;
use crate::rpc::pool::NodePool;
use crate::runtime::config::IngestConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use crate::sweeper::DroppedTxDetector;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wires the node pool, chain store, lifecycle tracker, poller and sweeper
/// into one runnable engine, and handles OS signals for graceful shutdowns.
pub struct IngestEngine {
    config: IngestConfig,
    chain: Arc<ChainStore>,
    tracker: Arc<TxLifecycleTracker>,
    telemetry: Arc<Telemetry>,
    fatal: FatalErrorHandler,
    poller: BlockPoller,
    sweeper: DroppedTxDetector,
    shutdown: CancellationToken,
    reporter_token: CancellationToken,
    reporter: Option<JoinHandle<()>>,
    started: bool,
}

impl IngestEngine {
    /// Builds the engine over the given persistence and event-sink seams. The
    /// root [`CancellationToken`] propagates through every background task.
    pub fn new(
        config: IngestConfig,
        ledger: Arc<dyn LedgerStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let telemetry = Arc::new(Telemetry::default());
        let fatal = FatalErrorHandler::new(shutdown.clone());

        let pool = Arc::new(NodePool::new(config.nodes(), config.rpc_timeout())?);
        let chain = Arc::new(ChainStore::new(
            ledger.clone(),
            telemetry.clone(),
            config.max_reorg_retries(),
        ));
        let tracker = Arc::new(TxLifecycleTracker::new(ledger, telemetry.clone()));

        let poller = BlockPoller::new(
            &config,
            pool,
            chain.clone(),
            tracker.clone(),
            sink.clone(),
            telemetry.clone(),
            fatal.clone(),
            shutdown.clone(),
        );
        let sweeper = DroppedTxDetector::new(
            &config,
            chain.clone(),
            tracker.clone(),
            sink,
            telemetry.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            config,
            chain,
            tracker,
            telemetry,
            fatal,
            poller,
            sweeper,
            reporter_token: shutdown.child_token(),
            shutdown,
            reporter: None,
            started: false,
        })
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn chain(&self) -> &Arc<ChainStore> {
        &self.chain
    }

    pub fn tracker(&self) -> &Arc<TxLifecycleTracker> {
        &self.tracker
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// The captured fatal error, if the engine shut down on one.
    pub fn fatal_error(&self) -> Option<anyhow::Error> {
        self.fatal.error()
    }

    /// Height of the last block the poller processed, if any.
    pub fn processed_height(&self) -> Option<u64> {
        self.poller.processed_height()
    }

    /// Starts the poller, the sweeper, and the metrics reporter.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        tracing::info!(
            nodes = self.config.nodes().len(),
            poll_interval = ?self.config.poll_interval(),
            sweep_interval = ?self.config.sweep_interval(),
            "starting ingestion engine"
        );

        self.reporter_token = self.shutdown.child_token();
        self.reporter = Some(telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            self.reporter_token.clone(),
            self.config.metrics_interval(),
        ));

        self.poller.start().await?;
        self.sweeper.start();
        self.started = true;
        Ok(())
    }

    /// Stops the background tasks gracefully, letting in-flight ticks finish.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.poller.stop().await;
        self.sweeper.stop().await;

        self.reporter_token.cancel();
        if let Some(reporter) = self.reporter.take() {
            if let Err(err) = reporter.await {
                tracing::warn!(error = %err, "metrics reporter join failed");
            }
        }

        self.started = false;
        tracing::info!("ingestion engine stopped");
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere (notably by a fatal error). Returns the fatal
    /// error when one caused the shutdown.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("engine started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down engine");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("engine shutdown token cancelled");
            }
        }

        self.stop().await?;

        match self.fatal.error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
