use crate::runtime::telemetry;
use crate::types::NodeEndpoint;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BATCH_SIZE: u64 = 50;
const DEFAULT_DROPPED_TX_AGE_THRESHOLD_MS: u64 = 300_000;
const DEFAULT_DROPPED_TX_LOOKBACK_BLOCKS: usize = 20;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_REORG_RETRIES: usize = 3;

/// Runtime configuration for the ingestion engine.
///
/// All instances must be constructed via [`IngestConfig::builder`] or
/// [`IngestConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    nodes: Vec<NodeEndpoint>,
    poll_interval: Duration,
    rpc_timeout: Duration,
    max_batch_size: u64,
    start_height: u64,
    ignore_processed_height: Option<u64>,
    genesis_catchup: bool,
    dropped_tx_age_threshold_ms: u64,
    dropped_tx_lookback_blocks: usize,
    sweep_interval: Duration,
    max_reorg_retries: usize,
    metrics_interval: Duration,
}

pub struct IngestConfigParams {
    pub nodes: Vec<NodeEndpoint>,
    pub poll_interval: Duration,
    pub rpc_timeout: Duration,
    pub max_batch_size: u64,
    pub start_height: u64,
    pub ignore_processed_height: Option<u64>,
    pub genesis_catchup: bool,
    pub dropped_tx_age_threshold_ms: u64,
    pub dropped_tx_lookback_blocks: usize,
    pub sweep_interval: Duration,
    pub max_reorg_retries: usize,
    pub metrics_interval: Duration,
}

impl IngestConfig {
    /// Returns a builder to incrementally construct and validate a
    /// configuration.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values,
    /// enforcing validation without going through the builder.
    pub fn new(params: IngestConfigParams) -> Result<Self> {
        let IngestConfigParams {
            nodes,
            poll_interval,
            rpc_timeout,
            max_batch_size,
            start_height,
            ignore_processed_height,
            genesis_catchup,
            dropped_tx_age_threshold_ms,
            dropped_tx_lookback_blocks,
            sweep_interval,
            max_reorg_retries,
            metrics_interval,
        } = params;

        let config = Self {
            nodes,
            poll_interval,
            rpc_timeout,
            max_batch_size,
            start_height,
            ignore_processed_height,
            genesis_catchup,
            dropped_tx_age_threshold_ms,
            dropped_tx_lookback_blocks,
            sweep_interval,
            max_reorg_retries,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Configured rollup node endpoints, in pool order.
    pub fn nodes(&self) -> &[NodeEndpoint] {
        &self.nodes
    }

    /// Cadence of the block-poller tick.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-RPC timeout applied to node clients.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Maximum number of blocks fetched per catch-up cycle.
    pub fn max_batch_size(&self) -> u64 {
        self.max_batch_size
    }

    /// Height ingestion starts from when the engine first boots.
    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    /// Operator override forcing reprocessing from an arbitrary height.
    pub fn ignore_processed_height(&self) -> Option<u64> {
        self.ignore_processed_height
    }

    /// Whether a one-shot catch-up from height 0 runs before normal polling.
    pub fn genesis_catchup(&self) -> bool {
        self.genesis_catchup
    }

    /// Age beyond which an unseen pending/proposed tx is considered stale.
    pub fn dropped_tx_age_threshold_ms(&self) -> u64 {
        self.dropped_tx_age_threshold_ms
    }

    /// Number of recent canonical blocks inspected before dropping a tx.
    pub fn dropped_tx_lookback_blocks(&self) -> usize {
        self.dropped_tx_lookback_blocks
    }

    /// Cadence of the dropped-tx sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Bound on the insert-reconcile-retry loop per stored block.
    pub fn max_reorg_retries(&self) -> usize {
        self.max_reorg_retries
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("at least one node endpoint is required");
        }
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                bail!("node names cannot be empty");
            }
            let url = node.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("node url for {} must start with http:// or https://", node.name);
            }
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.max_batch_size == 0 {
            bail!("max_batch_size must be greater than 0");
        }

        if self.dropped_tx_age_threshold_ms == 0 {
            bail!("dropped_tx_age_threshold_ms must be greater than 0");
        }

        if self.dropped_tx_lookback_blocks == 0 {
            bail!("dropped_tx_lookback_blocks must be greater than 0");
        }

        if self.sweep_interval.is_zero() {
            bail!("sweep_interval must be greater than 0");
        }

        if self.max_reorg_retries == 0 {
            bail!("max_reorg_retries must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IngestConfigBuilder {
    nodes: Vec<NodeEndpoint>,
    poll_interval: Option<Duration>,
    rpc_timeout: Option<Duration>,
    max_batch_size: Option<u64>,
    start_height: Option<u64>,
    ignore_processed_height: Option<u64>,
    genesis_catchup: bool,
    dropped_tx_age_threshold_ms: Option<u64>,
    dropped_tx_lookback_blocks: Option<usize>,
    sweep_interval: Option<Duration>,
    max_reorg_retries: Option<usize>,
    metrics_interval: Option<Duration>,
}

impl IngestConfigBuilder {
    pub fn node(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.nodes.push(NodeEndpoint::new(name, url));
        self
    }

    pub fn nodes(mut self, nodes: Vec<NodeEndpoint>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn max_batch_size(mut self, size: u64) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn start_height(mut self, height: u64) -> Self {
        self.start_height = Some(height);
        self
    }

    pub fn ignore_processed_height(mut self, height: u64) -> Self {
        self.ignore_processed_height = Some(height);
        self
    }

    pub fn genesis_catchup(mut self, enabled: bool) -> Self {
        self.genesis_catchup = enabled;
        self
    }

    pub fn dropped_tx_age_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.dropped_tx_age_threshold_ms = Some(threshold_ms);
        self
    }

    pub fn dropped_tx_lookback_blocks(mut self, blocks: usize) -> Self {
        self.dropped_tx_lookback_blocks = Some(blocks);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn max_reorg_retries(mut self, retries: usize) -> Self {
        self.max_reorg_retries = Some(retries);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<IngestConfig> {
        if self.nodes.is_empty() {
            bail!("at least one node endpoint is required");
        }

        let params = IngestConfigParams {
            nodes: self.nodes,
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            max_batch_size: self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE),
            start_height: self.start_height.unwrap_or(0),
            ignore_processed_height: self.ignore_processed_height,
            genesis_catchup: self.genesis_catchup,
            dropped_tx_age_threshold_ms: self
                .dropped_tx_age_threshold_ms
                .unwrap_or(DEFAULT_DROPPED_TX_AGE_THRESHOLD_MS),
            dropped_tx_lookback_blocks: self
                .dropped_tx_lookback_blocks
                .unwrap_or(DEFAULT_DROPPED_TX_LOOKBACK_BLOCKS),
            sweep_interval: self
                .sweep_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)),
            max_reorg_retries: self.max_reorg_retries.unwrap_or(DEFAULT_MAX_REORG_RETRIES),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        IngestConfig::new(params)
    }
}
