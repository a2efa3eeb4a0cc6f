//! JSON-RPC client for a single rollup node. Houses the `NodeClient`, the
//! error types, and the `RollupNode` trait consumed by the block poller.

use crate::types::{Block, NodeEndpoint, PendingTxObservation};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

const METHOD_CHAIN_HEIGHT: &str = "node_getChainHeight";
const METHOD_GET_BLOCK: &str = "node_getBlock";
const METHOD_PENDING_TXS: &str = "node_getPendingTransactions";

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    MalformedBlock { height: u64 },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::MalformedBlock { height } => {
                write!(f, "node returned an unparseable block at height {height}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Node capability consumed by the poller. `NodeClient` is the production
/// implementation; tests substitute scripted nodes.
pub trait RollupNode: Send + Sync {
    fn name(&self) -> &str;

    fn chain_height(&self) -> BoxFuture<'_, Result<u64>>;

    /// Returns `None` when the node does not (yet) have a block at `height`.
    fn block_at(&self, height: u64) -> BoxFuture<'_, Result<Option<Block>>>;

    fn pending_transactions(&self) -> BoxFuture<'_, Result<Vec<PendingTxObservation>>>;
}

/// JSON-RPC client bound to one configured rollup node endpoint.
#[derive(Debug, Clone)]
pub struct NodeClient {
    name: String,
    url: String,
    client: HttpClient,
    request_timeout: Duration,
}

impl NodeClient {
    pub fn new(endpoint: &NodeEndpoint, request_timeout: Duration) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(&endpoint.url)
            .map_err(|err| anyhow!("failed to build RPC client for {}: {err}", endpoint.name))?;

        Ok(Self {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            client,
            request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &'static str, params: Vec<Value>) -> Result<Value> {
        let mut builder = rpc_params![];
        for param in params {
            builder
                .insert(param)
                .with_context(|| format!("failed to serialize {method} params"))?;
        }

        timeout(
            self.request_timeout,
            self.client.request::<Value, _>(method, builder),
        )
        .await
            .map_err(|_| RpcError::Timeout { method })?
            .map_err(|err| anyhow!("rpc {method} call to {} failed: {err}", self.name))
    }
}

impl RollupNode for NodeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async {
            let value = self.request(METHOD_CHAIN_HEIGHT, vec![]).await?;
            serde_json::from_value(value).context("chain height response was not an integer")
        })
    }

    fn block_at(&self, height: u64) -> BoxFuture<'_, Result<Option<Block>>> {
        Box::pin(async move {
            let value = self
                .request(METHOD_GET_BLOCK, vec![Value::from(height)])
                .await?;

            if value.is_null() {
                return Ok(None);
            }

            // A block the node reports but cannot be parsed is a distinct
            // condition: the caller skips the height and retries next tick.
            let block: Block = serde_json::from_value(value)
                .map_err(|err| anyhow!(RpcError::MalformedBlock { height }).context(err))?;
            Ok(Some(block))
        })
    }

    fn pending_transactions(&self) -> BoxFuture<'_, Result<Vec<PendingTxObservation>>> {
        Box::pin(async {
            let value = self.request(METHOD_PENDING_TXS, vec![]).await?;
            serde_json::from_value(value).context("pending transactions response was malformed")
        })
    }
}
