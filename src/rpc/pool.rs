//! Round-robin pool of rollup node clients.

use crate::rpc::client::{NodeClient, RollupNode};
use crate::types::NodeEndpoint;
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct PoolEntry {
    endpoint: NodeEndpoint,
    node: Arc<dyn RollupNode>,
}

/// Holds the configured set of RPC endpoints and hands out the next node to
/// use. Plain round robin, no health weighting: a node that just errored is
/// eligible again on its next turn, and the caller that received the error is
/// responsible for logging it and trying again on the following tick.
pub struct NodePool {
    entries: Vec<PoolEntry>,
    cursor: AtomicUsize,
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field(
                "endpoints",
                &self.entries.iter().map(|e| &e.endpoint).collect::<Vec<_>>(),
            )
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl NodePool {
    /// Builds one client per endpoint, in the given order. Fails fast on an
    /// empty list.
    pub fn new(endpoints: &[NodeEndpoint], request_timeout: Duration) -> Result<Self> {
        let mut entries = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let client = NodeClient::new(endpoint, request_timeout)?;
            entries.push(PoolEntry {
                endpoint: endpoint.clone(),
                node: Arc::new(client),
            });
        }
        Self::from_entries(entries)
    }

    /// Builds a pool over pre-constructed nodes. This is the seam tests use
    /// to substitute scripted nodes for real clients.
    pub fn with_nodes(nodes: Vec<(NodeEndpoint, Arc<dyn RollupNode>)>) -> Result<Self> {
        let entries = nodes
            .into_iter()
            .map(|(endpoint, node)| PoolEntry { endpoint, node })
            .collect();
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<PoolEntry>) -> Result<Self> {
        if entries.is_empty() {
            bail!("node pool requires at least one configured endpoint");
        }
        Ok(Self {
            entries,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the node at the current cursor and advances the cursor modulo
    /// pool size.
    pub fn next(&self) -> Arc<dyn RollupNode> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        self.entries[index].node.clone()
    }

    /// Configured endpoint URLs, for diagnostics.
    pub fn urls(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.endpoint.url.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
