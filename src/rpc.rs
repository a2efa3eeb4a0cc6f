//! JSON-RPC plumbing towards rollup nodes: the per-node client and the
//! round-robin node pool.

pub mod client;
pub mod pool;

pub use client::{NodeClient, RollupNode, RpcError};
pub use pool::NodePool;
