//! Domain model shared by the ingestion pipeline: blocks, transaction
//! lifecycle records, dropped-transaction bookkeeping, and chain metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. All timestamps in the pipeline use this
/// representation so age arithmetic stays integer-only.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

macro_rules! hex_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

hex_newtype!(
    /// Hex-encoded block hash.
    BlockHash
);
hex_newtype!(
    /// Hex-encoded transaction hash.
    TxHash
);
hex_newtype!(
    /// Hex-encoded transaction-effect hash (the durable per-block artifact a
    /// transaction leaves behind once included).
    EffectHash
);

/// A configured rollup node endpoint. Immutable after pool initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub name: String,
    pub url: String,
}

impl NodeEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A transaction effect recorded in a block body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxEffect {
    pub tx_hash: TxHash,
    pub effect_hash: EffectHash,
}

/// Orphan marker set when a block is superseded by a conflicting branch.
/// Blocks are never deleted; this is the only mutation they receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanInfo {
    pub timestamp_ms: u64,
    pub has_orphaned_parent: bool,
}

/// An L2 block as observed from a rollup node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,
    pub parent_hash: BlockHash,
    pub protocol_version: u64,
    #[serde(default)]
    pub effects: Vec<TxEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan: Option<OrphanInfo>,
}

impl Block {
    /// True while the block is part of the canonical chain.
    pub fn is_canonical(&self) -> bool {
        self.orphan.is_none()
    }

    pub fn contains_tx(&self, hash: &TxHash) -> bool {
        self.effects.iter().any(|effect| &effect.tx_hash == hash)
    }
}

/// Lifecycle state of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Pending,
    Proposed,
    Included,
    Dropped,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxState::Pending => "pending",
            TxState::Proposed => "proposed",
            TxState::Included => "included",
            TxState::Dropped => "dropped",
        };
        f.write_str(label)
    }
}

/// A transaction in the active tracking set (pending or proposed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTx {
    pub tx_hash: TxHash,
    pub fee_payer: String,
    pub birth_timestamp_ms: u64,
    pub state: TxState,
}

/// A pending-pool entry as reported by a rollup node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTxObservation {
    pub tx_hash: TxHash,
    pub fee_payer: String,
}

/// Why a transaction left active tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    Stale,
    Reorg,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Stale => f.write_str("STALE"),
            DropReason::Reorg => f.write_str("REORG"),
        }
    }
}

/// Bookkeeping row for a transaction that was dropped from active tracking.
/// Exists only while the transaction is not otherwise tracked; removed on
/// resubmission or confirmed re-inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedTx {
    pub tx_hash: TxHash,
    pub reason: DropReason,
    pub previous_state: TxState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_tx_effect_hash: Option<EffectHash>,
    pub created_at_ms: u64,
    pub dropped_at_ms: u64,
}

/// Network-level chain metadata. One logical row per network, versioned by
/// rollup version; updated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub network_id: String,
    pub l1_chain_id: u64,
    pub rollup_version: u64,
    #[serde(default)]
    pub contract_addresses: BTreeMap<String, String>,
}
