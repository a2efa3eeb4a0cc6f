//! Domain events crossing the message-bus boundary.
//!
//! Everything leaving the core goes through one tagged union, validated at
//! the boundary, so downstream consumers (and this crate's own tests) never
//! handle loosely-typed payloads. Delivery is at-least-once; consumers are
//! expected to be idempotent, keyed by tx hash or block height + hash.

use crate::types::{DropReason, EffectHash, TxHash, TxState};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Entry of a `PENDING_TXS` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTxEvent {
    pub tx_hash: TxHash,
    pub fee_payer: String,
    pub birth_timestamp_ms: u64,
}

/// Entry of a `DROPPED_TXS` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedTxEvent {
    pub tx_hash: TxHash,
    pub reason: DropReason,
    pub previous_state: TxState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_tx_effect_hash: Option<EffectHash>,
}

/// The tagged union of events produced by the ingestion core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainEvent {
    #[serde(rename_all = "camelCase")]
    BlockDiscovered {
        height: u64,
        block_payload: Value,
    },
    PendingTxs {
        txs: Vec<PendingTxEvent>,
    },
    DroppedTxs {
        txs: Vec<DroppedTxEvent>,
    },
}

impl ChainEvent {
    /// Validates an untyped payload into a domain event. Unknown tags and
    /// malformed bodies are rejected here, at the boundary.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("invalid chain event payload")
    }

    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).context("failed to serialize chain event")
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::BlockDiscovered { .. } => "BLOCK_DISCOVERED",
            ChainEvent::PendingTxs { .. } => "PENDING_TXS",
            ChainEvent::DroppedTxs { .. } => "DROPPED_TXS",
        }
    }
}

/// Deterministic consumer identity so independent logical handlers on the
/// same topic track independent replay positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn derive(service: &str, network_id: &str, handler: &str) -> Self {
        Self(format!("{service}.{network_id}.{handler}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport seam towards the message bus. The core publishes through this
/// trait and never sees the wire format.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChainEvent) -> BoxFuture<'_, Result<()>>;
}

/// Sink that discards every event. Useful when running the engine purely for
/// its stored state.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ChainEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Sink that buffers events in memory, in publish order.
#[derive(Debug, Default)]
pub struct BufferedSink {
    events: Mutex<Vec<ChainEvent>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<ChainEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }

    pub async fn snapshot(&self) -> Vec<ChainEvent> {
        self.events.lock().await.clone()
    }
}

impl EventSink for BufferedSink {
    fn publish(&self, event: ChainEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.events.lock().await.push(event);
            Ok(())
        })
    }
}
