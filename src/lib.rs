//! Rollup chain ingestion engine: polls a pool of rollup nodes for new
//! blocks, reconciles reorgs against a canonical ledger, tracks the
//! transaction lifecycle from pending pool to inclusion (or drop), and
//! publishes the resulting domain events.

pub mod chain;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod poller;
pub mod rpc;
pub mod runtime;
pub mod sweeper;
pub mod types;

pub use chain::{ChainError, ChainStore, RollupVersionCache, StoredBlock};
pub use events::{BufferedSink, ChainEvent, ConsumerId, DroppedTxEvent, EventSink, NullSink, PendingTxEvent};
pub use ledger::{BlockInsert, CasOutcome, LedgerStore, MemoryLedger, ReplaceOutcome};
pub use lifecycle::TxLifecycleTracker;
pub use poller::BlockPoller;
pub use rpc::{NodeClient, NodePool, RollupNode, RpcError};
pub use runtime::config::{IngestConfig, IngestConfigBuilder, IngestConfigParams};
pub use runtime::runner::IngestEngine;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use types::{
    Block, BlockHash, ChainInfo, DropReason, DroppedTx, EffectHash, NodeEndpoint, OrphanInfo,
    PendingTxObservation, TrackedTx, TxEffect, TxHash, TxState,
};
