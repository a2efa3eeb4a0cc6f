//! Canonical-chain ownership: block persistence with reorg reconciliation
//! and the monotonic rollup-version cache.

pub mod store;
pub mod version;

pub use store::{ChainError, ChainStore, StoredBlock};
pub use version::RollupVersionCache;
