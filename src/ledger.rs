//! Narrow, schema-agnostic persistence seam. The core owns the semantics;
//! the store owns durability. Every operation that must be atomic is a single
//! trait call.

pub mod memory;
pub mod store;

pub use memory::MemoryLedger;
pub use store::{BlockInsert, CasOutcome, LedgerStore, ReplaceOutcome};
