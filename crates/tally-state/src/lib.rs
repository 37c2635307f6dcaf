//! Tally State Engine - Ledgers and replication
//!
//! This crate implements the per-peer currency state and its replication:
//! - Currency ledgers with a one-shot readiness sequence
//! - Player storage for persisted ledger values
//! - Replication slots with tolerance-based dirty detection
//! - Authority-side slot allocation
//! - The registry that owns ledgers and slots

pub mod allocator;
pub mod ledger;
pub mod registry;
pub mod slot;
pub mod store;

pub use allocator::*;
pub use ledger::*;
pub use registry::*;
pub use slot::*;
pub use store::*;
