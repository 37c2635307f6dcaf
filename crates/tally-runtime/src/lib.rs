//! Tally Runtime - Node implementation
//!
//! This crate implements the per-peer runtime:
//! - Node tick loop and substrate callbacks
//! - Outbound request queue (replication, ownership transfer)
//! - Session configuration and logging bootstrap
//! - Deferred callbacks and effect applicators

pub mod config;
pub mod effect;
pub mod logging;
pub mod node;
pub mod scheduler;

pub use config::*;
pub use effect::*;
pub use logging::*;
pub use node::*;
pub use scheduler::*;
