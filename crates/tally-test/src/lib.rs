//! Tally Test Harness - Session simulation and validation
//!
//! This crate provides:
//! - An in-process session simulator playing the substrate
//! - Seeded randomized scenarios with peer churn
//! - Convergence and slot uniqueness checks

pub mod scenario;
pub mod simulator;

pub use scenario::*;
pub use simulator::*;
