//! Tally Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the Tally ledger:
//! - Identifiers (PeerId, SlotIndex)
//! - Money arithmetic (saturation, clamping, transport precision)
//! - Ledger actions and read precision
//! - Error taxonomy

pub mod error;
pub mod id;
pub mod money;

pub use error::*;
pub use id::*;
pub use money::*;

/// Re-exported so downstream crates name one decimal type.
pub use rust_decimal::Decimal;
