//! Tally Wire Protocol - Binary value format
//!
//! This crate implements the bytes that travel between peers:
//! - Fixed 16-byte decimal blocks (96-bit mantissa, scale, sign)
//! - Counted decimal arrays (u32 count + blocks)
//! - Slot payload frames (names + transport values + raw array)

pub mod decimal;
pub mod snapshot;

pub use decimal::*;
pub use snapshot::*;
