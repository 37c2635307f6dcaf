//! Error types for Tally

use thiserror::Error;

use crate::{PeerId, SlotIndex};

/// Core Tally errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TallyError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Currency name is empty")]
    EmptyCurrencyName,

    #[error("Duplicate currency name: {0}")]
    DuplicateCurrency(String),

    #[error("No free slot for peer {peer}: pool is undersized for this session")]
    PoolExhausted { peer: PeerId },

    // Wire errors
    #[error("Malformed decimal: expected 16 bytes, got {len}")]
    MalformedDecimal { len: usize },

    #[error("Malformed decimal: invalid flags word {0:#010x}")]
    InvalidDecimalFlags(u32),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Invalid UTF-8 in currency name")]
    InvalidUtf8,

    #[error("Malformed snapshot: {names} names but {values} values")]
    MalformedSnapshot { names: usize, values: usize },

    // Ownership errors
    #[error("Ownership denied: peer {requester} cannot grant slot {slot}")]
    OwnershipDenied { requester: PeerId, slot: SlotIndex },

    // Lookup errors
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Unknown slot: {0}")]
    UnknownSlot(SlotIndex),

    #[error("Unknown applicator: {0}")]
    UnknownApplicator(u32),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for Tally operations
pub type TallyResult<T> = Result<T, TallyError>;
