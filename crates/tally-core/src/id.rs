//! Identity types for Tally
//!
//! Peers are identified by the session substrate's player number; slots by
//! their fixed position in the replication pool.

use std::fmt;

/// Peer identity - session-scoped player number assigned by the substrate
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId(pub u32);

impl PeerId {
    pub const ZERO: PeerId = PeerId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        PeerId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        PeerId(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replication slot position - fixed for the session lifetime
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SlotIndex(pub u16);

impl SlotIndex {
    #[inline]
    pub fn new(index: u16) -> Self {
        SlotIndex(index)
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Iterate over every index of a pool of `size` slots
    pub fn range(size: usize) -> impl Iterator<Item = SlotIndex> {
        (0..size.min(u16::MAX as usize + 1)).map(|i| SlotIndex(i as u16))
    }
}

impl fmt::Debug for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
