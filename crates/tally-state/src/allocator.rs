//! Slot allocator - authority-side matching of peers to free slots
//!
//! Runs only on the session authority. The authority is the placeholder
//! owner of every unassigned slot: the first slot it owns is its own, and
//! every further slot it owns is free. Each peer that owns no slot is given
//! the first free slot through an ownership transfer. Transfers complete
//! asynchronously, so targets stay reserved until the substrate confirms.

use std::collections::BTreeMap;

use tally_core::{PeerId, SlotIndex, TallyError};
use tracing::{error, info, warn};

use crate::ReplicationSlot;

/// One ownership transfer the authority must request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub slot: SlotIndex,
    pub peer: PeerId,
}

/// Outcome of one allocation pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationReport {
    /// Transfers to request, in order
    pub assigned: Vec<Assignment>,
    /// Peers left without a slot, with the reason
    pub errors: Vec<TallyError>,
}

impl AllocationReport {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty() && self.errors.is_empty()
    }
}

/// Authority-side allocation state
#[derive(Debug, Default)]
pub struct SlotAllocator {
    /// Transfers requested but not yet confirmed
    pending: BTreeMap<SlotIndex, PeerId>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        SlotAllocator::default()
    }

    /// Transfers still awaiting confirmation
    pub fn pending(&self) -> impl Iterator<Item = (SlotIndex, PeerId)> + '_ {
        self.pending.iter().map(|(s, p)| (*s, *p))
    }

    pub fn is_pending(&self, slot: SlotIndex) -> bool {
        self.pending.contains_key(&slot)
    }

    /// Owner of a slot counting transfers already requested
    fn claimed_by(&self, slot: &ReplicationSlot, authority: PeerId) -> PeerId {
        self.pending
            .get(&slot.index())
            .copied()
            .unwrap_or_else(|| slot.effective_owner(authority))
    }

    /// First slot held by the authority beyond its own
    fn first_free(&self, slots: &[ReplicationSlot], authority: PeerId) -> Option<usize> {
        slots
            .iter()
            .enumerate()
            .filter(|(_, s)| self.claimed_by(s, authority) == authority)
            .map(|(i, _)| i)
            .nth(1)
    }

    /// Match every unslotted roster peer to a free slot
    ///
    /// Target slots are cleared before the transfer is requested so the new
    /// owner never reports the former owner's data.
    pub fn allocate(
        &mut self,
        roster: &[PeerId],
        authority: PeerId,
        slots: &mut [ReplicationSlot],
    ) -> AllocationReport {
        let mut report = AllocationReport::default();

        for &peer in roster {
            let slotted = slots.iter().any(|s| self.claimed_by(s, authority) == peer);
            if slotted {
                continue;
            }

            let Some(i) = self.first_free(slots, authority) else {
                error!(peer = %peer, pool = slots.len(), "no free slot to claim; is the pool large enough?");
                report.errors.push(TallyError::PoolExhausted { peer });
                continue;
            };

            let slot = &mut slots[i];
            slot.clear();
            self.pending.insert(slot.index(), peer);
            info!(slot = %slot.index(), peer = %peer, "assigned slot");
            report.assigned.push(Assignment {
                slot: slot.index(),
                peer,
            });
        }

        report
    }

    /// Slots the departing peer owned, cleared and due back to the authority
    pub fn reclaim(
        &mut self,
        departed: PeerId,
        authority: PeerId,
        slots: &mut [ReplicationSlot],
    ) -> Vec<Assignment> {
        self.pending.retain(|_, p| *p != departed);

        let mut reclaimed = Vec::new();
        for slot in slots.iter_mut() {
            if slot.owner() != Some(departed) || departed == authority {
                continue;
            }
            slot.clear();
            self.pending.insert(slot.index(), authority);
            info!(slot = %slot.index(), peer = %departed, "reclaiming slot of departed peer");
            reclaimed.push(Assignment {
                slot: slot.index(),
                peer: authority,
            });
        }
        reclaimed
    }

    /// The substrate confirmed the owner of `slot`
    ///
    /// Returns false when the confirmation disagrees with the pending request,
    /// in which case the next allocation pass will try again.
    pub fn on_transfer_confirmed(&mut self, slot: SlotIndex, owner: PeerId) -> bool {
        match self.pending.remove(&slot) {
            Some(expected) if expected != owner => {
                warn!(slot = %slot, expected = %expected, actual = %owner, "slot went to another owner");
                false
            }
            _ => true,
        }
    }

    /// A requested transfer was refused or lost
    pub fn on_transfer_failed(&mut self, slot: SlotIndex) {
        if let Some(peer) = self.pending.remove(&slot) {
            warn!(slot = %slot, peer = %peer, "slot transfer failed");
        }
    }

    /// Drop pending state, e.g. when authority moves to another peer
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
