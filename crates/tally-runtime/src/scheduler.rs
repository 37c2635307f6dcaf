//! Deferred callbacks on the node clock
//!
//! Fire-and-forget: scheduled items cannot be cancelled, so every deferred
//! action must be safe to run when its cause no longer holds.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tally_core::SlotIndex;

use crate::ApplicatorId;

/// Deferred action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deferred {
    /// Re-run the dirty check of a slot
    RefreshSlot { slot: SlotIndex, force: bool },
    /// Lift a trigger applicator's cooldown
    EndCooldown { applicator: ApplicatorId },
    /// Fire a timer applicator and re-arm it
    TimerFire { applicator: ApplicatorId },
}

#[derive(Debug)]
struct Entry {
    due: Duration,
    seq: u64,
    action: Deferred,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: the heap pops the earliest item, ties in insertion order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-ordered queue of deferred actions
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Schedule `action` to run `delay` after `now`
    pub fn schedule(&mut self, now: Duration, delay: Duration, action: Deferred) {
        self.seq += 1;
        self.heap.push(Entry {
            due: now.saturating_add(delay),
            seq: self.seq,
            action,
        });
    }

    /// Remove and return every action due at `now`, earliest first
    pub fn pop_due(&mut self, now: Duration) -> Vec<Deferred> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|e| e.due <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry.action);
            }
        }
        due
    }

    /// Due time of the earliest pending action
    pub fn next_due(&self) -> Option<Duration> {
        self.heap.peek().map(|e| e.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
