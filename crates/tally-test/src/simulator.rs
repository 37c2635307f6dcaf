//! Session simulator for Tally testing
//!
//! Plays the substrate for a set of in-process nodes: it keeps the roster,
//! elects the authority (the longest-present peer), arbitrates and
//! announces ownership transfers, and carries replicated slot frames
//! between nodes through the wire codec.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tally_core::{Decimal, PeerId, Precision, SlotIndex, TallyError, TallyResult};
use tally_runtime::{Node, Outbound, SessionConfig};
use tally_state::MemoryStore;

/// Upper bound on delivery rounds per `pump()`
const MAX_PUMP_ROUNDS: usize = 64;

/// Delivery counters across the whole session
#[derive(Clone, Debug, Default)]
pub struct SimStats {
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    pub transfers: u64,
    pub transfers_rejected: u64,
}

/// A peer reading a value that disagrees with the subject's own ledger
#[derive(Clone, Debug, PartialEq)]
pub struct Divergence {
    pub observer: PeerId,
    pub subject: PeerId,
    pub seen: Decimal,
    pub actual: Decimal,
}

/// In-process session of several nodes
pub struct SessionSimulator {
    config: SessionConfig,
    nodes: BTreeMap<PeerId, Node>,
    /// Present peers, longest-present first
    join_order: Vec<PeerId>,
    /// Player storage survives leaving, keyed by peer
    stores: HashMap<PeerId, MemoryStore>,
    next_peer: u32,
    current_time: Duration,
    stats: SimStats,
}

impl SessionSimulator {
    pub fn new(config: SessionConfig) -> Self {
        SessionSimulator {
            config,
            nodes: BTreeMap::new(),
            join_order: Vec::new(),
            stores: HashMap::new(),
            next_peer: 1,
            current_time: Duration::ZERO,
            stats: SimStats::default(),
        }
    }

    pub fn authority(&self) -> Option<PeerId> {
        self.join_order.first().copied()
    }

    pub fn peers(&self) -> &[PeerId] {
        &self.join_order
    }

    pub fn node(&self, peer: PeerId) -> Option<&Node> {
        self.nodes.get(&peer)
    }

    pub fn node_mut(&mut self, peer: PeerId) -> Option<&mut Node> {
        self.nodes.get_mut(&peer)
    }

    /// Player storage of a peer, created on first use
    pub fn store(&mut self, peer: PeerId) -> MemoryStore {
        self.stores.entry(peer).or_default().clone()
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Add a new peer to the session
    pub fn join(&mut self) -> TallyResult<PeerId> {
        let peer = PeerId(self.next_peer);
        self.join_as(peer)?;
        Ok(peer)
    }

    /// Add `peer`, reusing its player storage from an earlier visit
    pub fn join_as(&mut self, peer: PeerId) -> TallyResult<()> {
        if self.nodes.contains_key(&peer) {
            return Err(TallyError::Configuration(format!("{} already present", peer)));
        }
        self.next_peer = self.next_peer.max(peer.0 + 1);

        let store = self.store(peer);
        let mut node = Node::new(self.config.clone(), peer, store)?;

        if let Some(authority) = self.authority() {
            node.on_authority_changed(authority);
            for &other in &self.join_order {
                node.on_peer_joined(other);
            }
            // Late joiners learn the current slot owners
            let owners: Vec<(SlotIndex, PeerId)> = self
                .nodes
                .get(&authority)
                .map(|a| {
                    a.registry()
                        .slots()
                        .iter()
                        .filter_map(|s| s.owner().map(|o| (s.index(), o)))
                        .collect()
                })
                .unwrap_or_default();
            for (slot, owner) in owners {
                node.on_ownership_transferred(slot, owner)?;
            }
        }

        for other in self.nodes.values_mut() {
            other.on_peer_joined(peer);
        }

        node.on_player_restored(peer);
        self.nodes.insert(peer, node);
        self.join_order.push(peer);
        self.pump();
        Ok(())
    }

    /// Remove a peer; authority passes to the longest-present peer left
    pub fn leave(&mut self, peer: PeerId) {
        if self.nodes.remove(&peer).is_none() {
            return;
        }
        let was_authority = self.authority() == Some(peer);
        self.join_order.retain(|p| *p != peer);

        if was_authority {
            if let Some(authority) = self.authority() {
                for node in self.nodes.values_mut() {
                    node.on_authority_changed(authority);
                }
            }
        }
        for node in self.nodes.values_mut() {
            node.on_peer_left(peer);
        }
        self.pump();
    }

    /// Tick every node once and deliver what they emit
    pub fn step(&mut self) {
        let dt = self.config.tick_interval();
        self.current_time += dt;
        for node in self.nodes.values_mut() {
            node.tick(dt);
        }
        self.pump();
    }

    /// Run `ticks` steps
    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Deliver outbound requests until every queue is empty
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut batch = Vec::new();
            for (&peer, node) in self.nodes.iter_mut() {
                while let Some(item) = node.pop_outbound() {
                    batch.push((peer, item));
                }
            }
            if batch.is_empty() {
                return;
            }
            for (sender, item) in batch {
                match item {
                    Outbound::Replicate { slot, payload } => self.replicate(sender, slot, &payload),
                    Outbound::TransferOwnership { slot, to } => self.transfer(sender, slot, to),
                }
            }
        }
    }

    fn replicate(&mut self, sender: PeerId, slot: SlotIndex, payload: &tally_wire::SlotPayload) {
        // Only the current owner's writes reach the other peers
        let owns = self.nodes.get(&sender).is_some_and(|n| {
            n.registry()
                .slot(slot)
                .is_ok_and(|s| s.is_owned_by(sender, n.authority()))
        });
        if !owns {
            return;
        }
        let frame = match payload.encode() {
            Ok(frame) => frame,
            Err(e) => {
                if let Some(node) = self.nodes.get_mut(&sender) {
                    node.on_replication_result(slot, Err(e));
                }
                return;
            }
        };
        for (&peer, node) in self.nodes.iter_mut() {
            if peer == sender {
                continue;
            }
            node.on_remote_frame(slot, &frame);
            self.stats.frames_delivered += 1;
            self.stats.bytes_delivered += frame.len() as u64;
        }
        if let Some(node) = self.nodes.get_mut(&sender) {
            node.on_replication_result(slot, Ok(()));
        }
    }

    fn transfer(&mut self, sender: PeerId, slot: SlotIndex, to: PeerId) {
        let current = self
            .nodes
            .get(&sender)
            .and_then(|n| n.registry().slot(slot).ok().map(|s| s.effective_owner(n.authority())));

        // The current owner arbitrates; a departed owner cannot object
        let approved = self.nodes.contains_key(&to)
            && match current.and_then(|c| self.nodes.get(&c)) {
                Some(owner) => owner.on_ownership_request(slot, sender),
                None => true,
            };

        if !approved {
            self.stats.transfers_rejected += 1;
            if let Some(node) = self.nodes.get_mut(&sender) {
                node.on_transfer_failed(slot);
            }
            return;
        }

        self.stats.transfers += 1;
        for node in self.nodes.values_mut() {
            // Slot indices come from the shared pool size
            let _ = node.on_ownership_transferred(slot, to);
        }
    }

    /// Mismatches between what each peer reads for every other peer and
    /// that peer's own value
    pub fn divergences(&self, currency: &str) -> Vec<Divergence> {
        let mut found = Vec::new();
        for (&observer, node) in &self.nodes {
            for (&subject, owner) in &self.nodes {
                let actual = owner.get_value(currency);
                let seen = node.get_peer_value(subject, currency, Precision::Raw);
                if seen != actual {
                    found.push(Divergence {
                        observer,
                        subject,
                        seen,
                        actual,
                    });
                }
            }
        }
        found
    }

    /// Every peer reads every other peer's current value
    pub fn converged(&self, currency: &str) -> bool {
        self.divergences(currency).is_empty()
    }

    /// Each present peer holds a slot no other peer holds
    pub fn slots_unique(&self) -> bool {
        let Some(authority) = self.authority().and_then(|a| self.nodes.get(&a)) else {
            return true;
        };
        let mut taken = Vec::new();
        for &peer in &self.join_order {
            match authority.registry().slot_owned_by(peer, authority.authority()) {
                Some(slot) if !taken.contains(&slot.index()) => taken.push(slot.index()),
                _ => return false,
            }
        }
        true
    }
}
