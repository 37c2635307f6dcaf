//! Tally Node - Runtime loop implementation
//!
//! A node is one peer's view of the session. The substrate drives it with
//! `tick()` and its callbacks, and drains `pop_outbound()` for requests the
//! node needs carried out (replicate a slot, hand a slot to another peer).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tally_core::{Decimal, MoneyAction, PeerId, Precision, SlotIndex, TallyError, TallyResult};
use tally_state::{LedgerTick, PlayerStore, Registry, SlotAllocator};
use tally_wire::SlotPayload;
use tracing::{debug, error, info, warn};

use crate::{Activation, Applicator, ApplicatorId, Deferred, EffectSource, Scheduler, SessionConfig};

/// Request for the substrate
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Replicate the slot's published fields to every other peer
    Replicate { slot: SlotIndex, payload: SlotPayload },
    /// Transfer ownership of a slot (authority only)
    TransferOwnership { slot: SlotIndex, to: PeerId },
}

/// Counters kept by a node across its lifetime
#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub broadcasts: u64,
    pub allocations: u64,
    pub allocation_errors: u64,
    pub transfers_requested: u64,
    pub transfers_confirmed: u64,
    pub malformed_updates: u64,
    pub transport_errors: u64,
    pub outbound_popped: u64,
    pub outbound_dropped: u64,
    pub effects_applied: u64,
    pub last_tick_duration: Duration,
}

/// Tally Node
pub struct Node {
    config: SessionConfig,
    local: PeerId,
    authority: PeerId,
    /// Peers present in the session, in join order
    roster: Vec<PeerId>,
    roster_dirty: bool,
    registry: Registry,
    allocator: SlotAllocator,
    store: Box<dyn PlayerStore>,
    scheduler: Scheduler,
    applicators: Vec<Applicator>,
    outbound: VecDeque<Outbound>,
    /// Effective slot owners as of the last tick
    seen_owners: Vec<PeerId>,
    clock: Duration,
    stats: RuntimeStats,
}

impl Node {
    /// Create a node alone in its session, acting as its own authority
    pub fn new(
        config: SessionConfig,
        local: PeerId,
        store: impl PlayerStore + 'static,
    ) -> TallyResult<Self> {
        config.validate()?;
        let registry = Registry::new(
            config.ledger_configs(),
            config.pool_size,
            config.sync_tolerance,
        )?;
        let seen_owners = registry.slots().iter().map(|s| s.effective_owner(local)).collect();
        let applicators = config.build_applicators()?;

        info!(peer = %local, currencies = registry.currency_names().len(), pool = config.pool_size, applicators = applicators.len(), "node created");

        let mut node = Node {
            config,
            local,
            authority: local,
            roster: vec![local],
            roster_dirty: true,
            registry,
            allocator: SlotAllocator::new(),
            store: Box::new(store),
            scheduler: Scheduler::new(),
            applicators: Vec::new(),
            outbound: VecDeque::new(),
            seen_owners,
            clock: Duration::ZERO,
            stats: RuntimeStats::default(),
        };
        for applicator in applicators {
            node.add_applicator(applicator);
        }
        Ok(node)
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn authority(&self) -> PeerId {
        self.authority
    }

    pub fn is_authority(&self) -> bool {
        self.local == self.authority
    }

    pub fn roster(&self) -> &[PeerId] {
        &self.roster
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Node clock: the sum of every tick's `dt`
    pub fn now(&self) -> Duration {
        self.clock
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    /// Get next outbound request (if any)
    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        let item = self.outbound.pop_front();
        if item.is_some() {
            self.stats.outbound_popped += 1;
        }
        item
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    fn push_outbound(&mut self, item: Outbound) {
        if self.outbound.len() >= self.config.max_outbound {
            self.stats.outbound_dropped += 1;
            self.stats.transport_errors += 1;
            error!(request = ?item, limit = self.config.max_outbound, "outbound queue full; request dropped");
            return;
        }
        self.outbound.push_back(item);
    }

    /// Execute one tick of the runtime loop
    pub fn tick(&mut self, dt: Duration) {
        let start = Instant::now();
        self.stats.ticks += 1;

        // Stage 1: Advance the node clock
        self.clock = self.clock.saturating_add(dt);

        // Stage 2: Run due deferred callbacks
        self.run_deferred();

        // Stage 3: Ledger readiness and change check
        let mut became_active = false;
        let mut changed = false;
        for ledger in self.registry.ledgers_mut() {
            match ledger.tick(self.store.as_mut()) {
                LedgerTick::BecameActive => became_active = true,
                LedgerTick::Changed => changed = true,
                LedgerTick::Idle => {}
            }
        }

        // Stage 4: Publish owned slots
        if became_active {
            self.refresh_owned(true);
        } else if changed {
            self.refresh_owned(false);
        }

        // Stage 5: Allocation (authority only)
        if self.roster_dirty {
            self.roster_dirty = false;
            if self.is_authority() {
                self.run_allocation();
            }
        }

        // Stage 6: Slot owner changes since the last tick
        self.detect_owner_changes();

        self.stats.last_tick_duration = start.elapsed();
    }

    fn run_deferred(&mut self) {
        for action in self.scheduler.pop_due(self.clock) {
            match action {
                Deferred::RefreshSlot { slot, force } => {
                    if let Err(e) = self.refresh_slot(slot, force) {
                        warn!(slot = %slot, error = %e, "deferred refresh skipped");
                    }
                }
                Deferred::EndCooldown { applicator } => {
                    if let Some(app) = self.applicators.get_mut(applicator.as_usize()) {
                        app.set_cooling_down(false);
                    }
                }
                Deferred::TimerFire { applicator } => {
                    if let Err(e) = self.activate(applicator, Activation::Timer) {
                        warn!(applicator = %applicator, error = %e, "timed effect failed");
                    }
                    if let Some(EffectSource::Timer { period }) =
                        self.applicators.get(applicator.as_usize()).map(|a| a.source)
                    {
                        self.scheduler
                            .schedule(self.clock, period, Deferred::TimerFire { applicator });
                    }
                }
            }
        }
    }

    /// Re-run the dirty check of one slot, publishing when needed
    fn refresh_slot(&mut self, index: SlotIndex, force: bool) -> TallyResult<()> {
        let snapshot = self.registry.local_snapshot();
        let (local, authority) = (self.local, self.authority);
        let payload = self
            .registry
            .slot_mut(index)?
            .refresh_if_owner(local, authority, &snapshot, force);
        if let Some(payload) = payload {
            self.stats.broadcasts += 1;
            self.push_outbound(Outbound::Replicate {
                slot: index,
                payload,
            });
        }
        Ok(())
    }

    /// Refresh every slot the local peer owns
    fn refresh_owned(&mut self, force: bool) {
        for index in self.registry.owned_slots(self.local, self.authority) {
            if let Err(e) = self.refresh_slot(index, force) {
                warn!(slot = %index, error = %e, "refresh failed");
            }
        }
    }

    /// Queue a refresh of `slot` after `delay`
    pub fn schedule_refresh(&mut self, slot: SlotIndex, delay: Duration, force: bool) {
        self.scheduler
            .schedule(self.clock, delay, Deferred::RefreshSlot { slot, force });
    }

    fn run_allocation(&mut self) {
        let report = self
            .allocator
            .allocate(&self.roster, self.authority, self.registry.slots_mut());
        self.stats.allocation_errors += report.errors.len() as u64;
        for assignment in report.assigned {
            self.stats.allocations += 1;
            self.request_transfer(assignment.slot, assignment.peer);
        }
    }

    fn request_transfer(&mut self, slot: SlotIndex, to: PeerId) {
        self.stats.transfers_requested += 1;
        self.push_outbound(Outbound::TransferOwnership { slot, to });
    }

    fn detect_owner_changes(&mut self) {
        let (local, authority) = (self.local, self.authority);
        let mut to_refresh = Vec::new();
        for (slot, seen) in self.registry.slots_mut().iter_mut().zip(&mut self.seen_owners) {
            let owner = slot.effective_owner(authority);
            if owner == *seen {
                continue;
            }
            debug!(slot = %slot.index(), from = %seen, to = %owner, "effective owner changed");
            *seen = owner;
            if owner == local {
                to_refresh.push(slot.index());
            } else {
                // The cache belongs to the former owner
                slot.clear();
            }
        }
        for index in to_refresh {
            if let Err(e) = self.refresh_slot(index, true) {
                warn!(slot = %index, error = %e, "refresh failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Substrate callbacks
    // ------------------------------------------------------------------

    /// A peer entered the session
    ///
    /// Owned slots are force-published so the newcomer receives a snapshot.
    pub fn on_peer_joined(&mut self, peer: PeerId) {
        if !self.roster.contains(&peer) {
            self.roster.push(peer);
            self.roster_dirty = true;
            info!(peer = %peer, peers = self.roster.len(), "peer joined");
        }
        self.refresh_owned(true);
    }

    /// A peer left the session; the authority takes its slots back
    pub fn on_peer_left(&mut self, peer: PeerId) {
        self.roster.retain(|p| *p != peer);
        self.roster_dirty = true;
        info!(peer = %peer, peers = self.roster.len(), "peer left");

        if self.is_authority() {
            let reclaimed = self
                .allocator
                .reclaim(peer, self.authority, self.registry.slots_mut());
            for assignment in reclaimed {
                self.request_transfer(assignment.slot, assignment.peer);
            }
        }
    }

    /// The substrate elected a new authority
    ///
    /// A newly elected local authority reclaims slots still held by peers
    /// that are gone.
    pub fn on_authority_changed(&mut self, authority: PeerId) {
        if authority == self.authority {
            return;
        }
        info!(from = %self.authority, to = %authority, "authority changed");
        self.authority = authority;
        self.allocator.reset();
        self.roster_dirty = true;
        // Placeholder slots move with the authority
        self.detect_owner_changes();

        if !self.is_authority() {
            return;
        }
        let mut orphans: Vec<PeerId> = self
            .registry
            .slots()
            .iter()
            .filter_map(|s| s.owner())
            .filter(|p| !self.roster.contains(p))
            .collect();
        orphans.sort();
        orphans.dedup();
        for peer in orphans {
            let reclaimed = self
                .allocator
                .reclaim(peer, self.authority, self.registry.slots_mut());
            for assignment in reclaimed {
                self.request_transfer(assignment.slot, assignment.peer);
            }
        }
    }

    /// Ownership of `slot` moved to `owner`
    pub fn on_ownership_transferred(&mut self, slot: SlotIndex, owner: PeerId) -> TallyResult<()> {
        self.registry.slot_mut(slot)?.set_owner(owner);

        if self.is_authority() {
            if self.allocator.on_transfer_confirmed(slot, owner) {
                self.stats.transfers_confirmed += 1;
            } else {
                self.roster_dirty = true;
            }
        }

        if let Some(seen) = self.seen_owners.get_mut(slot.as_usize()) {
            *seen = owner;
        }
        if owner == self.local {
            self.refresh_slot(slot, true)?;
        }
        Ok(())
    }

    /// A requested transfer was refused or lost
    pub fn on_transfer_failed(&mut self, slot: SlotIndex) {
        if self.is_authority() {
            self.allocator.on_transfer_failed(slot);
            self.roster_dirty = true;
        }
    }

    /// Arbitrate an ownership request; only the authority may move slots
    pub fn on_ownership_request(&self, slot: SlotIndex, requester: PeerId) -> bool {
        match self.registry.slot(slot) {
            Ok(s) => s
                .approve_ownership_request(requester, requester == self.authority)
                .is_ok(),
            Err(e) => {
                warn!(slot = %slot, requester = %requester, error = %e, "ownership request for unknown slot");
                false
            }
        }
    }

    /// A slot snapshot arrived from its owner
    ///
    /// Malformed payloads are logged and counted; the previous snapshot
    /// stays readable.
    pub fn on_remote_update(&mut self, slot: SlotIndex, payload: &SlotPayload) {
        let (local, authority) = (self.local, self.authority);
        let target = match self.registry.slot_mut(slot) {
            Ok(target) => target,
            Err(e) => {
                warn!(slot = %slot, error = %e, "update for unknown slot");
                return;
            }
        };
        if target.is_owned_by(local, authority) {
            debug!(slot = %slot, "ignoring update for locally owned slot");
            return;
        }
        if let Err(e) = target.on_remote_update(payload) {
            self.stats.malformed_updates += 1;
            warn!(slot = %slot, error = %e, "malformed slot update ignored");
        }
    }

    /// Decode a wire frame and apply it as a slot update
    pub fn on_remote_frame(&mut self, slot: SlotIndex, frame: &[u8]) {
        match SlotPayload::decode(frame) {
            Ok(payload) => self.on_remote_update(slot, &payload),
            Err(e) => {
                self.stats.malformed_updates += 1;
                warn!(slot = %slot, error = %e, "undecodable slot frame ignored");
            }
        }
    }

    /// Persistent player data became available; only the local player counts
    pub fn on_player_restored(&mut self, peer: PeerId) {
        if peer != self.local {
            return;
        }
        for ledger in self.registry.ledgers_mut() {
            ledger.on_player_restored(self.store.as_ref());
        }
    }

    /// Outcome of a `Replicate` request. Failures are logged, not retried.
    pub fn on_replication_result(&mut self, slot: SlotIndex, result: TallyResult<()>) {
        if let Err(e) = result {
            self.stats.transport_errors += 1;
            error!(slot = %slot, error = %e, "replication failed");
        }
    }

    // ------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------

    /// Local value of a currency; unknown names read 0
    pub fn get_value(&self, name: &str) -> Decimal {
        self.registry.value(name)
    }

    /// A peer's value of a currency as last replicated
    ///
    /// The local peer reads its ledger directly. Peers without a slot or
    /// without that currency read 0.
    pub fn get_peer_value(&self, peer: PeerId, name: &str, precision: Precision) -> Decimal {
        if peer == self.local {
            return self.get_value(name);
        }
        self.registry
            .slot_owned_by(peer, self.authority)
            .map_or(Decimal::ZERO, |s| s.read(name, precision))
    }

    pub fn currency_names(&self) -> &[String] {
        self.registry.currency_names()
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.registry.ledger(name).is_some_and(|l| l.is_ready())
    }

    /// Apply one mutation to each named currency
    ///
    /// Nothing is applied when any name is unknown.
    pub fn apply_effect<S: AsRef<str>>(
        &mut self,
        action: MoneyAction,
        amount: Decimal,
        names: &[S],
    ) -> TallyResult<()> {
        for name in names {
            let name: &str = name.as_ref();
            if self.registry.ledger(name).is_none() {
                return Err(TallyError::UnknownCurrency(name.to_owned()));
            }
        }
        for name in names {
            if let Some(ledger) = self.registry.ledger_mut(name.as_ref()) {
                ledger.effect(action, amount);
            }
        }
        self.stats.effects_applied += 1;
        debug!(action = ?action, amount = %amount, targets = names.len(), "effect applied");
        Ok(())
    }

    /// `apply_effect` with a floating-point amount
    pub fn apply_effect_f64<S: AsRef<str>>(
        &mut self,
        action: MoneyAction,
        amount: f64,
        names: &[S],
    ) -> TallyResult<()> {
        self.apply_effect(action, tally_core::from_f64(amount), names)
    }

    /// Apply one mutation to every usable currency
    pub fn apply_effect_all(&mut self, action: MoneyAction, amount: Decimal) {
        let names = self.registry.currency_names().to_vec();
        for name in &names {
            if let Some(ledger) = self.registry.ledger_mut(name) {
                ledger.effect(action, amount);
            }
        }
        self.stats.effects_applied += 1;
    }

    // ------------------------------------------------------------------
    // Applicators
    // ------------------------------------------------------------------

    /// Register an applicator; timers start counting now
    pub fn add_applicator(&mut self, applicator: Applicator) -> ApplicatorId {
        let id = ApplicatorId(self.applicators.len() as u32);
        if let EffectSource::Timer { period } = applicator.source {
            // The first period only arms the timer
            self.scheduler
                .schedule(self.clock, period, Deferred::TimerFire { applicator: id });
        }
        self.applicators.push(applicator);
        id
    }

    pub fn applicator(&self, id: ApplicatorId) -> Option<&Applicator> {
        self.applicators.get(id.as_usize())
    }

    /// A peer entered a trigger applicator
    pub fn on_trigger(&mut self, id: ApplicatorId, peer: PeerId) -> TallyResult<bool> {
        self.activate(id, Activation::Trigger(peer))
    }

    /// Fire a scripted applicator
    pub fn fire(&mut self, id: ApplicatorId) -> TallyResult<bool> {
        self.activate(id, Activation::Script)
    }

    /// Run an applicator if the activation matches its source
    ///
    /// Returns whether the effect was applied.
    pub fn activate(&mut self, id: ApplicatorId, activation: Activation) -> TallyResult<bool> {
        let app = self
            .applicators
            .get(id.as_usize())
            .ok_or(TallyError::UnknownApplicator(id.0))?;

        if !app.accepts(activation, self.local) {
            return Ok(false);
        }
        // Timed effects are not gated on balance
        if activation != Activation::Timer && !app.is_enough(&self.registry) {
            debug!(applicator = %id, "not enough to apply effect");
            return Ok(false);
        }

        let (source, action, amount) = (app.source, app.action, app.amount);
        let targets = app.targets.clone();
        self.apply_effect(action, amount, &targets)?;

        if let EffectSource::Trigger { cooldown } = source {
            if let Some(app) = self.applicators.get_mut(id.as_usize()) {
                app.set_cooling_down(true);
            }
            self.scheduler
                .schedule(self.clock, cooldown, Deferred::EndCooldown { applicator: id });
        }
        Ok(true)
    }
}
