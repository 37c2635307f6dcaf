//! Registry - the ledgers and slots of one session
//!
//! Owns the fixed set of currency ledgers and the fixed slot pool, and
//! resolves currency names to ledgers and peers to slots.

use std::collections::HashSet;

use tally_core::{Decimal, PeerId, SlotIndex, TallyError, TallyResult};

use crate::{CurrencyLedger, LedgerConfig, LocalSnapshot, Readiness, ReplicationSlot};

/// Reject currency names that collide case-insensitively
pub fn check_unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> TallyResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            continue;
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(TallyError::DuplicateCurrency(name.to_owned()));
        }
    }
    Ok(())
}

/// Ledgers and slots of a session
#[derive(Debug)]
pub struct Registry {
    ledgers: Vec<CurrencyLedger>,
    slots: Vec<ReplicationSlot>,
    /// Names of usable ledgers, in configuration order
    names: Vec<String>,
}

impl Registry {
    /// Create ledgers and an unowned pool of `pool_size` slots
    ///
    /// Ledgers with an empty name are kept but stay degraded and are left
    /// out of every snapshot.
    pub fn new(currencies: Vec<LedgerConfig>, pool_size: usize, tolerance: f64) -> TallyResult<Self> {
        check_unique_names(currencies.iter().map(|c| c.name.as_str()))?;
        if pool_size == 0 || pool_size > u16::MAX as usize + 1 {
            return Err(TallyError::Configuration(format!(
                "pool size {} out of range",
                pool_size
            )));
        }

        let mut ledgers: Vec<CurrencyLedger> =
            currencies.into_iter().map(CurrencyLedger::new).collect();
        for ledger in &mut ledgers {
            // An empty name is logged by the ledger and leaves it degraded
            let _ = ledger.start();
        }

        let names = ledgers
            .iter()
            .filter(|l| l.readiness() != Readiness::Uninitialized)
            .map(|l| l.name().to_owned())
            .collect();

        let slots = SlotIndex::range(pool_size)
            .map(|i| ReplicationSlot::new(i, tolerance))
            .collect();

        Ok(Registry {
            ledgers,
            slots,
            names,
        })
    }

    /// Currency names for iteration by presentation layers
    pub fn currency_names(&self) -> &[String] {
        &self.names
    }

    pub fn ledger(&self, name: &str) -> Option<&CurrencyLedger> {
        self.ledgers.iter().find(|l| !l.name().is_empty() && l.name() == name)
    }

    pub fn ledger_mut(&mut self, name: &str) -> Option<&mut CurrencyLedger> {
        self.ledgers
            .iter_mut()
            .find(|l| !l.name().is_empty() && l.name() == name)
    }

    pub fn ledgers(&self) -> &[CurrencyLedger] {
        &self.ledgers
    }

    pub fn ledgers_mut(&mut self) -> &mut [CurrencyLedger] {
        &mut self.ledgers
    }

    /// Local value of a currency; unknown names read 0
    pub fn value(&self, name: &str) -> Decimal {
        self.ledger(name).map_or(Decimal::ZERO, |l| l.value())
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[ReplicationSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [ReplicationSlot] {
        &mut self.slots
    }

    pub fn slot(&self, index: SlotIndex) -> TallyResult<&ReplicationSlot> {
        self.slots
            .get(index.as_usize())
            .ok_or(TallyError::UnknownSlot(index))
    }

    pub fn slot_mut(&mut self, index: SlotIndex) -> TallyResult<&mut ReplicationSlot> {
        self.slots
            .get_mut(index.as_usize())
            .ok_or(TallyError::UnknownSlot(index))
    }

    /// The slot a peer reports through: the first one it owns
    pub fn slot_owned_by(&self, peer: PeerId, authority: PeerId) -> Option<&ReplicationSlot> {
        self.slots.iter().find(|s| s.is_owned_by(peer, authority))
    }

    /// Every slot a peer owns
    pub fn owned_slots(&self, peer: PeerId, authority: PeerId) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .filter(|s| s.is_owned_by(peer, authority))
            .map(|s| s.index())
            .collect()
    }

    /// Current values of every usable currency
    pub fn local_snapshot(&self) -> LocalSnapshot {
        let values = self.names.iter().map(|n| self.value(n)).collect();
        LocalSnapshot::new(self.names.clone(), values)
    }
}
