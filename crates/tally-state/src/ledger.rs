//! Currency ledger - the authoritative local value of one currency
//!
//! A ledger becomes usable through a one-shot readiness sequence:
//!
//! ```text
//! Uninitialized -> NameValidated -> DataLoaded -> Active
//! ```
//!
//! - `start` validates the name. An empty name leaves the ledger
//!   Uninitialized for the whole session (degraded).
//! - With persistence disabled the ledger moves straight to DataLoaded;
//!   otherwise it waits for the player-data-restored callback.
//! - The next tick after DataLoaded resets the value to its default when no
//!   stored data was found, and the ledger becomes Active.

use tally_core::{clamp, Decimal, MoneyAction, TallyError, TallyResult};
use tally_wire::{decode_decimal, encode_decimal};
use tracing::{debug, error, info, warn};

use crate::PlayerStore;

/// Readiness of a ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Readiness {
    Uninitialized,
    NameValidated,
    DataLoaded,
    Active,
}

/// Static configuration of a currency
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerConfig {
    pub name: String,
    pub default_value: Decimal,
    pub persistence: bool,
}

impl LedgerConfig {
    pub fn new(name: impl Into<String>, default_value: Decimal) -> Self {
        LedgerConfig {
            name: name.into(),
            default_value,
            persistence: true,
        }
    }

    pub fn without_persistence(mut self) -> Self {
        self.persistence = false;
        self
    }
}

/// What a ledger tick asks of the owning node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerTick {
    /// Nothing to do
    Idle,
    /// The ledger just became Active; owned slots must force-sync
    BecameActive,
    /// The value moved since it was last persisted; owned slots re-check
    Changed,
}

/// Authoritative local store for one currency
#[derive(Debug)]
pub struct CurrencyLedger {
    name: String,
    value: Decimal,
    default_value: Decimal,
    persistence: bool,
    readiness: Readiness,
    has_player_data: bool,
    last_persisted: Decimal,
}

impl CurrencyLedger {
    pub fn new(config: LedgerConfig) -> Self {
        CurrencyLedger {
            name: config.name,
            value: Decimal::ZERO,
            default_value: clamp(config.default_value),
            persistence: config.persistence,
            readiness: Readiness::Uninitialized,
            has_player_data: false,
            last_persisted: Decimal::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn default_value(&self) -> Decimal {
        self.default_value
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Active
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence
    }

    pub fn has_player_data(&self) -> bool {
        self.has_player_data
    }

    /// Validate the configured name and enter the readiness sequence
    pub fn start(&mut self) -> TallyResult<Readiness> {
        if self.readiness != Readiness::Uninitialized {
            return Ok(self.readiness);
        }
        if self.name.is_empty() {
            error!("currency name is empty; ledger will stay degraded");
            return Err(TallyError::EmptyCurrencyName);
        }

        self.readiness = Readiness::NameValidated;
        debug!(currency = %self.name, "name validated");

        if !self.persistence {
            self.readiness = Readiness::DataLoaded;
            debug!(currency = %self.name, "persistence disabled, skipped restore");
        }
        Ok(self.readiness)
    }

    /// Player data for the local player has been restored
    pub fn on_player_restored(&mut self, store: &dyn PlayerStore) {
        if self.readiness != Readiness::NameValidated || !self.persistence {
            return;
        }

        self.has_player_data = false;
        if let Some(bytes) = store.get_bytes(&self.name) {
            match decode_decimal(&bytes) {
                Ok(stored) => {
                    let stored = clamp(stored);
                    self.value = stored;
                    self.last_persisted = stored;
                    self.has_player_data = true;
                }
                Err(e) => {
                    warn!(currency = %self.name, error = %e, "discarding unreadable stored value");
                }
            }
        }

        self.readiness = Readiness::DataLoaded;
        debug!(currency = %self.name, found = self.has_player_data, "player data restored");
    }

    /// Advance the readiness sequence and run the change check
    pub fn tick(&mut self, store: &mut dyn PlayerStore) -> LedgerTick {
        let mut result = LedgerTick::Idle;

        if self.readiness == Readiness::DataLoaded {
            if !self.has_player_data {
                self.reset();
            }
            self.readiness = Readiness::Active;
            if self.has_player_data {
                info!(currency = %self.name, value = %self.value, "ledger ready with stored value");
            } else {
                info!(currency = %self.name, "ledger ready");
            }
            result = LedgerTick::BecameActive;
        }

        if self.readiness != Readiness::Active {
            return result;
        }

        if self.value != self.last_persisted {
            if self.persistence {
                store.set_bytes(&self.name, &encode_decimal(self.value));
            }
            self.last_persisted = self.value;
            debug!(currency = %self.name, value = %self.value, "value updated");
            if result == LedgerTick::Idle {
                result = LedgerTick::Changed;
            }
        }

        result
    }

    /// Set the value back to the configured default
    pub fn reset(&mut self) {
        self.value = self.default_value;
    }

    /// Apply one saturating mutation
    pub fn effect(&mut self, action: MoneyAction, amount: Decimal) {
        self.value = action.apply(self.value, amount);
    }
}
