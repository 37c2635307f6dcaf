//! Effect applicators - configured mutations fired by gameplay events
//!
//! An applicator binds one action and amount to a set of target currencies
//! and a source deciding when it fires:
//! - Trigger: a peer touched it; local peer only, then a cooldown
//! - Timer: fires every period, skipping the first firing
//! - Scripted: fired explicitly by game logic
//! - Direct: fires on any activation

use std::fmt;
use std::time::Duration;

use tally_core::{Decimal, MoneyAction, PeerId};
use tally_state::Registry;

/// Cooldown used when a trigger is configured with a negative one
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Applicator identifier within one node
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApplicatorId(pub u32);

impl ApplicatorId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ApplicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Applicator({})", self.0)
    }
}

impl fmt::Display for ApplicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When an applicator fires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectSource {
    Trigger { cooldown: Duration },
    Timer { period: Duration },
    Scripted,
    Direct,
}

impl EffectSource {
    /// Trigger source from a cooldown in seconds; negative or NaN means 5s
    pub fn trigger(cooldown_secs: f64) -> Self {
        let cooldown = if cooldown_secs.is_finite() && cooldown_secs >= 0.0 {
            Duration::from_secs_f64(cooldown_secs)
        } else {
            DEFAULT_COOLDOWN
        };
        EffectSource::Trigger { cooldown }
    }

    pub fn timer(period: Duration) -> Self {
        EffectSource::Timer { period }
    }
}

/// What caused an activation attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// A peer entered the trigger
    Trigger(PeerId),
    /// The timer period elapsed
    Timer,
    /// Game logic fired the applicator
    Script,
}

/// A configured effect
#[derive(Clone, Debug, PartialEq)]
pub struct Applicator {
    pub source: EffectSource,
    pub action: MoneyAction,
    pub amount: Decimal,
    pub targets: Vec<String>,
    /// Refuse unless every target holds at least `amount`
    pub deny_if_not_enough: bool,
    cooling_down: bool,
}

impl Applicator {
    pub fn new(
        source: EffectSource,
        action: MoneyAction,
        amount: Decimal,
        targets: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Applicator {
            source,
            action,
            amount,
            targets: targets.into_iter().map(Into::into).collect(),
            deny_if_not_enough: false,
            cooling_down: false,
        }
    }

    pub fn deny_if_not_enough(mut self) -> Self {
        self.deny_if_not_enough = true;
        self
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooling_down
    }

    pub(crate) fn set_cooling_down(&mut self, cooling: bool) {
        self.cooling_down = cooling;
    }

    /// Whether this activation fires the applicator on `local`
    pub fn accepts(&self, activation: Activation, local: PeerId) -> bool {
        match (self.source, activation) {
            (EffectSource::Direct, _) => true,
            (EffectSource::Trigger { .. }, Activation::Trigger(peer)) => {
                peer == local && !self.cooling_down
            }
            (EffectSource::Timer { .. }, Activation::Timer) => true,
            (EffectSource::Scripted, Activation::Script) => true,
            _ => false,
        }
    }

    /// Every target holds at least `amount`, or the check is disabled
    ///
    /// Unknown targets read 0.
    pub fn is_enough(&self, registry: &Registry) -> bool {
        !self.deny_if_not_enough || self.targets.iter().all(|t| registry.value(t) >= self.amount)
    }
}
