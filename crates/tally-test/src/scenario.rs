//! Randomized session scenarios
//!
//! Drives a `SessionSimulator` with seeded random effects and peer churn,
//! then checks that every peer reads every other peer's value and that no
//! slot is shared.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tally_core::{Decimal, MoneyAction, PeerId, TallyResult};
use tally_runtime::SessionConfig;

use crate::{Divergence, SessionSimulator};

/// Scenario configuration
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// Peers present at the start
    pub initial_peers: usize,
    /// Upper bound on peers present at once
    pub max_peers: usize,
    /// Number of operations to run
    pub op_count: usize,
    /// Probability that an operation is a join or leave
    pub churn_prob: f64,
    /// Ticks to run after the last operation
    pub settle_ticks: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            initial_peers: 4,
            max_peers: 8,
            op_count: 200,
            churn_prob: 0.05,
            settle_ticks: 8,
            seed: 42,
        }
    }
}

impl ScenarioConfig {
    /// Fixed roster, effects only
    pub fn stable() -> Self {
        ScenarioConfig {
            churn_prob: 0.0,
            ..Default::default()
        }
    }

    /// Peers constantly joining and leaving
    pub fn churning() -> Self {
        ScenarioConfig {
            churn_prob: 0.3,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScenarioReport {
    pub effects: usize,
    pub joins: usize,
    pub leaves: usize,
    pub divergences: Vec<Divergence>,
    pub slots_unique: bool,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.divergences.is_empty() && self.slots_unique
    }
}

/// Seeded scenario runner
pub struct ScenarioRunner {
    config: ScenarioConfig,
    rng: StdRng,
    sim: SessionSimulator,
    currency: String,
}

impl ScenarioRunner {
    /// Runner over a session; effects target the first configured currency
    pub fn new(config: ScenarioConfig, session: SessionConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let currency = session
            .currencies
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        ScenarioRunner {
            config,
            rng,
            sim: SessionSimulator::new(session),
            currency,
        }
    }

    pub fn simulator(&self) -> &SessionSimulator {
        &self.sim
    }

    pub fn run(&mut self) -> TallyResult<ScenarioReport> {
        let mut report = ScenarioReport::default();

        for _ in 0..self.config.initial_peers {
            self.sim.join()?;
            report.joins += 1;
        }
        self.sim.run(2);

        for _ in 0..self.config.op_count {
            if self.rng.gen_bool(self.config.churn_prob) {
                self.churn(&mut report)?;
            } else {
                self.random_effect()?;
                report.effects += 1;
            }
            self.sim.step();
        }

        self.sim.run(self.config.settle_ticks);
        report.divergences = self.sim.divergences(&self.currency);
        report.slots_unique = self.sim.slots_unique();
        Ok(report)
    }

    fn churn(&mut self, report: &mut ScenarioReport) -> TallyResult<()> {
        let peers = self.sim.peers().len();
        let leave = peers > 1 && (peers >= self.config.max_peers || self.rng.gen_bool(0.5));
        if leave {
            let peer = self.pick_peer();
            self.sim.leave(peer);
            report.leaves += 1;
        } else {
            self.sim.join()?;
            report.joins += 1;
        }
        Ok(())
    }

    fn random_effect(&mut self) -> TallyResult<()> {
        if self.sim.peers().is_empty() {
            return Ok(());
        }
        let peer = self.pick_peer();
        // Integral amounts keep every change above the sync tolerance
        let amount = Decimal::from(self.rng.gen_range(1i64..1000));
        let action = match self.rng.gen_range(0..3) {
            0 => MoneyAction::Add,
            1 => MoneyAction::Subtract,
            _ => MoneyAction::Set,
        };
        let currency = [self.currency.as_str()];
        match self.sim.node_mut(peer) {
            Some(node) => node.apply_effect(action, amount, &currency),
            None => Ok(()),
        }
    }

    fn pick_peer(&mut self) -> PeerId {
        let peers = self.sim.peers();
        peers[self.rng.gen_range(0..peers.len())]
    }
}
