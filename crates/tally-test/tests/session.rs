//! End-to-end session tests over the simulator

use tally_core::{Decimal, MoneyAction, PeerId, Precision, SlotIndex};
use tally_runtime::{CurrencyConfig, SessionConfig};
use tally_state::PlayerStore;
use tally_test::{ScenarioConfig, ScenarioRunner, SessionSimulator};
use tally_wire::{encode_decimal, SlotPayload};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn session(pool: usize, currencies: Vec<CurrencyConfig>) -> SessionConfig {
    SessionConfig {
        currencies,
        pool_size: pool,
        ..Default::default()
    }
}

fn points(pool: usize) -> SessionConfig {
    session(pool, vec![CurrencyConfig::new("points", 0.0)])
}

#[test]
fn test_points_scenario() {
    let mut sim = SessionSimulator::new(points(8));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    let c = sim.join().unwrap();
    sim.run(4);

    sim.node_mut(a)
        .unwrap()
        .apply_effect(MoneyAction::Add, dec("10"), &["points"])
        .unwrap();
    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("99.5"), &["points"])
        .unwrap();
    sim.node_mut(c)
        .unwrap()
        .apply_effect(MoneyAction::Subtract, dec("3"), &["points"])
        .unwrap();
    sim.run(2);

    assert!(sim.converged("points"), "{:?}", sim.divergences("points"));
    let view = sim.node(c).unwrap();
    assert_eq!(view.get_peer_value(a, "points", Precision::Raw), dec("10"));
    assert_eq!(view.get_peer_value(b, "points", Precision::Raw), dec("99.5"));
    assert_eq!(view.get_peer_value(c, "points", Precision::Raw), dec("-3"));
}

#[test]
fn test_multiple_currencies_converge() {
    let mut sim = SessionSimulator::new(session(
        4,
        vec![
            CurrencyConfig::new("points", 100.0),
            CurrencyConfig::new("tokens", 5.0).without_persistence(),
        ],
    ));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    sim.run(4);

    sim.node_mut(b)
        .unwrap()
        .apply_effect_all(MoneyAction::Multiply, dec("2"));
    sim.run(2);

    let view = sim.node(a).unwrap();
    assert_eq!(view.get_peer_value(b, "points", Precision::Raw), dec("200"));
    assert_eq!(view.get_peer_value(b, "tokens", Precision::Raw), dec("10"));
    assert_eq!(view.get_peer_value(b, "gold", Precision::Raw), Decimal::ZERO);
}

#[test]
fn test_display_precision_read() {
    let mut sim = SessionSimulator::new(points(4));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    sim.run(4);

    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("2.5"), &["points"])
        .unwrap();
    sim.run(2);

    let view = sim.node(a).unwrap();
    assert_eq!(view.get_peer_value(b, "points", Precision::Raw), dec("2.5"));
    assert_eq!(view.get_peer_value(b, "points", Precision::Display), dec("2.5"));
}

#[test]
fn test_undersized_pool() {
    let mut sim = SessionSimulator::new(points(2));
    let a = sim.join().unwrap();
    let _b = sim.join().unwrap();
    let c = sim.join().unwrap();
    sim.run(4);

    let authority = sim.node(a).unwrap();
    assert!(authority.stats().allocation_errors > 0);
    assert!(!sim.slots_unique());

    // The unslotted peer reads as 0 to everyone else
    sim.node_mut(c)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("5"), &["points"])
        .unwrap();
    sim.run(2);
    assert_eq!(
        sim.node(a).unwrap().get_peer_value(c, "points", Precision::Raw),
        Decimal::ZERO
    );
}

#[test]
fn test_departed_slot_reused() {
    let mut sim = SessionSimulator::new(points(3));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    sim.run(4);
    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("50"), &["points"])
        .unwrap();
    sim.run(2);

    sim.leave(b);
    sim.run(2);
    let c = sim.join().unwrap();
    sim.run(4);

    assert!(sim.slots_unique());
    assert!(sim.converged("points"));
    // The newcomer never inherits the former owner's value
    assert_eq!(
        sim.node(a).unwrap().get_peer_value(c, "points", Precision::Raw),
        Decimal::ZERO
    );
}

#[test]
fn test_authority_handover() {
    let mut sim = SessionSimulator::new(points(4));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    let c = sim.join().unwrap();
    sim.run(4);
    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("7"), &["points"])
        .unwrap();
    sim.run(2);

    sim.leave(a);
    sim.run(4);

    assert_eq!(sim.authority(), Some(b));
    assert!(sim.node(b).unwrap().is_authority());
    assert!(sim.converged("points"));

    // The new authority keeps allocating
    let d = sim.join().unwrap();
    sim.run(4);
    assert!(sim.slots_unique());
    sim.node_mut(d)
        .unwrap()
        .apply_effect(MoneyAction::Add, dec("12"), &["points"])
        .unwrap();
    sim.run(2);
    assert_eq!(
        sim.node(c).unwrap().get_peer_value(d, "points", Precision::Raw),
        dec("12")
    );
}

#[test]
fn test_persistence_across_visits() {
    let mut sim = SessionSimulator::new(points(4));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    sim.run(4);
    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("321.5"), &["points"])
        .unwrap();
    sim.run(2);
    sim.leave(b);

    sim.join_as(b).unwrap();
    sim.run(4);

    assert_eq!(sim.node(b).unwrap().get_value("points"), dec("321.5"));
    assert_eq!(
        sim.node(a).unwrap().get_peer_value(b, "points", Precision::Raw),
        dec("321.5")
    );
}

#[test]
fn test_stored_value_restored_on_first_visit() {
    let mut sim = SessionSimulator::new(points(4));
    let mut store = sim.store(PeerId(9));
    store.set_bytes("points", &encode_decimal(dec("1000")));

    sim.join_as(PeerId(9)).unwrap();
    sim.run(2);
    assert_eq!(sim.node(PeerId(9)).unwrap().get_value("points"), dec("1000"));
}

#[test]
fn test_non_persistent_currency_resets() {
    let mut sim = SessionSimulator::new(session(
        4,
        vec![CurrencyConfig::new("tokens", 5.0).without_persistence()],
    ));
    let a = sim.join().unwrap();
    sim.run(2);
    sim.node_mut(a)
        .unwrap()
        .apply_effect(MoneyAction::Add, dec("1"), &["tokens"])
        .unwrap();
    sim.run(2);
    sim.leave(a);

    sim.join_as(a).unwrap();
    sim.run(2);
    assert_eq!(sim.node(a).unwrap().get_value("tokens"), dec("5"));
}

#[test]
fn test_malformed_snapshot_keeps_previous() {
    let mut sim = SessionSimulator::new(points(4));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    sim.run(4);
    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("8"), &["points"])
        .unwrap();
    sim.run(2);

    let slot = sim
        .node(a)
        .unwrap()
        .registry()
        .slot_owned_by(b, a)
        .map(|s| s.index())
        .unwrap_or(SlotIndex(0));
    let bad = SlotPayload::from_values(
        vec!["points".into(), "extra".into()],
        vec![1.0, 2.0],
        &[dec("1"), dec("2"), dec("3")],
    );
    let node = sim.node_mut(a).unwrap();
    node.on_remote_update(slot, &bad);

    assert_eq!(node.stats().malformed_updates, 1);
    assert_eq!(node.get_peer_value(b, "points", Precision::Raw), dec("8"));
}

#[test]
fn test_empty_currency_name_degrades_alone() {
    let mut sim = SessionSimulator::new(session(
        4,
        vec![CurrencyConfig::new("", 0.0), CurrencyConfig::new("points", 0.0)],
    ));
    let a = sim.join().unwrap();
    let b = sim.join().unwrap();
    sim.run(4);
    sim.node_mut(b)
        .unwrap()
        .apply_effect(MoneyAction::Set, dec("4"), &["points"])
        .unwrap();
    sim.run(2);

    let view = sim.node(a).unwrap();
    assert_eq!(view.currency_names(), &["points".to_string()]);
    assert_eq!(view.get_peer_value(b, "points", Precision::Raw), dec("4"));
}

#[test]
fn test_stable_scenarios_converge() {
    for seed in [1, 2, 3] {
        let config = ScenarioConfig {
            seed,
            ..ScenarioConfig::stable()
        };
        let report = ScenarioRunner::new(config, points(16)).run().unwrap();
        assert!(report.passed(), "seed {}: {:?}", seed, report.divergences);
    }
}

#[test]
fn test_churning_scenarios_converge() {
    for seed in [11, 12, 13] {
        let config = ScenarioConfig {
            seed,
            ..ScenarioConfig::churning()
        };
        let report = ScenarioRunner::new(config, points(16)).run().unwrap();
        assert!(report.passed(), "seed {}: {:?}", seed, report.divergences);
        assert!(report.leaves > 0);
    }
}
