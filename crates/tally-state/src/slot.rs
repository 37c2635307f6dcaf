//! Replication slot - one pool position mirroring one peer's currencies
//!
//! The owning peer publishes its snapshot through the slot; every other
//! peer reads the last snapshot it received. A slot with no explicit owner
//! belongs to the session authority as a placeholder.

use tally_core::{
    from_f64, to_f64, Decimal, PeerId, Precision, SlotIndex, TallyError, TallyResult,
};
use tally_wire::SlotPayload;
use tracing::{debug, error, trace};

/// All currency values as seen by the local peer at one instant
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalSnapshot {
    pub names: Vec<String>,
    pub values: Vec<Decimal>,
}

impl LocalSnapshot {
    pub fn new(names: Vec<String>, values: Vec<Decimal>) -> Self {
        LocalSnapshot { names, values }
    }
}

/// Decoded snapshot of a remote owner
#[derive(Clone, Debug, Default, PartialEq)]
struct RemoteCache {
    names: Vec<String>,
    display: Vec<f64>,
    values: Vec<Decimal>,
}

/// One replication unit of the fixed pool
#[derive(Debug)]
pub struct ReplicationSlot {
    index: SlotIndex,
    owner: Option<PeerId>,
    tolerance: f64,
    /// `tolerance` in full precision, used for the dirty check
    threshold: Decimal,
    /// Fields as last published by this peer while owning the slot
    published: SlotPayload,
    /// Full-precision values at last broadcast, for dirty comparison
    last_broadcast: Option<Vec<Decimal>>,
    /// Last snapshot received from the owner
    remote: Option<RemoteCache>,
}

impl ReplicationSlot {
    pub fn new(index: SlotIndex, tolerance: f64) -> Self {
        let tolerance = tolerance.max(0.0);
        ReplicationSlot {
            index,
            owner: None,
            tolerance,
            threshold: tolerance_threshold(tolerance),
            published: SlotPayload::empty(),
            last_broadcast: None,
            remote: None,
        }
    }

    pub fn index(&self) -> SlotIndex {
        self.index
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Explicit owner, `None` while unassigned
    pub fn owner(&self) -> Option<PeerId> {
        self.owner
    }

    /// Owner with the authority standing in for an unassigned slot
    pub fn effective_owner(&self, authority: PeerId) -> PeerId {
        self.owner.unwrap_or(authority)
    }

    pub fn is_owned_by(&self, peer: PeerId, authority: PeerId) -> bool {
        self.effective_owner(authority) == peer
    }

    /// Record a confirmed ownership change. Returns true when the owner moved.
    ///
    /// Data of the former owner is dropped so readers never attribute it to
    /// the new one.
    pub fn set_owner(&mut self, owner: PeerId) -> bool {
        if self.owner == Some(owner) {
            return false;
        }
        debug!(slot = %self.index, from = ?self.owner, to = %owner, "slot owner changed");
        self.owner = Some(owner);
        self.clear();
        true
    }

    /// Drop every cached name and value
    pub fn clear(&mut self) {
        self.published = SlotPayload::empty();
        self.last_broadcast = None;
        self.remote = None;
    }

    /// Decide whether an ownership request for this slot may proceed
    pub fn approve_ownership_request(
        &self,
        requester: PeerId,
        requester_is_authority: bool,
    ) -> TallyResult<()> {
        if requester_is_authority {
            return Ok(());
        }
        error!(slot = %self.index, requester = %requester, "rejected ownership request from non-authority");
        Err(TallyError::OwnershipDenied {
            requester,
            slot: self.index,
        })
    }

    /// Fields as last published by the local owner
    pub fn published(&self) -> &SlotPayload {
        &self.published
    }

    /// Re-evaluate the local snapshot and publish it when dirty
    ///
    /// A no-op unless `local` owns the slot. The snapshot is dirty when any
    /// value moved by more than the tolerance since the last broadcast, or
    /// the name list changed. Returns the payload to replicate.
    pub fn refresh_if_owner(
        &mut self,
        local: PeerId,
        authority: PeerId,
        snapshot: &LocalSnapshot,
        force: bool,
    ) -> Option<SlotPayload> {
        if !self.is_owned_by(local, authority) {
            return None;
        }

        let dirty = match &self.last_broadcast {
            None => true,
            Some(last) => {
                last.len() != snapshot.values.len()
                    || self.published.names != snapshot.names
                    || last.iter().zip(&snapshot.values).any(|(prev, now)| {
                        now.checked_sub(*prev)
                            .map_or(true, |delta| delta.abs() > self.threshold)
                    })
            }
        };

        if !dirty && !force {
            trace!(slot = %self.index, "snapshot within tolerance");
            return None;
        }

        let display: Vec<f64> = snapshot.values.iter().map(|v| to_f64(*v)).collect();
        self.published =
            SlotPayload::from_values(snapshot.names.clone(), display, &snapshot.values);
        self.last_broadcast = Some(snapshot.values.clone());
        debug!(slot = %self.index, currencies = snapshot.names.len(), force, "publishing snapshot");
        Some(self.published.clone())
    }

    /// Accept a snapshot replicated by the owner
    ///
    /// The update is applied whole or not at all: a malformed payload leaves
    /// the previous cache untouched.
    pub fn on_remote_update(&mut self, payload: &SlotPayload) -> TallyResult<()> {
        let values = payload.raw_values()?;

        if payload.names.len() != values.len() {
            return Err(TallyError::MalformedSnapshot {
                names: payload.names.len(),
                values: values.len(),
            });
        }
        if payload.names.len() != payload.display.len() {
            return Err(TallyError::MalformedSnapshot {
                names: payload.names.len(),
                values: payload.display.len(),
            });
        }

        self.remote = Some(RemoteCache {
            names: payload.names.clone(),
            display: payload.display.clone(),
            values,
        });
        trace!(slot = %self.index, "remote snapshot applied");
        Ok(())
    }

    pub fn has_remote_data(&self) -> bool {
        self.remote.is_some()
    }

    /// Names carried by the last received snapshot
    pub fn remote_names(&self) -> &[String] {
        self.remote
            .as_ref()
            .map(|r| r.names.as_slice())
            .unwrap_or(&[])
    }

    /// Read a currency from the last received snapshot. Missing data reads 0.
    pub fn read(&self, currency: &str, precision: Precision) -> Decimal {
        let Some(remote) = &self.remote else {
            return Decimal::ZERO;
        };
        if remote.names.len() != remote.values.len() || remote.names.len() != remote.display.len() {
            return Decimal::ZERO;
        }
        let Some(i) = remote.names.iter().position(|n| n == currency) else {
            return Decimal::ZERO;
        };
        match precision {
            Precision::Raw => remote.values[i],
            Precision::Display => from_f64(remote.display[i]),
        }
    }
}

/// Decimal form of a tolerance as written, so 0.001 compares as 0.001
fn tolerance_threshold(tolerance: f64) -> Decimal {
    tolerance
        .to_string()
        .parse::<Decimal>()
        .unwrap_or_else(|_| from_f64(tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHORITY: PeerId = PeerId(1);
    const ALICE: PeerId = PeerId(2);

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn snapshot(pairs: &[(&str, &str)]) -> LocalSnapshot {
        LocalSnapshot::new(
            pairs.iter().map(|(n, _)| n.to_string()).collect(),
            pairs.iter().map(|(_, v)| dec(v)).collect(),
        )
    }

    fn owned_slot(tolerance: f64) -> ReplicationSlot {
        let mut slot = ReplicationSlot::new(SlotIndex(0), tolerance);
        slot.set_owner(ALICE);
        slot
    }

    #[test]
    fn test_unassigned_slot_belongs_to_authority() {
        let slot = ReplicationSlot::new(SlotIndex(3), 0.0);
        assert_eq!(slot.owner(), None);
        assert!(slot.is_owned_by(AUTHORITY, AUTHORITY));
        assert!(!slot.is_owned_by(ALICE, AUTHORITY));
    }

    #[test]
    fn test_refresh_requires_ownership() {
        let mut slot = owned_slot(0.001);
        let snap = snapshot(&[("points", "100")]);
        assert!(slot.refresh_if_owner(AUTHORITY, AUTHORITY, &snap, true).is_none());
        assert!(slot.published().is_empty());
    }

    #[test]
    fn test_first_refresh_always_publishes() {
        let mut slot = owned_slot(0.001);
        let payload = slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100")]), false)
            .unwrap();
        assert_eq!(payload.names, vec!["points".to_string()]);
        assert_eq!(payload.display, vec![100.0]);
    }

    #[test]
    fn test_points_scenario() {
        let mut slot = owned_slot(0.001);
        slot.refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100")]), false)
            .unwrap();

        let payload = slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "150")]), false)
            .expect("delta of 50 exceeds tolerance");
        assert_eq!(payload.raw.len(), 4 + 16);
        assert_eq!(payload.raw_values().unwrap(), vec![dec("150")]);
    }

    #[test]
    fn test_tolerance_boundary() {
        let mut slot = owned_slot(0.25);
        slot.refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100")]), false)
            .unwrap();

        // Exactly the tolerance: not dirty
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100.25")]), false)
            .is_none());
        // Beyond the tolerance from the last broadcast (100): dirty
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100.5")]), false)
            .is_some());
    }

    #[test]
    fn test_tolerance_boundary_not_binary_exact() {
        let mut slot = owned_slot(0.001);
        slot.refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100")]), false)
            .unwrap();

        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100.001")]), false)
            .is_none());
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "100.0011")]), false)
            .is_some());
    }

    #[test]
    fn test_threshold_keeps_written_tolerance() {
        assert_eq!(tolerance_threshold(0.001), dec("0.001"));
        assert_eq!(tolerance_threshold(0.0), Decimal::ZERO);
        assert_eq!(ReplicationSlot::new(SlotIndex(0), -1.0).tolerance(), 0.0);
    }

    #[test]
    fn test_extreme_swing_is_dirty() {
        let mut slot = owned_slot(0.001);
        let max = tally_core::money_max().to_string();
        let min = tally_core::money_min().to_string();
        slot.refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", max.as_str())]), false)
            .unwrap();
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", min.as_str())]), false)
            .is_some());
    }

    #[test]
    fn test_small_steps_accumulate() {
        let mut slot = owned_slot(0.5);
        slot.refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "10")]), false)
            .unwrap();
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "10.25")]), false)
            .is_none());
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "10.5")]), false)
            .is_none());
        assert!(slot
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "10.75")]), false)
            .is_some());
    }

    #[test]
    fn test_name_change_is_dirty() {
        let mut slot = owned_slot(1000.0);
        slot.refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "1")]), false)
            .unwrap();
        assert!(slot
            .refresh_if_owner(
                ALICE,
                AUTHORITY,
                &snapshot(&[("points", "1"), ("gems", "0")]),
                false
            )
            .is_some());
    }

    #[test]
    fn test_force_publishes_clean_snapshot() {
        let mut slot = owned_slot(0.001);
        let snap = snapshot(&[("points", "1")]);
        slot.refresh_if_owner(ALICE, AUTHORITY, &snap, false).unwrap();
        assert!(slot.refresh_if_owner(ALICE, AUTHORITY, &snap, false).is_none());
        assert!(slot.refresh_if_owner(ALICE, AUTHORITY, &snap, true).is_some());
    }

    #[test]
    fn test_read_before_data() {
        let slot = ReplicationSlot::new(SlotIndex(0), 0.0);
        assert_eq!(slot.read("points", Precision::Raw), Decimal::ZERO);
        assert_eq!(slot.read("points", Precision::Display), Decimal::ZERO);
    }

    #[test]
    fn test_remote_update_and_read() {
        let mut owner = owned_slot(0.001);
        let payload = owner
            .refresh_if_owner(ALICE, AUTHORITY, &snapshot(&[("points", "0.1"), ("gems", "3")]), false)
            .unwrap();

        let mut mirror = ReplicationSlot::new(SlotIndex(0), 0.001);
        mirror.set_owner(ALICE);
        mirror.on_remote_update(&payload).unwrap();

        assert_eq!(mirror.read("points", Precision::Raw), dec("0.1"));
        assert_eq!(mirror.read("gems", Precision::Display), dec("3"));
        assert_eq!(mirror.read("unknown", Precision::Raw), Decimal::ZERO);
        assert_eq!(mirror.remote_names().len(), 2);
    }

    #[test]
    fn test_mismatched_snapshot_keeps_cache() {
        let mut slot = ReplicationSlot::new(SlotIndex(0), 0.001);
        let good = SlotPayload::from_values(vec!["points".into()], vec![5.0], &[dec("5")]);
        slot.on_remote_update(&good).unwrap();

        let bad = SlotPayload::from_values(
            vec!["a".into(), "b".into()],
            vec![1.0, 2.0],
            &[dec("1"), dec("2"), dec("3")],
        );
        assert_eq!(
            slot.on_remote_update(&bad),
            Err(TallyError::MalformedSnapshot {
                names: 2,
                values: 3
            })
        );
        assert_eq!(slot.read("points", Precision::Raw), dec("5"));
        assert_eq!(slot.read("a", Precision::Raw), Decimal::ZERO);
    }

    #[test]
    fn test_truncated_raw_keeps_cache() {
        let mut slot = ReplicationSlot::new(SlotIndex(0), 0.001);
        let good = SlotPayload::from_values(vec!["points".into()], vec![5.0], &[dec("5")]);
        slot.on_remote_update(&good).unwrap();

        let mut bad = good.clone();
        bad.raw.truncate(10);
        assert!(matches!(
            slot.on_remote_update(&bad),
            Err(TallyError::BufferTooShort { .. })
        ));
        assert_eq!(slot.read("points", Precision::Raw), dec("5"));
    }

    #[test]
    fn test_owner_change_clears_data() {
        let mut slot = ReplicationSlot::new(SlotIndex(0), 0.001);
        let payload = SlotPayload::from_values(vec!["points".into()], vec![5.0], &[dec("5")]);
        slot.on_remote_update(&payload).unwrap();

        assert!(slot.set_owner(ALICE));
        assert!(!slot.has_remote_data());
        assert!(!slot.set_owner(ALICE));
    }

    #[test]
    fn test_ownership_request_arbitration() {
        let slot = ReplicationSlot::new(SlotIndex(4), 0.0);
        assert!(slot.approve_ownership_request(AUTHORITY, true).is_ok());
        assert_eq!(
            slot.approve_ownership_request(ALICE, false),
            Err(TallyError::OwnershipDenied {
                requester: ALICE,
                slot: SlotIndex(4)
            })
        );
    }
}
