#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tally_core::{Precision, SlotIndex};
use tally_state::ReplicationSlot;
use tally_wire::SlotPayload;

#[derive(Debug, Arbitrary)]
struct Update {
    names: Vec<String>,
    display: Vec<f64>,
    raw: Vec<u8>,
    probe: String,
}

fuzz_target!(|update: Update| {
    let mut slot = ReplicationSlot::new(SlotIndex(0), 0.001);
    let payload = SlotPayload {
        names: update.names,
        display: update.display,
        raw: update.raw,
    };
    let _ = slot.on_remote_update(&payload);
    let _ = slot.read(&update.probe, Precision::Raw);
    let _ = slot.read(&update.probe, Precision::Display);
});
