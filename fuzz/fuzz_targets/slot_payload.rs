#![no_main]

use libfuzzer_sys::fuzz_target;
use tally_wire::SlotPayload;

fuzz_target!(|data: &[u8]| {
    if let Ok(payload) = SlotPayload::decode(data) {
        let _ = payload.raw_values();
        // Anything that decoded must encode again
        let encoded = payload.encode().expect("decoded payload re-encodes");
        let again = SlotPayload::decode(&encoded).expect("re-encoded payload decodes");
        assert_eq!(again.names, payload.names);
        assert_eq!(again.raw, payload.raw);
    }
});
