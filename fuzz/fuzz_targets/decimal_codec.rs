#![no_main]

use libfuzzer_sys::fuzz_target;
use tally_wire::{decode_decimal, decode_decimals, encode_decimal};

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = decode_decimal(data) {
        assert_eq!(decode_decimal(&encode_decimal(value)), Ok(value));
    }
    let _ = decode_decimals(data);
});
