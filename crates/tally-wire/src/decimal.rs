//! Decimal block codec
//!
//! A decimal block is 16 bytes, four little-endian 32-bit words:
//! - Word 0: mantissa bits 0-31
//! - Word 1: mantissa bits 32-63
//! - Word 2: mantissa bits 64-95
//! - Word 3: flags (bits 16-23 = scale 0-28, bit 31 = sign, rest zero)
//!
//! A decimal array is a u32 LE count followed by `count` blocks.

use tally_core::{Decimal, TallyError, TallyResult};

/// Size of one encoded decimal
pub const DECIMAL_SIZE: usize = 16;

/// Size of the array count prefix
pub const COUNT_SIZE: usize = 4;

/// Largest scale a decimal may carry
pub const MAX_SCALE: u32 = 28;

const SCALE_SHIFT: u32 = 16;
const SCALE_MASK: u32 = 0x00FF_0000;
const SIGN_MASK: u32 = 0x8000_0000;

/// Encode one decimal into its 16-byte block
pub fn encode_decimal(value: Decimal) -> [u8; DECIMAL_SIZE] {
    let mantissa = value.mantissa().unsigned_abs();
    let lo = mantissa as u32;
    let mid = (mantissa >> 32) as u32;
    let hi = (mantissa >> 64) as u32;

    let mut flags = value.scale() << SCALE_SHIFT;
    if value.is_sign_negative() {
        flags |= SIGN_MASK;
    }

    let mut buf = [0u8; DECIMAL_SIZE];
    buf[0..4].copy_from_slice(&lo.to_le_bytes());
    buf[4..8].copy_from_slice(&mid.to_le_bytes());
    buf[8..12].copy_from_slice(&hi.to_le_bytes());
    buf[12..16].copy_from_slice(&flags.to_le_bytes());
    buf
}

/// Decode one decimal block. The input must be exactly 16 bytes.
pub fn decode_decimal(buf: &[u8]) -> TallyResult<Decimal> {
    if buf.len() != DECIMAL_SIZE {
        return Err(TallyError::MalformedDecimal { len: buf.len() });
    }

    let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
    let lo = word(0);
    let mid = word(4);
    let hi = word(8);
    let flags = word(12);

    let scale = (flags & SCALE_MASK) >> SCALE_SHIFT;
    if flags & !(SCALE_MASK | SIGN_MASK) != 0 || scale > MAX_SCALE {
        return Err(TallyError::InvalidDecimalFlags(flags));
    }

    Ok(Decimal::from_parts(lo, mid, hi, flags & SIGN_MASK != 0, scale))
}

/// Encode a decimal array: u32 LE count followed by the blocks
pub fn encode_decimals(values: &[Decimal]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(COUNT_SIZE + values.len() * DECIMAL_SIZE);
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        buf.extend_from_slice(&encode_decimal(*value));
    }
    buf
}

/// Decode a decimal array, sized by its leading count
///
/// The count prefix is trusted: bytes after the last counted block are
/// ignored rather than rejected. A count that reaches past the end of the
/// buffer is reported as `BufferTooShort`.
pub fn decode_decimals(buf: &[u8]) -> TallyResult<Vec<Decimal>> {
    if buf.len() < COUNT_SIZE {
        return Err(TallyError::BufferTooShort {
            expected: COUNT_SIZE,
            actual: buf.len(),
        });
    }

    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected = count
        .saturating_mul(DECIMAL_SIZE)
        .saturating_add(COUNT_SIZE);
    if buf.len() < expected {
        return Err(TallyError::BufferTooShort {
            expected,
            actual: buf.len(),
        });
    }

    buf[COUNT_SIZE..expected]
        .chunks_exact(DECIMAL_SIZE)
        .map(decode_decimal)
        .collect()
}
