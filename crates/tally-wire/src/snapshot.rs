//! Slot payload - the replicated fields of one replication slot
//!
//! The session substrate replicates three fields per slot: the currency
//! names, their transport-precision values, and the raw decimal array. For
//! substrates that move one opaque buffer per slot, the payload frame is:
//! - u16 name count, then per name: u16 length + UTF-8 bytes
//! - u16 value count, then per value: f64
//! - u32 raw length + raw bytes
//!
//! All integers and floats are little-endian. Pairing names with values is
//! validated by the receiving slot, not here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tally_core::{Decimal, TallyError, TallyResult};

use crate::{decode_decimals, encode_decimals};

/// Maximum number of names or values in one payload
pub const MAX_PAYLOAD_ENTRIES: usize = u16::MAX as usize;

/// Replicated fields of a slot
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlotPayload {
    /// Currency names, paired by index with `display` and `raw`
    pub names: Vec<String>,
    /// Transport-precision values
    pub display: Vec<f64>,
    /// Encoded full-precision decimal array
    pub raw: Vec<u8>,
}

impl SlotPayload {
    /// Build a payload from paired names and full-precision values
    pub fn from_values(names: Vec<String>, display: Vec<f64>, values: &[Decimal]) -> Self {
        SlotPayload {
            names,
            display,
            raw: encode_decimals(values),
        }
    }

    /// Payload that carries nothing (a cleared slot)
    pub fn empty() -> Self {
        SlotPayload::default()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.display.is_empty() && self.raw.is_empty()
    }

    /// Decode the raw decimal array
    pub fn raw_values(&self) -> TallyResult<Vec<Decimal>> {
        decode_decimals(&self.raw)
    }

    /// Size of the encoded frame in bytes
    pub fn encoded_len(&self) -> usize {
        2 + self.names.iter().map(|n| 2 + n.len()).sum::<usize>()
            + 2
            + self.display.len() * 8
            + 4
            + self.raw.len()
    }

    /// Encode into a single frame
    pub fn encode(&self) -> TallyResult<Bytes> {
        if self.names.len() > MAX_PAYLOAD_ENTRIES || self.display.len() > MAX_PAYLOAD_ENTRIES {
            return Err(TallyError::Configuration(format!(
                "payload carries more than {} entries",
                MAX_PAYLOAD_ENTRIES
            )));
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());

        buf.put_u16_le(self.names.len() as u16);
        for name in &self.names {
            if name.len() > u16::MAX as usize {
                return Err(TallyError::Configuration(format!(
                    "currency name of {} bytes is too long",
                    name.len()
                )));
            }
            buf.put_u16_le(name.len() as u16);
            buf.put_slice(name.as_bytes());
        }

        buf.put_u16_le(self.display.len() as u16);
        for value in &self.display {
            buf.put_f64_le(*value);
        }

        buf.put_u32_le(self.raw.len() as u32);
        buf.put_slice(&self.raw);

        Ok(buf.freeze())
    }

    /// Decode a frame produced by [`SlotPayload::encode`]
    pub fn decode(mut buf: &[u8]) -> TallyResult<Self> {
        let total = buf.len();

        need(&buf, 2, total)?;
        let name_count = buf.get_u16_le() as usize;
        let mut names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            need(&buf, 2, total)?;
            let len = buf.get_u16_le() as usize;
            need(&buf, len, total)?;
            let name = std::str::from_utf8(&buf[..len]).map_err(|_| TallyError::InvalidUtf8)?;
            names.push(name.to_owned());
            buf.advance(len);
        }

        need(&buf, 2, total)?;
        let display_count = buf.get_u16_le() as usize;
        need(&buf, display_count * 8, total)?;
        let display = (0..display_count).map(|_| buf.get_f64_le()).collect();

        need(&buf, 4, total)?;
        let raw_len = buf.get_u32_le() as usize;
        need(&buf, raw_len, total)?;
        let raw = buf[..raw_len].to_vec();

        Ok(SlotPayload {
            names,
            display,
            raw,
        })
    }
}

/// Fail with `BufferTooShort` unless `n` more bytes are available
#[inline]
fn need(buf: &&[u8], n: usize, total: usize) -> TallyResult<()> {
    if buf.remaining() < n {
        let consumed = total - buf.remaining();
        return Err(TallyError::BufferTooShort {
            expected: consumed + n,
            actual: total,
        });
    }
    Ok(())
}
