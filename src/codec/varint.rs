//! QUIC-style variable-length integers.
//!
//! The two most significant bits of the first byte select the length class:
//!
//! ```text
//! 00 -> 1 byte  (6 usable bits)
//! 01 -> 2 bytes (14 usable bits)
//! 10 -> 4 bytes (30 usable bits)
//! 11 -> 8 bytes (62 usable bits)
//! ```
//!
//! The remaining bits hold the value big-endian. Encoding always picks the
//! shortest class that fits.

use crate::core::{VARINT_MAX, VarintError};

const MAX_1: u64 = (1 << 6) - 1;
const MAX_2: u64 = (1 << 14) - 1;
const MAX_4: u64 = (1 << 30) - 1;

/// Encoded length of `value`, or `OutOfRange` if it needs more than 62 bits.
pub fn encoded_size(value: u64) -> Result<usize, VarintError> {
    match value {
        0..=MAX_1 => Ok(1),
        0..=MAX_2 => Ok(2),
        0..=MAX_4 => Ok(4),
        0..=VARINT_MAX => Ok(8),
        _ => Err(VarintError::OutOfRange(value)),
    }
}

/// Total encoded length announced by a leading byte: `1 << (first >> 6)`.
pub fn decoded_size(first_byte: u8) -> usize {
    1 << (first_byte >> 6)
}

/// Append the minimal encoding of `value` to `buf`.
pub fn encode(value: u64, buf: &mut Vec<u8>) -> Result<(), VarintError> {
    match encoded_size(value)? {
        1 => buf.push(value as u8),
        2 => buf.extend_from_slice(&(value as u16 | 0x4000).to_be_bytes()),
        4 => buf.extend_from_slice(&(value as u32 | 0x8000_0000).to_be_bytes()),
        _ => buf.extend_from_slice(&(value | 0xC000_0000_0000_0000).to_be_bytes()),
    }
    Ok(())
}

/// Encode `value` into a fresh buffer.
pub fn encode_to_vec(value: u64) -> Result<Vec<u8>, VarintError> {
    let mut buf = Vec::with_capacity(8);
    encode(value, &mut buf)?;
    Ok(buf)
}

/// Decode a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let first = *buf.first().ok_or(VarintError::Truncated {
        needed: 1,
        available: 0,
    })?;
    let size = decoded_size(first);
    if buf.len() < size {
        return Err(VarintError::Truncated {
            needed: size,
            available: buf.len(),
        });
    }

    let mut value = u64::from(first & 0x3F);
    for byte in &buf[1..size] {
        value = (value << 8) | u64::from(*byte);
    }
    Ok((value, size))
}

/// Decode a varint and advance the cursor past it.
///
/// On error the cursor is left untouched.
pub fn read(cursor: &mut &[u8]) -> Result<u64, VarintError> {
    let (value, used) = decode(cursor)?;
    *cursor = &cursor[used..];
    Ok(value)
}

/// Encoded size of a varint-length-prefixed vector holding `length` bytes.
pub fn encoded_size_of_vector(length: usize) -> Result<usize, VarintError> {
    Ok(encoded_size(length as u64)? + length)
}

/// Largest vector length whose prefixed encoding fits in `budget` bytes.
pub fn max_vector_size_encodable(budget: usize) -> usize {
    [(1usize, MAX_1), (2, MAX_2), (4, MAX_4), (8, VARINT_MAX)]
        .iter()
        .filter(|(prefix, _)| budget >= *prefix)
        .map(|(prefix, class_max)| ((budget - prefix) as u64).min(*class_max) as usize)
        .max()
        .unwrap_or(0)
}
