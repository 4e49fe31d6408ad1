//! Byte-level helpers for handshake messages.

use crate::codec::varint;
use crate::core::VarintError;

pub(crate) fn put_vec(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), VarintError> {
    varint::encode(bytes.len() as u64, buf)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

pub(crate) fn take_varint(cursor: &mut &[u8]) -> Option<u64> {
    varint::read(cursor).ok()
}

pub(crate) fn take_u8(cursor: &mut &[u8]) -> Option<u8> {
    let (&first, rest) = cursor.split_first()?;
    *cursor = rest;
    Some(first)
}

pub(crate) fn take_vec<'a>(cursor: &mut &'a [u8]) -> Option<&'a [u8]> {
    let mut peek = *cursor;
    let len = usize::try_from(varint::read(&mut peek).ok()?).ok()?;
    if peek.len() < len {
        return None;
    }
    let (bytes, rest) = peek.split_at(len);
    *cursor = rest;
    Some(bytes)
}

pub(crate) fn take_array<const N: usize>(cursor: &mut &[u8]) -> Option<[u8; N]> {
    if cursor.len() < N {
        return None;
    }
    let (bytes, rest) = cursor.split_at(N);
    *cursor = rest;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_vec_leaves_cursor_on_short_input() {
        let bytes = [0x05, 1, 2];
        let mut cursor = &bytes[..];
        assert!(take_vec(&mut cursor).is_none());
        assert_eq!(cursor.len(), 3);
    }

    #[test]
    fn test_vec_and_array() {
        let mut buf = Vec::new();
        put_vec(&mut buf, b"abc").unwrap();
        buf.extend_from_slice(&[9, 8]);
        let mut cursor = &buf[..];
        assert_eq!(take_vec(&mut cursor), Some(&b"abc"[..]));
        assert_eq!(take_array::<2>(&mut cursor), Some([9, 8]));
        assert!(cursor.is_empty());
    }
}
