//! Packet header.
//!
//! ```text
//! packet = [flags: u8][payload_len: varint][payload]
//! flags  = 0b0000_000K    K = key phase
//! ```
//!
//! Before keys exist the payload is plain frames; afterwards it is one AEAD
//! record.

use super::error::TransportError;
use crate::codec::varint;
use crate::core::{MAX_PACKET_PAYLOAD, PACKET_FLAG_KEY_PHASE};

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Key phase bit of the record in this packet.
    pub key_phase: bool,
    /// Payload length in bytes.
    pub payload_len: usize,
}

impl PacketHeader {
    /// Append the header to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), TransportError> {
        if self.payload_len > MAX_PACKET_PAYLOAD {
            return Err(TransportError::PacketTooLarge(self.payload_len as u64));
        }
        buf.push(if self.key_phase { PACKET_FLAG_KEY_PHASE } else { 0 });
        varint::encode(self.payload_len as u64, buf)
            .map_err(|_| TransportError::PacketTooLarge(self.payload_len as u64))?;
        Ok(())
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns the header and its encoded length, or `None` if more bytes
    /// are needed.
    pub fn parse(buf: &[u8]) -> Result<Option<(PacketHeader, usize)>, TransportError> {
        let Some((&flags, rest)) = buf.split_first() else {
            return Ok(None);
        };
        if flags & !PACKET_FLAG_KEY_PHASE != 0 {
            return Err(TransportError::InvalidHeader(flags));
        }
        let Some(&first) = rest.first() else {
            return Ok(None);
        };
        if rest.len() < varint::decoded_size(first) {
            return Ok(None);
        }
        let (payload_len, used) = varint::decode(rest)
            .map_err(|_| TransportError::InvalidHeader(flags))?;
        if payload_len > MAX_PACKET_PAYLOAD as u64 {
            return Err(TransportError::PacketTooLarge(payload_len));
        }
        let header = PacketHeader {
            key_phase: flags & PACKET_FLAG_KEY_PHASE != 0,
            payload_len: payload_len as usize,
        };
        Ok(Some((header, 1 + used)))
    }
}

/// One packet: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Header.
    pub header: PacketHeader,
    /// Payload bytes (plain frames or one sealed record).
    pub payload: Vec<u8>,
}

impl Packet {
    /// Wrap a payload.
    pub fn new(key_phase: bool, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                key_phase,
                payload_len: payload.len(),
            },
            payload,
        }
    }

    /// Serialize header and payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::with_capacity(self.payload.len() + 9);
        self.header.encode(&mut buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}
