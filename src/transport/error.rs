//! Transport layer error types.

use std::io;

use thiserror::Error;

/// Errors from the packet read/write engines.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Link read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Link closed in the middle of a packet.
    #[error("link closed with {buffered} bytes of a partial packet")]
    UnexpectedClose {
        /// Bytes of the incomplete packet already received.
        buffered: usize,
    },

    /// Link accepted no more bytes.
    #[error("link closed")]
    ConnectionClosed,

    /// Header announced a payload above `MAX_PACKET_PAYLOAD`.
    #[error("packet payload of {0} bytes exceeds limit")]
    PacketTooLarge(u64),

    /// Header flags carry reserved bits.
    #[error("invalid packet header flags {0:#04x}")]
    InvalidHeader(u8),
}

impl TransportError {
    /// Check if the peer sent bytes that are not a valid packet.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            TransportError::PacketTooLarge(_) | TransportError::InvalidHeader(_)
        )
    }
}
