//! Error types shared across QLIC layers.

use thiserror::Error;

/// Errors from the varint codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// Value does not fit in 62 bits.
    #[error("value {0} out of varint range")]
    OutOfRange(u64),

    /// Buffer ended before the encoded integer did.
    #[error("truncated varint: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the leading byte announced.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
}

/// Why a frame failed to decode.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorReason {
    /// The buffer ended inside the frame.
    #[error("truncated")]
    Truncated,

    /// The discriminant is not in the frame table.
    #[error("unrecognized frame type")]
    UnrecognizedType,

    /// A close reason was not valid UTF-8.
    #[error("invalid utf-8 in reason phrase")]
    InvalidUtf8,

    /// A length field exceeds what this implementation accepts.
    #[error("length field too large")]
    LengthTooLarge,
}

/// A frame could not be decoded.
///
/// Always fatal to the connection: once framing is lost there is no way to
/// resynchronise mid-packet.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("frame decoding error (type {frame_type:?}): {reason}")]
pub struct FrameError {
    /// Frame type, if the discriminant itself could be read.
    pub frame_type: Option<u64>,
    /// Failure reason.
    pub reason: FrameErrorReason,
}

impl FrameError {
    /// Truncation inside a frame of known type.
    pub fn truncated(frame_type: u64) -> Self {
        Self {
            frame_type: Some(frame_type),
            reason: FrameErrorReason::Truncated,
        }
    }

    /// Unknown discriminant.
    pub fn unrecognized(frame_type: u64) -> Self {
        Self {
            frame_type: Some(frame_type),
            reason: FrameErrorReason::UnrecognizedType,
        }
    }

    /// Check whether this is a truncation rather than a bad discriminant.
    pub fn is_truncation(&self) -> bool {
        self.reason == FrameErrorReason::Truncated
    }
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag mismatch. Fatal: corruption or tampering.
    #[error("record authentication failed")]
    AuthenticationFailure,

    /// AEAD sealing failed.
    #[error("record encryption failed")]
    EncryptionFailed,

    /// Record counter exhausted - the key must not be used again.
    #[error("record counter exhausted")]
    CounterExhaustion,

    /// HKDF expansion failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// A key, share or signature had the wrong shape.
    #[error("invalid key material")]
    InvalidKeyMaterial,
}
