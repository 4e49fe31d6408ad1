//! Handshake error types.

use thiserror::Error;

use super::trust::VerifiedBootState;
use crate::core::{CryptoError, VarintError};

/// Why a certificate chain or its key-attestation extension was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// Peer sent no certificates but attestation is required.
    #[error("empty certificate chain")]
    EmptyChain,

    /// A certificate did not parse.
    #[error("malformed certificate at index {0}")]
    MalformedCertificate(usize),

    /// A certificate's signature does not verify under its issuer's key.
    #[error("certificate {0} not signed by its issuer")]
    BadChainSignature(usize),

    /// The last certificate is not signed by any configured anchor.
    #[error("chain does not end at a trusted anchor")]
    UntrustedAnchor,

    /// The leaf certificate carries no key-attestation extension.
    #[error("leaf certificate has no key attestation")]
    MissingExtension,

    /// The attestation challenge is not the verifier's hello random.
    #[error("attestation challenge mismatch")]
    ChallengeMismatch,

    /// The device did not boot a verified image.
    #[error("untrusted boot state: {0:?}")]
    UntrustedBootState(VerifiedBootState),

    /// The local attestation provider could not produce a credential.
    #[error("attestation provider failed: {0}")]
    Provider(String),
}

/// Why a [`TrustManager`](super::TrustManager) refused a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    /// Unfused development hardware while unfused devices are not accepted.
    #[error("unfused device not accepted")]
    UnfusedDevice,

    /// Device has not been provisioned.
    #[error("device not provisioned")]
    DeviceNotProvisioned,

    /// Application has not been provisioned on the device.
    #[error("app not provisioned")]
    AppNotProvisioned,

    /// Attestation key lives in software only.
    #[error("attestation key not hardware backed")]
    InsecureKeyStorage,

    /// Bootloader is unlocked.
    #[error("device bootloader unlocked")]
    DeviceUnlocked,

    /// Lens was not published through a trusted source.
    #[error("untrusted lens {0}")]
    UntrustedLens(String),
}

/// Errors raised while running the handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A handshake message could not be parsed.
    #[error("malformed handshake message: {0}")]
    Malformed(&'static str),

    /// A handshake message arrived out of order.
    #[error("unexpected handshake message type {0:#x}")]
    UnexpectedMessage(u64),

    /// Handshake message exceeds `MAX_HANDSHAKE_MESSAGE`.
    #[error("handshake message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// The peer selected a different trust mode.
    #[error("trust mode mismatch")]
    TrustModeMismatch,

    /// The peer's key share is not a valid P-256 point.
    #[error("invalid key share")]
    InvalidKeyShare,

    /// A Verify signature did not check out.
    #[error("handshake signature verification failed")]
    BadSignature,

    /// Certificate chain or attestation rejected.
    #[error("attestation rejected: {0}")]
    Attestation(#[from] AttestationError),

    /// Trust manager rejected the peer.
    #[error("peer not trusted: {0}")]
    Untrusted(#[from] TrustError),

    /// Key derivation failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Varint encoding failure while building a message.
    #[error(transparent)]
    Varint(#[from] VarintError),

    /// Handshake data after completion or failure.
    #[error("handshake already finished")]
    AlreadyFinished,
}

impl HandshakeError {
    /// Check if the peer failed to prove who it is.
    ///
    /// These all go to the peer as the same generic close.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            HandshakeError::BadSignature
                | HandshakeError::Attestation(_)
                | HandshakeError::Untrusted(_)
                | HandshakeError::TrustModeMismatch
                | HandshakeError::Crypto(CryptoError::AuthenticationFailure)
        )
    }
}
