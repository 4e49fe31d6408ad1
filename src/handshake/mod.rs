//! QLIC handshake and peer authentication.
//!
//! - `messages.rs`: ClientHello / ServerHello / Verify and Crypto-frame reassembly
//! - `transcript.rs`: running SHA-384 transcript hash
//! - `psk.rs`: pretrusted mode signing key derived from the pre-shared secret
//! - `attestation.rs`: X.509 attestation chains, chain validation, providers
//! - `trust.rs`: trust modes, security attributes, [`TrustManager`]
//! - `engine.rs`: the [`HandshakeEngine`] state machine

mod attestation;
mod engine;
mod error;
mod messages;
mod psk;
mod transcript;
mod trust;
mod wire;

pub use attestation::{
    Attestation, AttestationProvider, Certificate, KEY_ATTESTATION_OID, KeyAttestation,
    SoftwareAttestor, anchor_from_certificate, verify_attestation, verify_chain,
};
pub use engine::{HandshakeAction, HandshakeEngine};
pub use error::{AttestationError, HandshakeError, TrustError};
pub use messages::{HandshakeMessage, MessageBuffer, TrustModeKind};
pub use psk::PreSharedSecret;
pub use transcript::Transcript;
pub use trust::{
    AttestationSecurityLevel, AttestedConfig, DeviceType, LensProvision, LensSource, PeerIdentity,
    PeerVerifier, PolicyTrustManager, SecurityAttributes, TrustManager, TrustMode,
    VerifiedBootState,
};
