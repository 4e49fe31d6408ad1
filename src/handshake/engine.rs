//! Handshake state machine.
//!
//! ```text
//! Client                                         Server
//!   ClientHello (clear)         -------->
//!                               <--------  ServerHello (clear)
//!                 [both install handshake keys]
//!                               <--------  Verify (handshake keys)
//!                                          [server installs app tx key]
//!   Verify (handshake keys)     -------->
//!   [client installs app keys]             [server installs app rx key]
//! ```
//!
//! The engine does no I/O. It consumes Crypto frame bytes and returns an
//! ordered list of [`HandshakeAction`]s the connection applies in turn.

use p256::ecdh::EphemeralSecret;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{RngCore, rngs::OsRng};
use tracing::debug;

use super::attestation::verify_attestation;
use super::error::{AttestationError, HandshakeError};
use super::messages::{HandshakeMessage, MessageBuffer};
use super::transcript::Transcript;
use super::trust::{PeerIdentity, TrustMode};
use crate::core::{CLIENT_VERIFY_CONTEXT, RANDOM_SIZE, Role, SERVER_VERIFY_CONTEXT};
use crate::crypto::{DirectionalSecrets, KeySchedule, TrafficSecret};

/// Step the connection must take on behalf of the handshake.
#[derive(Debug)]
pub enum HandshakeAction {
    /// Send these bytes in Crypto frames under the current tx key.
    Send(Vec<u8>),
    /// Switch the transmit direction to this secret.
    InstallTx(TrafficSecret),
    /// Switch the receive direction to this secret.
    InstallRx(TrafficSecret),
    /// Handshake finished; app keys are installed in both directions.
    Complete {
        /// Identity of an attested peer, if it was verified.
        peer: Option<PeerIdentity>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    WaitClientHello,
    WaitServerHello,
    WaitServerVerify,
    WaitClientVerify,
    Complete,
    Failed,
}

/// Drives one handshake for one endpoint.
///
/// No state survives into another connection attempt; a reconnect builds a
/// new engine.
pub struct HandshakeEngine {
    role: Role,
    mode: TrustMode,
    state: State,
    transcript: Transcript,
    buffer: MessageBuffer,
    local_random: [u8; RANDOM_SIZE],
    peer_random: [u8; RANDOM_SIZE],
    ephemeral: Option<EphemeralSecret>,
    schedule: Option<KeySchedule>,
    pending_rx: Option<TrafficSecret>,
    peer: Option<PeerIdentity>,
}

impl HandshakeEngine {
    /// Create an engine for `role` under `mode`.
    pub fn new(role: Role, mode: TrustMode) -> Self {
        let mut local_random = [0u8; RANDOM_SIZE];
        OsRng.fill_bytes(&mut local_random);
        Self {
            role,
            mode,
            state: State::Start,
            transcript: Transcript::new(),
            buffer: MessageBuffer::new(),
            local_random,
            peer_random: [0u8; RANDOM_SIZE],
            ephemeral: None,
            schedule: None,
            pending_rx: None,
            peer: None,
        }
    }

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Check if app keys are installed in both directions.
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Begin the handshake. The client emits its ClientHello.
    pub fn start(&mut self) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if self.state != State::Start {
            return Err(HandshakeError::AlreadyFinished);
        }
        match self.role {
            Role::Server => {
                self.state = State::WaitClientHello;
                Ok(Vec::new())
            }
            Role::Client => {
                let ephemeral = EphemeralSecret::random(&mut OsRng);
                let hello = HandshakeMessage::ClientHello {
                    trust_mode: self.mode.kind(),
                    random: self.local_random,
                    key_share: ephemeral.public_key().to_encoded_point(false).as_bytes().to_vec(),
                };
                self.ephemeral = Some(ephemeral);
                let bytes = hello.encode()?;
                self.transcript.update(&bytes);
                self.state = State::WaitServerHello;
                debug!(mode = ?self.mode.kind(), "sending client hello");
                Ok(vec![HandshakeAction::Send(bytes)])
            }
        }
    }

    /// Feed bytes from a Crypto frame.
    ///
    /// Any error leaves the engine failed; the connection must close.
    pub fn on_crypto(&mut self, data: &[u8]) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if matches!(self.state, State::Complete | State::Failed | State::Start) {
            return Err(HandshakeError::AlreadyFinished);
        }
        self.buffer.push(data);

        let mut actions = Vec::new();
        loop {
            let next = match self.buffer.next_message() {
                Ok(next) => next,
                Err(e) => return Err(self.fail(e)),
            };
            let Some((message, raw)) = next else {
                break;
            };
            match self.on_message(message, &raw) {
                Ok(mut more) => actions.append(&mut more),
                Err(e) => return Err(self.fail(e)),
            }
        }
        Ok(actions)
    }

    fn fail(&mut self, error: HandshakeError) -> HandshakeError {
        debug!(role = %self.role, %error, "handshake failed");
        self.state = State::Failed;
        self.ephemeral = None;
        self.schedule = None;
        self.pending_rx = None;
        error
    }

    fn on_message(
        &mut self,
        message: HandshakeMessage,
        raw: &[u8],
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        match (self.state, message) {
            (
                State::WaitClientHello,
                HandshakeMessage::ClientHello {
                    trust_mode,
                    random,
                    key_share,
                },
            ) => {
                if trust_mode != self.mode.kind() {
                    return Err(HandshakeError::TrustModeMismatch);
                }
                self.peer_random = random;
                self.transcript.update(raw);
                self.on_client_hello(&key_share)
            }
            (State::WaitServerHello, HandshakeMessage::ServerHello { random, key_share }) => {
                self.peer_random = random;
                self.transcript.update(raw);
                self.on_server_hello(&key_share)
            }
            (
                State::WaitServerVerify,
                HandshakeMessage::Verify {
                    certificate_chain,
                    signature,
                },
            ) => {
                self.verify_peer(SERVER_VERIFY_CONTEXT, &certificate_chain, &signature)?;
                self.transcript.update(raw);
                self.on_server_verify()
            }
            (
                State::WaitClientVerify,
                HandshakeMessage::Verify {
                    certificate_chain,
                    signature,
                },
            ) => {
                self.verify_peer(CLIENT_VERIFY_CONTEXT, &certificate_chain, &signature)?;
                self.transcript.update(raw);
                let rx = self
                    .pending_rx
                    .take()
                    .ok_or(HandshakeError::Malformed("client verify before server verify"))?;
                self.finish();
                debug!("server handshake complete");
                Ok(vec![
                    HandshakeAction::InstallRx(rx),
                    HandshakeAction::Complete {
                        peer: self.peer.clone(),
                    },
                ])
            }
            (_, other) => Err(HandshakeError::UnexpectedMessage(other.message_type())),
        }
    }

    fn on_client_hello(&mut self, client_share: &[u8]) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let hello = HandshakeMessage::ServerHello {
            random: self.local_random,
            key_share: ephemeral.public_key().to_encoded_point(false).as_bytes().to_vec(),
        };
        let hello_bytes = hello.encode()?;
        let handshake = self.derive_handshake_secrets(&ephemeral, client_share, &hello_bytes)?;
        let (hs_tx, hs_rx) = handshake.for_role(Role::Server);

        let verify = self.build_verify(SERVER_VERIFY_CONTEXT)?;
        self.transcript.update(&verify);
        let (app_tx, app_rx) = self.derive_app_secrets()?.for_role(Role::Server);
        self.pending_rx = Some(app_rx);
        self.state = State::WaitClientVerify;
        debug!("sending server hello and verify");

        Ok(vec![
            HandshakeAction::Send(hello_bytes),
            HandshakeAction::InstallTx(hs_tx),
            HandshakeAction::InstallRx(hs_rx),
            HandshakeAction::Send(verify),
            HandshakeAction::InstallTx(app_tx),
        ])
    }

    fn on_server_hello(&mut self, server_share: &[u8]) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let ephemeral = self
            .ephemeral
            .take()
            .ok_or(HandshakeError::Malformed("server hello before client hello"))?;
        // The ServerHello is already in the transcript.
        let handshake = self.derive_handshake_secrets(&ephemeral, server_share, &[])?;
        let (hs_tx, hs_rx) = handshake.for_role(Role::Client);
        self.state = State::WaitServerVerify;
        debug!("handshake keys installed");
        Ok(vec![
            HandshakeAction::InstallTx(hs_tx),
            HandshakeAction::InstallRx(hs_rx),
        ])
    }

    fn on_server_verify(&mut self) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let (app_tx, app_rx) = self.derive_app_secrets()?.for_role(Role::Client);
        let verify = self.build_verify(CLIENT_VERIFY_CONTEXT)?;
        self.transcript.update(&verify);
        self.finish();
        debug!("client handshake complete");
        Ok(vec![
            HandshakeAction::Send(verify),
            HandshakeAction::InstallTx(app_tx),
            HandshakeAction::InstallRx(app_rx),
            HandshakeAction::Complete {
                peer: self.peer.clone(),
            },
        ])
    }

    fn finish(&mut self) {
        self.state = State::Complete;
        self.schedule = None;
    }

    /// ECDH with the peer's share, then the handshake stage of the schedule.
    ///
    /// `own_hello` is appended to the transcript first when this side sends
    /// the ServerHello.
    fn derive_handshake_secrets(
        &mut self,
        ephemeral: &EphemeralSecret,
        peer_share: &[u8],
        own_hello: &[u8],
    ) -> Result<DirectionalSecrets, HandshakeError> {
        let peer_key =
            p256::PublicKey::from_sec1_bytes(peer_share).map_err(|_| HandshakeError::InvalidKeyShare)?;
        let shared = ephemeral.diffie_hellman(&peer_key);
        self.transcript.update(own_hello);

        let mut schedule = KeySchedule::new(&shared.raw_secret_bytes()[..]);
        let secrets = schedule.handshake_secrets(&self.transcript.current_hash())?;
        self.schedule = Some(schedule);
        Ok(secrets)
    }

    fn derive_app_secrets(&self) -> Result<DirectionalSecrets, HandshakeError> {
        let schedule = self
            .schedule
            .as_ref()
            .ok_or(HandshakeError::Malformed("verify before hello"))?;
        Ok(schedule.app_secrets(&self.transcript.current_hash())?)
    }

    /// Encode this side's Verify over the current transcript.
    fn build_verify(&self, context: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let content = signed_content(context, &self.transcript.current_hash());
        let (certificate_chain, signing_key) = match &self.mode {
            TrustMode::Pretrusted(psk) => (Vec::new(), Some(psk.signing_key()?)),
            TrustMode::Attested(config) => match &config.credential {
                Some(provider) => {
                    // The challenge is the peer's hello random.
                    let attestation = provider.attest(&self.peer_random)?;
                    (attestation.chain, Some(attestation.signing_key))
                }
                None => (Vec::new(), None),
            },
        };
        let signature = match signing_key {
            Some(key) => sign(&key, &content),
            None => Vec::new(),
        };
        HandshakeMessage::Verify {
            certificate_chain,
            signature,
        }
        .encode()
    }

    /// Check the peer's Verify against the transcript before it.
    fn verify_peer(
        &mut self,
        context: &[u8],
        chain: &[Vec<u8>],
        signature: &[u8],
    ) -> Result<(), HandshakeError> {
        let content = signed_content(context, &self.transcript.current_hash());
        match &self.mode {
            TrustMode::Pretrusted(psk) => {
                if !chain.is_empty() {
                    return Err(HandshakeError::Malformed("certificate chain in pretrusted mode"));
                }
                let key = *psk.signing_key()?.verifying_key();
                check_signature(&key, &content, signature)
            }
            TrustMode::Attested(config) => {
                let Some(verifier) = &config.peer else {
                    return Ok(());
                };
                if chain.is_empty() {
                    return Err(AttestationError::EmptyChain.into());
                }
                let (leaf, identity) =
                    verify_attestation(chain, &verifier.anchors, &self.local_random)?;
                check_signature(&leaf, &content, signature)?;
                verifier
                    .trust_manager
                    .validate(&identity.attributes, identity.lens.as_ref())?;
                debug!(device = ?identity.attributes.device_type, "peer attestation accepted");
                self.peer = Some(identity);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for HandshakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeEngine")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// `context | 0x00 | transcript_hash`
fn signed_content(context: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(context.len() + 1 + transcript_hash.len());
    content.extend_from_slice(context);
    content.push(0);
    content.extend_from_slice(transcript_hash);
    content
}

fn sign(key: &SigningKey, content: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(content);
    signature.to_bytes().to_vec()
}

fn check_signature(key: &VerifyingKey, content: &[u8], signature: &[u8]) -> Result<(), HandshakeError> {
    let signature = Signature::from_slice(signature).map_err(|_| HandshakeError::BadSignature)?;
    key.verify(content, &signature)
        .map_err(|_| HandshakeError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionEngine, SecurityLevel};
    use crate::handshake::attestation::{SoftwareAttestor, tests::headset_attestation};
    use crate::handshake::error::TrustError;
    use crate::handshake::psk::PreSharedSecret;
    use crate::handshake::trust::{AttestedConfig, DeviceType, PeerVerifier, PolicyTrustManager};
    use std::sync::Arc;

    /// One endpoint: engine plus the record layer its actions drive.
    struct Endpoint {
        engine: HandshakeEngine,
        crypto: EncryptionEngine,
        complete: Option<Option<PeerIdentity>>,
    }

    impl Endpoint {
        fn new(role: Role, mode: TrustMode) -> Self {
            Self {
                engine: HandshakeEngine::new(role, mode),
                crypto: EncryptionEngine::new(),
                complete: None,
            }
        }

        /// Apply actions, returning sealed records in send order.
        fn apply(&mut self, actions: Vec<HandshakeAction>) -> Vec<Vec<u8>> {
            let mut out = Vec::new();
            for action in actions {
                match action {
                    HandshakeAction::Send(bytes) => out.push(self.crypto.seal(&bytes).unwrap()),
                    HandshakeAction::InstallTx(secret) => {
                        self.crypto.update_tx_key(secret.traffic_key().unwrap())
                    }
                    HandshakeAction::InstallRx(secret) => {
                        self.crypto.update_rx_key(secret.traffic_key().unwrap())
                    }
                    HandshakeAction::Complete { peer } => self.complete = Some(peer),
                }
            }
            out
        }

        fn receive(&mut self, records: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, HandshakeError> {
            let mut out = Vec::new();
            for record in records {
                let plain = self.crypto.open(&record)?;
                let actions = self.engine.on_crypto(&plain)?;
                out.extend(self.apply(actions));
            }
            Ok(out)
        }
    }

    fn run(client_mode: TrustMode, server_mode: TrustMode) -> (Endpoint, Endpoint, Result<(), HandshakeError>) {
        let mut client = Endpoint::new(Role::Client, client_mode);
        let mut server = Endpoint::new(Role::Server, server_mode);
        let actions = client.engine.start().unwrap();
        let hello = client.apply(actions);
        let actions = server.engine.start().unwrap();
        server.apply(actions);

        let result = (|| -> Result<(), HandshakeError> {
            let flight = server.receive(hello)?;
            let reply = client.receive(flight)?;
            server.receive(reply)?;
            Ok(())
        })();
        (client, server, result)
    }

    fn psk(key: &[u8]) -> TrustMode {
        TrustMode::Pretrusted(PreSharedSecret::new(key.to_vec(), b"bond-salt".to_vec()))
    }

    #[test]
    fn test_pretrusted_handshake_completes() {
        let (mut client, mut server, result) = run(psk(b"shared"), psk(b"shared"));
        result.unwrap();
        assert!(client.engine.is_complete());
        assert!(server.engine.is_complete());
        assert_eq!(client.complete, Some(None));
        assert_eq!(server.complete, Some(None));
        assert_eq!(client.crypto.tx_level(), Some(SecurityLevel::App));
        assert_eq!(server.crypto.rx_level(), Some(SecurityLevel::App));

        // App keys agree in both directions.
        let record = client.crypto.seal(b"ping").unwrap();
        assert_eq!(server.crypto.open(&record).unwrap(), b"ping");
        let record = server.crypto.seal(b"pong").unwrap();
        assert_eq!(client.crypto.open(&record).unwrap(), b"pong");
    }

    #[test]
    fn test_pretrusted_mismatch_fails_without_app_keys() {
        let (client, server, result) = run(psk(b"shared"), psk(b"different"));
        let err = result.unwrap_err();
        assert!(err.is_authentication_failure(), "{err}");
        assert!(!client.engine.is_complete());
        assert!(!server.engine.is_complete());
        assert_eq!(client.crypto.rx_level(), Some(SecurityLevel::Handshake));
        assert!(client.complete.is_none());
    }

    #[test]
    fn test_trust_mode_mismatch() {
        let (_, _, result) = run(psk(b"shared"), TrustMode::Attested(AttestedConfig::default()));
        assert!(matches!(result, Err(HandshakeError::TrustModeMismatch)));
    }

    fn attested_pair(
        template: crate::handshake::attestation::KeyAttestation,
        policy: PolicyTrustManager,
    ) -> (TrustMode, TrustMode) {
        let attestor = SoftwareAttestor::new(template).unwrap();
        let anchor = attestor.anchor();
        let client = TrustMode::Attested(AttestedConfig {
            credential: None,
            peer: Some(PeerVerifier {
                anchors: vec![anchor],
                trust_manager: Arc::new(policy),
            }),
        });
        let server = TrustMode::Attested(AttestedConfig {
            credential: Some(Arc::new(attestor)),
            peer: None,
        });
        (client, server)
    }

    #[test]
    fn test_attested_handshake_reports_peer() {
        let (client_mode, server_mode) =
            attested_pair(headset_attestation(), PolicyTrustManager::new());
        let (client, server, result) = run(client_mode, server_mode);
        result.unwrap();
        let peer = client.complete.unwrap().unwrap();
        assert_eq!(peer.attributes.device_type, DeviceType::Spectacles);
        assert_eq!(peer.lens.unwrap().id, "lens-42");
        assert_eq!(server.complete, Some(None));
    }

    #[test]
    fn test_attested_unfused_rejected_by_policy() {
        let mut template = headset_attestation();
        template.device_type = DeviceType::SpectaclesUnfused;
        let (client_mode, server_mode) = attested_pair(template.clone(), PolicyTrustManager::new());
        let (client, _, result) = run(client_mode, server_mode);
        assert!(matches!(
            result,
            Err(HandshakeError::Untrusted(TrustError::UnfusedDevice))
        ));
        assert!(client.complete.is_none());

        let (client_mode, server_mode) =
            attested_pair(template, PolicyTrustManager::new().accept_unfused(true));
        let (_, _, result) = run(client_mode, server_mode);
        assert!(result.is_ok());
    }

    #[test]
    fn test_attested_wrong_anchor() {
        let (_, server_mode) = attested_pair(headset_attestation(), PolicyTrustManager::new());
        let (client_mode, _) = attested_pair(headset_attestation(), PolicyTrustManager::new());
        let (_, _, result) = run(client_mode, server_mode);
        assert!(matches!(
            result,
            Err(HandshakeError::Attestation(AttestationError::UntrustedAnchor))
        ));
    }

    #[test]
    fn test_data_after_failure_rejected() {
        let (mut client, _, result) = run(psk(b"a"), psk(b"b"));
        assert!(result.is_err());
        assert!(matches!(
            client.engine.on_crypto(&[0x01]),
            Err(HandshakeError::AlreadyFinished)
        ));
    }

    #[test]
    fn test_unexpected_message_order() {
        let mut server = HandshakeEngine::new(Role::Server, psk(b"k"));
        server.start().unwrap();
        let verify = HandshakeMessage::Verify {
            certificate_chain: Vec::new(),
            signature: Vec::new(),
        }
        .encode()
        .unwrap();
        assert!(matches!(
            server.on_crypto(&verify),
            Err(HandshakeError::UnexpectedMessage(0x04))
        ));
    }
}
