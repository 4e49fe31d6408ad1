//! Attestation certificate chains.
//!
//! Chains are X.509 certificates with P-256 subject keys and
//! ecdsa-with-SHA256 signatures, sent leaf first. Each certificate is signed
//! by the subject key of the next one and the last one by a configured
//! anchor key. The leaf carries the key attestation as a DER extension under
//! [`KEY_ATTESTATION_OID`]:
//!
//! ```text
//! KeyAttestation ::= SEQUENCE {
//!     securityLevel         INTEGER,
//!     verifiedBootState     INTEGER,
//!     deviceLocked          BOOLEAN,
//!     attestationChallenge  OCTET STRING,
//!     deviceType            INTEGER,
//!     deviceProvisioned     BOOLEAN,
//!     appProvisioned        BOOLEAN,
//!     appId                 UTF8String,
//!     lens                  LensProvision OPTIONAL
//! }
//!
//! LensProvision ::= SEQUENCE {
//!     id UTF8String, version UTF8String, creator UTF8String, source INTEGER
//! }
//! ```
//!
//! Subject, issuer and validity are not checked: the chain is bound by
//! signatures and the leaf is bound to this handshake by the challenge.

use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Verifier};
use p256::pkcs8::DecodePrivateKey;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use x509_cert::Certificate as X509Certificate;

use super::error::AttestationError;
use super::trust::{
    AttestationSecurityLevel, DeviceType, LensProvision, LensSource, PeerIdentity,
    SecurityAttributes, VerifiedBootState,
};
use crate::core::RANDOM_SIZE;

/// Extension id of the key attestation.
///
/// A private arc; integrators whose attestation service issues a different
/// id must issue and verify under the same value on both ends.
pub const KEY_ATTESTATION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1.1");

/// [`KEY_ATTESTATION_OID`] as certificate builders take it.
const KEY_ATTESTATION_ARCS: &[u64] = &[1, 3, 6, 1, 4, 1, 99999, 1, 1];

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

#[derive(Sequence)]
struct AttestationRecord {
    security_level: u8,
    verified_boot_state: u8,
    device_locked: bool,
    challenge: OctetString,
    device_type: u64,
    device_provisioned: bool,
    app_provisioned: bool,
    app_id: String,
    #[asn1(optional = "true")]
    lens: Option<LensRecord>,
}

#[derive(Sequence)]
struct LensRecord {
    id: String,
    version: String,
    creator: String,
    source: u8,
}

/// Key-attestation extension carried by a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttestation {
    /// Where the attested key lives.
    pub security_level: AttestationSecurityLevel,
    /// Bootloader verification result.
    pub verified_boot_state: VerifiedBootState,
    /// Whether the bootloader is locked.
    pub device_locked: bool,
    /// Verifier-supplied challenge; must be the verifier's hello random.
    pub challenge: Vec<u8>,
    /// Device kind.
    pub device_type: DeviceType,
    /// Device provisioning flag.
    pub device_provisioned: bool,
    /// App provisioning flag.
    pub app_provisioned: bool,
    /// Application id.
    pub app_id: String,
    /// Lens running on the device, if any.
    pub lens: Option<LensProvision>,
}

impl KeyAttestation {
    /// Attributes handed to the trust manager.
    pub fn security_attributes(&self) -> SecurityAttributes {
        SecurityAttributes {
            device_type: self.device_type,
            device_provisioned: self.device_provisioned,
            app_provisioned: self.app_provisioned,
            app_id: self.app_id.clone(),
            security_level: self.security_level,
            device_locked: self.device_locked,
        }
    }

    /// DER encoding of the extension value.
    pub fn to_der(&self) -> Result<Vec<u8>, der::Error> {
        let record = AttestationRecord {
            security_level: self.security_level.to_byte(),
            verified_boot_state: self.verified_boot_state.to_byte(),
            device_locked: self.device_locked,
            challenge: OctetString::new(self.challenge.clone())?,
            device_type: self.device_type.to_code(),
            device_provisioned: self.device_provisioned,
            app_provisioned: self.app_provisioned,
            app_id: self.app_id.clone(),
            lens: self.lens.as_ref().map(|lens| LensRecord {
                id: lens.id.clone(),
                version: lens.version.clone(),
                creator: lens.creator.clone(),
                source: match lens.source {
                    LensSource::Published => 0,
                    LensSource::Developer => 1,
                },
            }),
        };
        record.to_der()
    }

    /// Parse an extension value. Returns `None` on any malformation.
    pub fn from_der(bytes: &[u8]) -> Option<Self> {
        let record = AttestationRecord::from_der(bytes).ok()?;
        let lens = match record.lens {
            Some(lens) => Some(LensProvision {
                id: lens.id,
                version: lens.version,
                creator: lens.creator,
                source: match lens.source {
                    0 => LensSource::Published,
                    1 => LensSource::Developer,
                    _ => return None,
                },
            }),
            None => None,
        };
        Some(Self {
            security_level: AttestationSecurityLevel::from_byte(record.security_level)?,
            verified_boot_state: VerifiedBootState::from_byte(record.verified_boot_state)?,
            device_locked: record.device_locked,
            challenge: record.challenge.as_bytes().to_vec(),
            device_type: DeviceType::from_code(record.device_type)?,
            device_provisioned: record.device_provisioned,
            app_provisioned: record.app_provisioned,
            app_id: record.app_id,
            lens,
        })
    }
}

/// The parts of an X.509 certificate chain validation needs.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Key this certificate vouches for.
    pub subject_key: VerifyingKey,
    /// Attestation extension, present on leaves.
    pub extension: Option<KeyAttestation>,
    tbs: Vec<u8>,
    signature: Signature,
}

impl Certificate {
    /// Parse a DER certificate.
    ///
    /// Returns `None` on malformed DER, a signature algorithm other than
    /// ecdsa-with-SHA256, a non P-256 subject key, or an attestation
    /// extension that does not decode.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let cert = X509Certificate::from_der(bytes).ok()?;
        if cert.signature_algorithm.oid != ECDSA_WITH_SHA256 {
            return None;
        }
        let tbs = cert.tbs_certificate.to_der().ok()?;
        let signature = Signature::from_der(cert.signature.as_bytes()?).ok()?;
        let spki = &cert.tbs_certificate.subject_public_key_info;
        let subject_key = VerifyingKey::from_sec1_bytes(spki.subject_public_key.as_bytes()?).ok()?;

        let extension = match cert
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == KEY_ATTESTATION_OID)
        {
            Some(ext) => Some(KeyAttestation::from_der(ext.extn_value.as_bytes())?),
            None => None,
        };
        Some(Self {
            subject_key,
            extension,
            tbs,
            signature,
        })
    }

    /// Check that `issuer` signed this certificate.
    pub fn verify_signature(&self, issuer: &VerifyingKey) -> bool {
        issuer.verify(&self.tbs, &self.signature).is_ok()
    }
}

/// Subject key of a DER root certificate, for use as an anchor.
pub fn anchor_from_certificate(bytes: &[u8]) -> Result<VerifyingKey, AttestationError> {
    Certificate::decode(bytes)
        .map(|cert| cert.subject_key)
        .ok_or(AttestationError::MalformedCertificate(0))
}

/// Validate a leaf-first chain against `anchors`.
///
/// Returns the leaf's key and its attestation extension.
pub fn verify_chain(
    chain: &[Vec<u8>],
    anchors: &[VerifyingKey],
) -> Result<(VerifyingKey, KeyAttestation), AttestationError> {
    if chain.is_empty() {
        return Err(AttestationError::EmptyChain);
    }
    let certs = chain
        .iter()
        .enumerate()
        .map(|(i, bytes)| Certificate::decode(bytes).ok_or(AttestationError::MalformedCertificate(i)))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, pair) in certs.windows(2).enumerate() {
        if !pair[0].verify_signature(&pair[1].subject_key) {
            return Err(AttestationError::BadChainSignature(i));
        }
    }
    let last = &certs[certs.len() - 1];
    if !anchors.iter().any(|anchor| last.verify_signature(anchor)) {
        return Err(AttestationError::UntrustedAnchor);
    }

    let leaf = &certs[0];
    let extension = leaf
        .extension
        .clone()
        .ok_or(AttestationError::MissingExtension)?;
    Ok((leaf.subject_key, extension))
}

/// Validate a chain and the attestation it carries.
///
/// On top of [`verify_chain`], the challenge must equal `expected_challenge`
/// and the boot state must be `Verified`.
pub fn verify_attestation(
    chain: &[Vec<u8>],
    anchors: &[VerifyingKey],
    expected_challenge: &[u8],
) -> Result<(VerifyingKey, PeerIdentity), AttestationError> {
    let (leaf_key, attestation) = verify_chain(chain, anchors)?;
    if attestation.challenge != expected_challenge {
        return Err(AttestationError::ChallengeMismatch);
    }
    if attestation.verified_boot_state != VerifiedBootState::Verified {
        return Err(AttestationError::UntrustedBootState(
            attestation.verified_boot_state,
        ));
    }
    let identity = PeerIdentity {
        attributes: attestation.security_attributes(),
        lens: attestation.lens,
    };
    Ok((leaf_key, identity))
}

/// A chain and the private key of its leaf.
pub struct Attestation {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// Signs the handshake transcript.
    pub signing_key: SigningKey,
}

/// Source of this endpoint's attestation, usually secure hardware.
pub trait AttestationProvider: Send + Sync {
    /// Produce a fresh leaf attesting `challenge`.
    fn attest(&self, challenge: &[u8; RANDOM_SIZE]) -> Result<Attestation, AttestationError>;
}

fn provider_error(err: impl std::fmt::Display) -> AttestationError {
    AttestationError::Provider(err.to_string())
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

/// Attestation provider backed by in-memory keys.
///
/// Holds a root and an intermediate CA and issues a fresh leaf per
/// handshake, so chains are `[leaf, intermediate]` under the root's key.
/// Useful for simulators and tests.
pub struct SoftwareAttestor {
    root: rcgen::Certificate,
    anchor: VerifyingKey,
    intermediate: rcgen::Certificate,
    intermediate_key: KeyPair,
    template: KeyAttestation,
}

impl SoftwareAttestor {
    /// Create an attestor whose leaves carry `template` (challenge replaced).
    pub fn new(template: KeyAttestation) -> Result<Self, AttestationError> {
        let root_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(provider_error)?;
        let root = ca_params("qlic attestation root")
            .self_signed(&root_key)
            .map_err(provider_error)?;
        let anchor = *SigningKey::from_pkcs8_der(&root_key.serialize_der())
            .map_err(provider_error)?
            .verifying_key();

        let intermediate_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(provider_error)?;
        let intermediate = ca_params("qlic attestation intermediate")
            .signed_by(&intermediate_key, &root, &root_key)
            .map_err(provider_error)?;
        Ok(Self {
            root,
            anchor,
            intermediate,
            intermediate_key,
            template,
        })
    }

    /// Anchor key verifiers must trust.
    pub fn anchor(&self) -> VerifyingKey {
        self.anchor
    }

    /// DER root certificate, for verifiers configured from certificates.
    pub fn root_certificate(&self) -> Vec<u8> {
        self.root.der().to_vec()
    }
}

impl AttestationProvider for SoftwareAttestor {
    fn attest(&self, challenge: &[u8; RANDOM_SIZE]) -> Result<Attestation, AttestationError> {
        let mut extension = self.template.clone();
        extension.challenge = challenge.to_vec();
        let content = extension.to_der().map_err(provider_error)?;

        let leaf_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(provider_error)?;
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "qlic attested key");
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(KEY_ATTESTATION_ARCS, content));
        let leaf = params
            .signed_by(&leaf_key, &self.intermediate, &self.intermediate_key)
            .map_err(provider_error)?;

        let signing_key =
            SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).map_err(provider_error)?;
        Ok(Attestation {
            chain: vec![leaf.der().to_vec(), self.intermediate.der().to_vec()],
            signing_key,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn headset_attestation() -> KeyAttestation {
        KeyAttestation {
            security_level: AttestationSecurityLevel::StrongBox,
            verified_boot_state: VerifiedBootState::Verified,
            device_locked: true,
            challenge: Vec::new(),
            device_type: DeviceType::Spectacles,
            device_provisioned: true,
            app_provisioned: true,
            app_id: "com.example.companion".into(),
            lens: Some(LensProvision {
                id: "lens-42".into(),
                version: "3.1".into(),
                creator: "studio".into(),
                source: LensSource::Published,
            }),
        }
    }

    fn attestor() -> SoftwareAttestor {
        SoftwareAttestor::new(headset_attestation()).unwrap()
    }

    /// Self-signed certificate, optionally carrying `extension` bytes.
    fn self_signed(extension: Option<Vec<u8>>) -> (Vec<u8>, VerifyingKey) {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = ca_params("test");
        if let Some(content) = extension {
            params
                .custom_extensions
                .push(CustomExtension::from_oid_content(KEY_ATTESTATION_ARCS, content));
        }
        let cert = params.self_signed(&key).unwrap();
        let anchor = *SigningKey::from_pkcs8_der(&key.serialize_der())
            .unwrap()
            .verifying_key();
        (cert.der().to_vec(), anchor)
    }

    #[test]
    fn test_oid_arcs_agree() {
        let arcs: Vec<u64> = KEY_ATTESTATION_OID.arcs().map(u64::from).collect();
        assert_eq!(arcs, KEY_ATTESTATION_ARCS);
    }

    #[test]
    fn test_extension_der() {
        let mut ext = headset_attestation();
        ext.challenge = vec![0xAB; RANDOM_SIZE];
        let der = ext.to_der().unwrap();
        // SEQUENCE
        assert_eq!(der[0], 0x30);
        assert_eq!(KeyAttestation::from_der(&der), Some(ext.clone()));

        ext.lens = None;
        assert_eq!(KeyAttestation::from_der(&ext.to_der().unwrap()), Some(ext));
        assert_eq!(KeyAttestation::from_der(&[0x30, 0x00]), None);
    }

    #[test]
    fn test_x509_leaf_decodes() {
        let attestor = attestor();
        let challenge = [0x11; RANDOM_SIZE];
        let attestation = attestor.attest(&challenge).unwrap();
        assert_eq!(attestation.chain.len(), 2);

        let leaf = Certificate::decode(&attestation.chain[0]).unwrap();
        assert_eq!(&leaf.subject_key, attestation.signing_key.verifying_key());
        assert_eq!(leaf.extension.unwrap().challenge, challenge.to_vec());

        let intermediate = Certificate::decode(&attestation.chain[1]).unwrap();
        assert!(intermediate.extension.is_none());
        assert!(intermediate.verify_signature(&attestor.anchor()));
        assert!(!intermediate.verify_signature(&intermediate.subject_key));
    }

    #[test]
    fn test_anchor_from_root_certificate() {
        let attestor = attestor();
        let anchor = anchor_from_certificate(&attestor.root_certificate()).unwrap();
        assert_eq!(anchor, attestor.anchor());
        assert_eq!(
            anchor_from_certificate(&[0x30, 0x00]).unwrap_err(),
            AttestationError::MalformedCertificate(0)
        );
    }

    #[test]
    fn test_valid_chain() {
        let attestor = attestor();
        let challenge = [0x5A; RANDOM_SIZE];
        let attestation = attestor.attest(&challenge).unwrap();

        let (leaf, identity) =
            verify_attestation(&attestation.chain, &[attestor.anchor()], &challenge).unwrap();
        assert_eq!(&leaf, attestation.signing_key.verifying_key());
        assert_eq!(identity.attributes.device_type, DeviceType::Spectacles);
        assert_eq!(identity.lens.unwrap().id, "lens-42");
    }

    #[test]
    fn test_challenge_mismatch() {
        let attestor = attestor();
        let attestation = attestor.attest(&[1; RANDOM_SIZE]).unwrap();
        assert_eq!(
            verify_attestation(&attestation.chain, &[attestor.anchor()], &[2; RANDOM_SIZE])
                .unwrap_err(),
            AttestationError::ChallengeMismatch
        );
    }

    #[test]
    fn test_wrong_anchor() {
        let attestor = attestor();
        let attestation = attestor.attest(&[1; RANDOM_SIZE]).unwrap();
        let stranger = self::attestor().anchor();
        assert_eq!(
            verify_chain(&attestation.chain, &[stranger]).unwrap_err(),
            AttestationError::UntrustedAnchor
        );
    }

    #[test]
    fn test_broken_link_in_chain() {
        let attestor = attestor();
        let attestation = attestor.attest(&[1; RANDOM_SIZE]).unwrap();
        let other = self::attestor().attest(&[1; RANDOM_SIZE]).unwrap();
        // Leaf from one attestor, intermediate from another.
        let chain = vec![attestation.chain[0].clone(), other.chain[1].clone()];
        assert_eq!(
            verify_chain(&chain, &[attestor.anchor()]).unwrap_err(),
            AttestationError::BadChainSignature(0)
        );
    }

    #[test]
    fn test_tampered_certificate_fails_signature() {
        let attestor = attestor();
        let attestation = attestor.attest(&[4; RANDOM_SIZE]).unwrap();
        let mut chain = attestation.chain.clone();
        // Flip a byte inside the attestation challenge of the leaf.
        let leaf = &mut chain[0];
        let at = leaf
            .windows(RANDOM_SIZE)
            .position(|w| w == [4; RANDOM_SIZE])
            .unwrap();
        leaf[at] ^= 0xFF;
        assert_eq!(
            verify_chain(&chain, &[attestor.anchor()]).unwrap_err(),
            AttestationError::BadChainSignature(0)
        );
    }

    #[test]
    fn test_untrusted_boot_state() {
        let mut template = headset_attestation();
        template.verified_boot_state = VerifiedBootState::Unverified;
        let attestor = SoftwareAttestor::new(template).unwrap();
        let attestation = attestor.attest(&[3; RANDOM_SIZE]).unwrap();
        assert_eq!(
            verify_attestation(&attestation.chain, &[attestor.anchor()], &[3; RANDOM_SIZE])
                .unwrap_err(),
            AttestationError::UntrustedBootState(VerifiedBootState::Unverified)
        );
    }

    #[test]
    fn test_malformed_and_empty_chains() {
        assert_eq!(verify_chain(&[], &[]).unwrap_err(), AttestationError::EmptyChain);
        assert_eq!(
            verify_chain(&[vec![0x01, 0x02]], &[]).unwrap_err(),
            AttestationError::MalformedCertificate(0)
        );
    }

    #[test]
    fn test_undecodable_extension_is_malformed() {
        let (cert, anchor) = self_signed(Some(vec![0x04, 0x01, 0x00]));
        assert_eq!(
            verify_chain(&[cert], &[anchor]).unwrap_err(),
            AttestationError::MalformedCertificate(0)
        );
    }

    #[test]
    fn test_leaf_without_extension() {
        let (cert, anchor) = self_signed(None);
        assert_eq!(
            verify_chain(&[cert], &[anchor]).unwrap_err(),
            AttestationError::MissingExtension
        );
    }
}
