//! Trust modes, peer security attributes and the pluggable trust manager.

use std::fmt;
use std::sync::Arc;

use p256::ecdsa::VerifyingKey;

use super::attestation::AttestationProvider;
use super::error::TrustError;
use super::messages::TrustModeKind;
use super::psk::PreSharedSecret;

/// Where the attestation key is stored on the peer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationSecurityLevel {
    /// Software keystore.
    Software,
    /// Trusted execution environment.
    TrustedEnvironment,
    /// Dedicated secure element.
    StrongBox,
}

impl AttestationSecurityLevel {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Software => 0,
            Self::TrustedEnvironment => 1,
            Self::StrongBox => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Software),
            1 => Some(Self::TrustedEnvironment),
            2 => Some(Self::StrongBox),
            _ => None,
        }
    }
}

/// Verified-boot state reported by the peer's bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedBootState {
    /// Booted an image signed by the vendor key.
    Verified,
    /// Booted an image signed by a user-installed key.
    SelfSigned,
    /// Booted without verification.
    Unverified,
    /// Verification failed.
    Failed,
}

impl VerifiedBootState {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Verified => 0,
            Self::SelfSigned => 1,
            Self::Unverified => 2,
            Self::Failed => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Verified),
            1 => Some(Self::SelfSigned),
            2 => Some(Self::Unverified),
            3 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Kind of device on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// A phone running the companion app.
    Phone,
    /// Production headset.
    Spectacles,
    /// Development headset with unfused security keys.
    SpectaclesUnfused,
}

impl DeviceType {
    pub(crate) fn to_code(self) -> u64 {
        match self {
            Self::Phone => 0,
            Self::Spectacles => 1,
            Self::SpectaclesUnfused => 2,
        }
    }

    pub(crate) fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Phone),
            1 => Some(Self::Spectacles),
            2 => Some(Self::SpectaclesUnfused),
            _ => None,
        }
    }
}

/// How a lens reached the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LensSource {
    /// Published through the lens store.
    Published,
    /// Pushed from a developer tool.
    Developer,
}

/// Lens running on the peer, as attested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LensProvision {
    /// Lens id.
    pub id: String,
    /// Lens version.
    pub version: String,
    /// Lens creator.
    pub creator: String,
    /// Distribution source.
    pub source: LensSource,
}

/// Identity facts about the peer, taken from its key attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAttributes {
    /// Device kind.
    pub device_type: DeviceType,
    /// Whether the device has been provisioned.
    pub device_provisioned: bool,
    /// Whether the application has been provisioned on the device.
    pub app_provisioned: bool,
    /// Application identifier.
    pub app_id: String,
    /// Where the attestation key lives.
    pub security_level: AttestationSecurityLevel,
    /// Whether the bootloader is locked.
    pub device_locked: bool,
}

/// Decides whether an attested peer may connect.
///
/// Called once per handshake, after the chain, challenge and boot state
/// have been checked.
pub trait TrustManager: Send + Sync {
    /// Accept or reject the peer.
    fn validate(
        &self,
        attributes: &SecurityAttributes,
        lens: Option<&LensProvision>,
    ) -> Result<(), TrustError>;
}

/// Flag-driven [`TrustManager`].
///
/// Requires a provisioned device and app, hardware-backed keys and a locked
/// bootloader. Unfused devices and developer lenses are rejected unless the
/// matching flag is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyTrustManager {
    /// Accept `DeviceType::SpectaclesUnfused`.
    pub accept_unfused: bool,
    /// Accept lenses that did not come from the store.
    pub accept_untrusted_lens: bool,
}

impl PolicyTrustManager {
    /// Strict policy: both flags off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `accept_unfused`.
    pub fn accept_unfused(mut self, accept: bool) -> Self {
        self.accept_unfused = accept;
        self
    }

    /// Set `accept_untrusted_lens`.
    pub fn accept_untrusted_lens(mut self, accept: bool) -> Self {
        self.accept_untrusted_lens = accept;
        self
    }
}

impl TrustManager for PolicyTrustManager {
    fn validate(
        &self,
        attributes: &SecurityAttributes,
        lens: Option<&LensProvision>,
    ) -> Result<(), TrustError> {
        if attributes.device_type == DeviceType::SpectaclesUnfused && !self.accept_unfused {
            return Err(TrustError::UnfusedDevice);
        }
        if !attributes.device_provisioned {
            return Err(TrustError::DeviceNotProvisioned);
        }
        if !attributes.app_provisioned {
            return Err(TrustError::AppNotProvisioned);
        }
        if attributes.security_level == AttestationSecurityLevel::Software {
            return Err(TrustError::InsecureKeyStorage);
        }
        if !attributes.device_locked {
            return Err(TrustError::DeviceUnlocked);
        }
        if let Some(lens) = lens {
            if lens.source != LensSource::Published && !self.accept_untrusted_lens {
                return Err(TrustError::UntrustedLens(lens.id.clone()));
            }
        }
        Ok(())
    }
}

/// How to check an attested peer.
#[derive(Clone)]
pub struct PeerVerifier {
    /// Keys allowed to sign the last certificate of a chain.
    pub anchors: Vec<VerifyingKey>,
    /// Final accept/reject decision.
    pub trust_manager: Arc<dyn TrustManager>,
}

impl fmt::Debug for PeerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerVerifier")
            .field("anchors", &self.anchors.len())
            .finish_non_exhaustive()
    }
}

/// Attested-mode settings for one endpoint.
///
/// Either half may be absent: a phone typically verifies the headset without
/// attesting itself.
#[derive(Clone, Default)]
pub struct AttestedConfig {
    /// Produces this endpoint's chain and signing key.
    pub credential: Option<Arc<dyn AttestationProvider>>,
    /// Checks the peer's chain. `None` accepts the peer unauthenticated.
    pub peer: Option<PeerVerifier>,
}

impl fmt::Debug for AttestedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestedConfig")
            .field("credential", &self.credential.is_some())
            .field("peer", &self.peer)
            .finish()
    }
}

/// Trust model for a connection. Never mixed within one handshake.
#[derive(Debug, Clone)]
pub enum TrustMode {
    /// Both sides prove knowledge of the same pre-shared secret.
    Pretrusted(PreSharedSecret),
    /// Peers exchange attestation certificate chains.
    Attested(AttestedConfig),
}

impl TrustMode {
    /// Wire tag for this mode.
    pub fn kind(&self) -> TrustModeKind {
        match self {
            TrustMode::Pretrusted(_) => TrustModeKind::Pretrusted,
            TrustMode::Attested(_) => TrustModeKind::Attested,
        }
    }
}

/// What the handshake learned about an attested peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Attested security attributes.
    pub attributes: SecurityAttributes,
    /// Lens provision, if the peer runs one.
    pub lens: Option<LensProvision>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headset() -> SecurityAttributes {
        SecurityAttributes {
            device_type: DeviceType::Spectacles,
            device_provisioned: true,
            app_provisioned: true,
            app_id: "com.example.lens".into(),
            security_level: AttestationSecurityLevel::StrongBox,
            device_locked: true,
        }
    }

    fn developer_lens() -> LensProvision {
        LensProvision {
            id: "lens-1".into(),
            version: "1.0".into(),
            creator: "someone".into(),
            source: LensSource::Developer,
        }
    }

    #[test]
    fn test_accepts_production_headset() {
        assert!(PolicyTrustManager::new().validate(&headset(), None).is_ok());
    }

    #[test]
    fn test_unfused_gated_by_flag() {
        let mut attrs = headset();
        attrs.device_type = DeviceType::SpectaclesUnfused;
        assert_eq!(
            PolicyTrustManager::new().validate(&attrs, None),
            Err(TrustError::UnfusedDevice)
        );
        assert!(
            PolicyTrustManager::new()
                .accept_unfused(true)
                .validate(&attrs, None)
                .is_ok()
        );
    }

    #[test]
    fn test_developer_lens_gated_by_flag() {
        let lens = developer_lens();
        assert_eq!(
            PolicyTrustManager::new().validate(&headset(), Some(&lens)),
            Err(TrustError::UntrustedLens("lens-1".into()))
        );
        assert!(
            PolicyTrustManager::new()
                .accept_untrusted_lens(true)
                .validate(&headset(), Some(&lens))
                .is_ok()
        );
    }

    #[test]
    fn test_rejects_weak_devices() {
        let policy = PolicyTrustManager::new().accept_unfused(true);

        let mut attrs = headset();
        attrs.app_provisioned = false;
        assert_eq!(policy.validate(&attrs, None), Err(TrustError::AppNotProvisioned));

        let mut attrs = headset();
        attrs.security_level = AttestationSecurityLevel::Software;
        assert_eq!(policy.validate(&attrs, None), Err(TrustError::InsecureKeyStorage));

        let mut attrs = headset();
        attrs.device_locked = false;
        assert_eq!(policy.validate(&attrs, None), Err(TrustError::DeviceUnlocked));
    }

    #[test]
    fn test_code_tables_roundtrip() {
        for ty in [DeviceType::Phone, DeviceType::Spectacles, DeviceType::SpectaclesUnfused] {
            assert_eq!(DeviceType::from_code(ty.to_code()), Some(ty));
        }
        assert_eq!(DeviceType::from_code(7), None);
        assert_eq!(VerifiedBootState::from_byte(4), None);
        assert_eq!(AttestationSecurityLevel::from_byte(3), None);
    }
}
