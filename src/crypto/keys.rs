//! HKDF-SHA384 key schedule.
//!
//! The schedule follows the TLS 1.3 shape with a `"qlic "` label prefix:
//!
//! ```text
//! root      = HKDF-Extract(salt = 0^48, ikm = shared_secret)
//! handshake = ExpandLabel(root, "derived", H(ClientHello..ServerHello))
//!   c hs traffic / s hs traffic = ExpandLabel(handshake, .., same hash)
//! master    = ExpandLabel(handshake, "derived", H(..ServerVerify))
//!   c ap traffic / s ap traffic = ExpandLabel(master, .., same hash)
//!
//! key = ExpandLabel(traffic, "key", "", 16)
//! iv  = ExpandLabel(traffic, "iv",  "", 12)
//! next traffic = ExpandLabel(traffic, "traffic upd", "", 48)
//! ```
//!
//! `ExpandLabel` builds the TLS `HkdfLabel` structure:
//! `length (u16 BE) | label_len (u8) | "qlic " label | ctx_len (u8) | ctx`.

use hkdf::Hkdf;
use sha2::Sha384;
use zeroize::Zeroize;

use super::aead::{SecurityLevel, TrafficKey};
use crate::core::{AEAD_IV_SIZE, AEAD_KEY_SIZE, CryptoError, HASH_SIZE, LABEL_PREFIX, Role};

const LABEL_DERIVED: &[u8] = b"derived";
const LABEL_CLIENT_HS: &[u8] = b"c hs traffic";
const LABEL_SERVER_HS: &[u8] = b"s hs traffic";
const LABEL_CLIENT_AP: &[u8] = b"c ap traffic";
const LABEL_SERVER_AP: &[u8] = b"s ap traffic";
const LABEL_KEY: &[u8] = b"key";
const LABEL_IV: &[u8] = b"iv";
const LABEL_UPDATE: &[u8] = b"traffic upd";

/// HKDF-Expand-Label over SHA-384, filling `out`.
///
/// `secret` must be a full 48-byte pseudorandom key.
pub fn hkdf_expand_label(
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let full_label_len = LABEL_PREFIX.len() + label.len();
    let out_len = u16::try_from(out.len()).map_err(|_| CryptoError::KeyDerivationFailed)?;
    let label_len = u8::try_from(full_label_len).map_err(|_| CryptoError::KeyDerivationFailed)?;
    let context_len = u8::try_from(context.len()).map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut info = Vec::with_capacity(4 + full_label_len + context.len());
    info.extend_from_slice(&out_len.to_be_bytes());
    info.push(label_len);
    info.extend_from_slice(LABEL_PREFIX);
    info.extend_from_slice(label);
    info.push(context_len);
    info.extend_from_slice(context);

    let hk = Hkdf::<Sha384>::from_prk(secret).map_err(|_| CryptoError::InvalidKeyMaterial)?;
    hk.expand(&info, out)
        .map_err(|_| CryptoError::KeyDerivationFailed)
}

/// HKDF-Extract over SHA-384.
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; HASH_SIZE] {
    let (prk, _) = Hkdf::<Sha384>::extract(Some(salt), ikm);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&prk);
    out
}

fn expand_secret(secret: &[u8], label: &[u8], context: &[u8]) -> Result<[u8; HASH_SIZE], CryptoError> {
    let mut out = [0u8; HASH_SIZE];
    hkdf_expand_label(secret, label, context, &mut out)?;
    Ok(out)
}

/// A 48-byte traffic secret for one direction at one level.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct TrafficSecret {
    secret: [u8; HASH_SIZE],
    level: SecurityLevel,
}

impl TrafficSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(secret: [u8; HASH_SIZE], level: SecurityLevel) -> Self {
        Self { secret, level }
    }

    /// Raw secret bytes.
    ///
    /// # Security
    /// Exposes key material.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.secret
    }

    /// The level this secret belongs to.
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Derive the AEAD key and IV.
    pub fn traffic_key(&self) -> Result<TrafficKey, CryptoError> {
        let mut key = [0u8; AEAD_KEY_SIZE];
        let mut iv = [0u8; AEAD_IV_SIZE];
        hkdf_expand_label(&self.secret, LABEL_KEY, &[], &mut key)?;
        hkdf_expand_label(&self.secret, LABEL_IV, &[], &mut iv)?;
        let traffic = TrafficKey::new(key, iv, self.level);
        key.zeroize();
        iv.zeroize();
        Ok(traffic)
    }

    /// Derive the secret for the next key phase.
    pub fn next(&self) -> Result<TrafficSecret, CryptoError> {
        Ok(Self {
            secret: expand_secret(&self.secret, LABEL_UPDATE, &[])?,
            level: self.level,
        })
    }
}

impl Drop for TrafficSecret {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for TrafficSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficSecret")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Client and server traffic secrets at one level.
#[derive(Debug, Clone)]
pub struct DirectionalSecrets {
    /// Secret protecting client-to-server records.
    pub client: TrafficSecret,
    /// Secret protecting server-to-client records.
    pub server: TrafficSecret,
}

impl DirectionalSecrets {
    /// Split into `(tx, rx)` from the point of view of `role`.
    pub fn for_role(self, role: Role) -> (TrafficSecret, TrafficSecret) {
        match role {
            Role::Client => (self.client, self.server),
            Role::Server => (self.server, self.client),
        }
    }
}

/// Key schedule for one handshake.
///
/// Created from the ECDH shared secret; the handshake stage must be derived
/// before the application stage.
pub struct KeySchedule {
    root: [u8; HASH_SIZE],
    handshake: Option<[u8; HASH_SIZE]>,
}

impl KeySchedule {
    /// Start the schedule from the shared secret.
    pub fn new(shared_secret: &[u8]) -> Self {
        Self {
            root: hkdf_extract(&[0u8; HASH_SIZE], shared_secret),
            handshake: None,
        }
    }

    /// The extracted root secret.
    pub fn root_secret(&self) -> &[u8; HASH_SIZE] {
        &self.root
    }

    /// Derive the handshake secret and its traffic secrets.
    ///
    /// `hello_hash` is the transcript hash through the ServerHello.
    pub fn handshake_secrets(&mut self, hello_hash: &[u8]) -> Result<DirectionalSecrets, CryptoError> {
        let handshake = expand_secret(&self.root, LABEL_DERIVED, hello_hash)?;
        let secrets = DirectionalSecrets {
            client: TrafficSecret::from_bytes(
                expand_secret(&handshake, LABEL_CLIENT_HS, hello_hash)?,
                SecurityLevel::Handshake,
            ),
            server: TrafficSecret::from_bytes(
                expand_secret(&handshake, LABEL_SERVER_HS, hello_hash)?,
                SecurityLevel::Handshake,
            ),
        };
        self.handshake = Some(handshake);
        Ok(secrets)
    }

    /// Derive the application traffic secrets.
    ///
    /// `handshake_hash` is the transcript hash through the ServerVerify.
    pub fn app_secrets(&self, handshake_hash: &[u8]) -> Result<DirectionalSecrets, CryptoError> {
        let handshake = self.handshake.as_ref().ok_or(CryptoError::KeyDerivationFailed)?;
        let mut master = expand_secret(handshake, LABEL_DERIVED, handshake_hash)?;
        let secrets = DirectionalSecrets {
            client: TrafficSecret::from_bytes(
                expand_secret(&master, LABEL_CLIENT_AP, handshake_hash)?,
                SecurityLevel::App,
            ),
            server: TrafficSecret::from_bytes(
                expand_secret(&master, LABEL_SERVER_AP, handshake_hash)?,
                SecurityLevel::App,
            ),
        };
        master.zeroize();
        Ok(secrets)
    }
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.root.zeroize();
        if let Some(handshake) = self.handshake.as_mut() {
            handshake.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "5edee8b89af5f342dc8780c2f42e359c87376082209cf37e4941d163b7655b7d329d478519b6ebedf482df110e933867";
    const CLIENT_HS: &str = "14def1127adea4a525a231064073be90aa87b9a76d36f910738222be5e31d0145904630fd65df95330089cbf073d5440";
    const SERVER_HS: &str = "f3e073924a98d19dbc03aac2a65ad06f284b3e4b61cdb5cfc0eb8dc263d40714783d354b89e6c0880216b3e7620e62d8";
    const CLIENT_AP: &str = "fcfdbdeb52abc0788c7052365d8e5bb677d0beaa54f14a6bb5ee4fe4ecbf591b63381dcfb8b8a4dc7e545f99f3d92c77";
    const SERVER_AP: &str = "76e56cb271556c0e4b488b7af03e54face550b87af7a15e64336faae60a39909281eb0074993fb3721bf156cd3166eff";
    const CLIENT_AP_NEXT: &str = "954d52e0356cdce0864667004c0a707b75936c71a00567954ef63ab1feb78159181f2277410484ee3d22950a83d5a274";

    fn shared_secret() -> Vec<u8> {
        (1u8..=32).collect()
    }

    fn schedule() -> (KeySchedule, DirectionalSecrets, DirectionalSecrets) {
        let mut schedule = KeySchedule::new(&shared_secret());
        let hs = schedule.handshake_secrets(&[0x11; HASH_SIZE]).unwrap();
        let app = schedule.app_secrets(&[0x22; HASH_SIZE]).unwrap();
        (schedule, hs, app)
    }

    #[test]
    fn test_root_secret() {
        let schedule = KeySchedule::new(&shared_secret());
        assert_eq!(hex::encode(schedule.root_secret()), ROOT);
    }

    #[test]
    fn test_handshake_and_app_secrets() {
        let (_, hs, app) = schedule();
        assert_eq!(hex::encode(hs.client.as_bytes()), CLIENT_HS);
        assert_eq!(hex::encode(hs.server.as_bytes()), SERVER_HS);
        assert_eq!(hex::encode(app.client.as_bytes()), CLIENT_AP);
        assert_eq!(hex::encode(app.server.as_bytes()), SERVER_AP);
        assert_eq!(hs.client.level(), SecurityLevel::Handshake);
        assert_eq!(app.server.level(), SecurityLevel::App);
    }

    #[test]
    fn test_traffic_key_derivation() {
        let (_, _, app) = schedule();
        let key = app.client.traffic_key().unwrap();
        assert_eq!(hex::encode(key.key_bytes()), "255ec7088ced16a69c01b05f6a2a31c6");
        assert_eq!(hex::encode(key.iv()), "7f1245882019ad315ce95fbd");
        assert_eq!(key.level(), SecurityLevel::App);
    }

    #[test]
    fn test_key_update_chain() {
        let (_, _, app) = schedule();
        let next = app.client.next().unwrap();
        assert_eq!(hex::encode(next.as_bytes()), CLIENT_AP_NEXT);
        assert_eq!(next.level(), SecurityLevel::App);

        let key = next.traffic_key().unwrap();
        assert_eq!(hex::encode(key.key_bytes()), "13373a77e79337145fe6e8269c9a5db4");
        assert_eq!(hex::encode(key.iv()), "eecf5f3e10fc38b9ab65ef5a");
    }

    #[test]
    fn test_app_secrets_require_handshake_stage() {
        let schedule = KeySchedule::new(&shared_secret());
        assert!(matches!(
            schedule.app_secrets(&[0x22; HASH_SIZE]),
            Err(CryptoError::KeyDerivationFailed)
        ));
    }

    #[test]
    fn test_for_role_swaps_directions() {
        let (_, hs, _) = schedule();
        let (client_tx, client_rx) = hs.clone().for_role(Role::Client);
        let (server_tx, server_rx) = hs.for_role(Role::Server);
        assert_eq!(client_tx.as_bytes(), server_rx.as_bytes());
        assert_eq!(client_rx.as_bytes(), server_tx.as_bytes());
    }

    #[test]
    fn test_different_transcripts_diverge() {
        let mut a = KeySchedule::new(&shared_secret());
        let mut b = KeySchedule::new(&shared_secret());
        let sa = a.handshake_secrets(&[0x11; HASH_SIZE]).unwrap();
        let sb = b.handshake_secrets(&[0x12; HASH_SIZE]).unwrap();
        assert_ne!(sa.client.as_bytes(), sb.client.as_bytes());
    }

    #[test]
    fn test_expand_label_rejects_short_prk() {
        let mut out = [0u8; 16];
        assert_eq!(
            hkdf_expand_label(&[0u8; 8], b"key", &[], &mut out),
            Err(CryptoError::InvalidKeyMaterial)
        );
    }
}
