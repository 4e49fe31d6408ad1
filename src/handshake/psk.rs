//! Pre-shared secret for pretrusted mode.
//!
//! Both endpoints turn the secret into the same P-256 signing key and sign
//! the transcript with it, proving knowledge of the secret without sending
//! it:
//!
//! ```text
//! prk  = HKDF-Extract(salt, key)
//! d_i  = ExpandLabel(prk, "psk signer", [i], 32)   for i = 0, 1, ...
//! ```
//!
//! The first `d_i` that is a valid scalar becomes the signing key.

use p256::ecdsa::SigningKey;
use zeroize::Zeroize;

use crate::core::CryptoError;
use crate::crypto::{hkdf_expand_label, hkdf_extract};

const LABEL_PSK_SIGNER: &[u8] = b"psk signer";

/// Shared key and salt, typically read from the bonding record.
///
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PreSharedSecret {
    key: Vec<u8>,
    salt: Vec<u8>,
}

impl PreSharedSecret {
    /// Create from raw key and salt.
    pub fn new(key: impl Into<Vec<u8>>, salt: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            salt: salt.into(),
        }
    }

    /// Derive the transcript signing key both sides share.
    pub fn signing_key(&self) -> Result<SigningKey, CryptoError> {
        let mut prk = hkdf_extract(&self.salt, &self.key);
        let mut candidate = [0u8; 32];
        let mut result = Err(CryptoError::InvalidKeyMaterial);
        for counter in 0u8..=u8::MAX {
            hkdf_expand_label(&prk, LABEL_PSK_SIGNER, &[counter], &mut candidate)?;
            if let Ok(key) = SigningKey::from_slice(&candidate) {
                result = Ok(key);
                break;
            }
        }
        prk.zeroize();
        candidate.zeroize();
        result
    }
}

impl Drop for PreSharedSecret {
    fn drop(&mut self) {
        self.key.zeroize();
        self.salt.zeroize();
    }
}

impl std::fmt::Debug for PreSharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSharedSecret").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_secret_same_key() {
        let a = PreSharedSecret::new(b"bonding key".to_vec(), b"salt".to_vec());
        let b = PreSharedSecret::new(b"bonding key".to_vec(), b"salt".to_vec());
        assert_eq!(
            a.signing_key().unwrap().verifying_key(),
            b.signing_key().unwrap().verifying_key()
        );
    }

    #[test]
    fn test_salt_changes_key() {
        let a = PreSharedSecret::new(b"bonding key".to_vec(), b"salt-a".to_vec());
        let b = PreSharedSecret::new(b"bonding key".to_vec(), b"salt-b".to_vec());
        assert_ne!(
            a.signing_key().unwrap().verifying_key(),
            b.signing_key().unwrap().verifying_key()
        );
    }

    #[test]
    fn test_empty_salt_is_usable() {
        assert!(PreSharedSecret::new(vec![0x42; 32], Vec::new()).signing_key().is_ok());
    }

    #[test]
    fn test_debug_redacts() {
        let psk = PreSharedSecret::new(b"topsecret".to_vec(), b"salt".to_vec());
        assert!(!format!("{psk:?}").contains("topsecret"));
    }
}
