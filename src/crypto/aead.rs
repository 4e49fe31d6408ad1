//! AES-128-GCM record protection.
//!
//! Every packet payload after the hellos is sealed as one AEAD record:
//!
//! ```text
//! record = AES-128-GCM(key, nonce(iv, counter), aad = "", plaintext) || tag (16)
//! ```
//!
//! Each direction owns its own [`TrafficKey`] and counter. Installing a new
//! key resets that direction's counter to zero.

use aes_gcm::{
    Aes128Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use zeroize::Zeroize;

use super::nonce::construct_nonce;
use crate::core::{AEAD_IV_SIZE, AEAD_KEY_SIZE, AEAD_TAG_SIZE, CryptoError};

/// Which secret a traffic key descends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// Derived from the handshake secret; protects the Verify messages.
    Handshake,
    /// Derived from the master secret; protects application traffic.
    App,
}

/// AES-128-GCM key and IV for one direction.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct TrafficKey {
    key: [u8; AEAD_KEY_SIZE],
    iv: [u8; AEAD_IV_SIZE],
    level: SecurityLevel,
}

impl TrafficKey {
    /// Create a traffic key from raw material.
    pub fn new(key: [u8; AEAD_KEY_SIZE], iv: [u8; AEAD_IV_SIZE], level: SecurityLevel) -> Self {
        Self { key, iv, level }
    }

    /// The level this key protects.
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Exposes key material.
    pub fn key_bytes(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.key
    }

    /// Raw IV bytes.
    pub fn iv(&self) -> &[u8; AEAD_IV_SIZE] {
        &self.iv
    }
}

impl Drop for TrafficKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for TrafficKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficKey")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Seal `plaintext` as record number `counter`.
pub fn seal(key: &TrafficKey, counter: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Gcm::new(&Key::<Aes128Gcm>::from(key.key));
    let nonce = construct_nonce(&key.iv, counter);
    cipher
        .encrypt(&Nonce::from(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Open record number `counter`.
///
/// Any tag mismatch, including records shorter than a tag, is
/// `AuthenticationFailure`.
pub fn open(key: &TrafficKey, counter: u64, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if record.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::AuthenticationFailure);
    }
    let cipher = Aes128Gcm::new(&Key::<Aes128Gcm>::from(key.key));
    let nonce = construct_nonce(&key.iv, counter);
    cipher
        .decrypt(&Nonce::from(nonce), record)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

#[derive(Debug)]
struct Direction {
    key: TrafficKey,
    counter: u64,
}

impl Direction {
    fn next_counter(&mut self) -> Result<u64, CryptoError> {
        // u64::MAX is never used so the counter cannot wrap onto a used nonce.
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhaustion);
        }
        let counter = self.counter;
        self.counter += 1;
        Ok(counter)
    }
}

/// Per-connection record protection state.
///
/// Until a direction has a key installed its payloads pass through in the
/// clear; that only happens for the two hello messages.
#[derive(Debug, Default)]
pub struct EncryptionEngine {
    tx: Option<Direction>,
    rx: Option<Direction>,
}

impl EncryptionEngine {
    /// Create an engine with no keys installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Protect an outgoing payload.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.tx.as_mut() {
            None => Ok(plaintext.to_vec()),
            Some(dir) => {
                let counter = dir.next_counter()?;
                seal(&dir.key, counter, plaintext)
            }
        }
    }

    /// Unprotect an incoming payload.
    ///
    /// The receive counter only advances on success.
    pub fn open(&mut self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.rx.as_mut() {
            None => Ok(record.to_vec()),
            Some(dir) => {
                if dir.counter == u64::MAX {
                    return Err(CryptoError::CounterExhaustion);
                }
                let plaintext = open(&dir.key, dir.counter, record)?;
                dir.counter += 1;
                Ok(plaintext)
            }
        }
    }

    /// Replace the transmit key and restart its counter.
    pub fn update_tx_key(&mut self, key: TrafficKey) {
        self.tx = Some(Direction { key, counter: 0 });
    }

    /// Replace the receive key and restart its counter.
    pub fn update_rx_key(&mut self, key: TrafficKey) {
        self.rx = Some(Direction { key, counter: 0 });
    }

    /// Level of the installed transmit key, if any.
    pub fn tx_level(&self) -> Option<SecurityLevel> {
        self.tx.as_ref().map(|d| d.key.level())
    }

    /// Level of the installed receive key, if any.
    pub fn rx_level(&self) -> Option<SecurityLevel> {
        self.rx.as_ref().map(|d| d.key.level())
    }

    /// Records sealed under the current transmit key.
    pub fn tx_counter(&self) -> u64 {
        self.tx.as_ref().map_or(0, |d| d.counter)
    }

    /// Records opened under the current receive key.
    pub fn rx_counter(&self) -> u64 {
        self.rx.as_ref().map_or(0, |d| d.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> TrafficKey {
        let key: [u8; AEAD_KEY_SIZE] = std::array::from_fn(|i| i as u8);
        let iv: [u8; AEAD_IV_SIZE] = std::array::from_fn(|i| 0xA0 + i as u8);
        TrafficKey::new(key, iv, SecurityLevel::App)
    }

    fn payload() -> Vec<u8> {
        (0u8..32).collect()
    }

    const EXPECTED_RECORDS: [&str; 5] = [
        "fcee691d22c779b3a1a6d8a277507065",
        "3ffb6499aeef8ae80fa21c86026b4f7b59da6175e8a0504c34ad70cb79f34605100b06d6ccf565bce4a95e08c87d8ddb",
        "e3cf5ed08f4cc7c13cd8c6c8d69599236b2d0c74db35ba0d65b4de0405300d1005ab13a1681f986f54e42846b8631611",
        "8e6b75fc606f5e19f569f8df8c12d1e8315689ed020b68accd031dc2e76351c0952b06e040eaea8eb75022aca3ec7d28",
        "2c6d69aa8768bade7d14a8c1850ebdba51dd3de0ea6943ab2b88052677224ee87698e8a47c0415ad449fc43327356515",
    ];

    #[test]
    fn test_known_answer_sequence() {
        let mut engine = EncryptionEngine::new();
        engine.update_tx_key(test_key());

        let empty = engine.seal(&[]).unwrap();
        assert_eq!(hex::encode(&empty), EXPECTED_RECORDS[0]);
        assert_eq!(empty.len(), AEAD_TAG_SIZE);

        for expected in &EXPECTED_RECORDS[1..] {
            let record = engine.seal(&payload()).unwrap();
            assert_eq!(hex::encode(&record), *expected);
        }
        assert_eq!(engine.tx_counter(), 5);
    }

    #[test]
    fn test_open_follows_counter() {
        let mut engine = EncryptionEngine::new();
        engine.update_rx_key(test_key());

        assert_eq!(
            engine.open(&hex::decode(EXPECTED_RECORDS[0]).unwrap()).unwrap(),
            Vec::<u8>::new()
        );
        for expected in &EXPECTED_RECORDS[1..] {
            let plain = engine.open(&hex::decode(expected).unwrap()).unwrap();
            assert_eq!(plain, payload());
        }
    }

    #[test]
    fn test_out_of_order_record_fails() {
        let mut engine = EncryptionEngine::new();
        engine.update_rx_key(test_key());
        let second = hex::decode(EXPECTED_RECORDS[1]).unwrap();
        assert_eq!(
            engine.open(&second),
            Err(CryptoError::AuthenticationFailure)
        );
        // Failure does not consume a counter value.
        assert_eq!(engine.rx_counter(), 0);
    }

    #[test]
    fn test_tampered_record_fails() {
        let mut record = hex::decode(EXPECTED_RECORDS[1]).unwrap();
        record[3] ^= 0x01;
        assert_eq!(
            open(&test_key(), 1, &record),
            Err(CryptoError::AuthenticationFailure)
        );

        let mut record = hex::decode(EXPECTED_RECORDS[1]).unwrap();
        let last = record.len() - 1;
        record[last] ^= 0x80;
        assert!(open(&test_key(), 1, &record).is_err());
    }

    #[test]
    fn test_short_record_fails() {
        assert_eq!(
            open(&test_key(), 0, &[0u8; AEAD_TAG_SIZE - 1]),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_passthrough_without_keys() {
        let mut engine = EncryptionEngine::new();
        assert_eq!(engine.seal(b"hello").unwrap(), b"hello");
        assert_eq!(engine.open(b"hello").unwrap(), b"hello");
        assert_eq!(engine.tx_level(), None);
    }

    #[test]
    fn test_key_update_resets_counter() {
        let mut engine = EncryptionEngine::new();
        engine.update_tx_key(test_key());
        engine.seal(b"a").unwrap();
        engine.seal(b"b").unwrap();
        assert_eq!(engine.tx_counter(), 2);

        engine.update_tx_key(test_key());
        assert_eq!(engine.tx_counter(), 0);
        let first = engine.seal(&[]).unwrap();
        assert_eq!(hex::encode(first), EXPECTED_RECORDS[0]);
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut engine = EncryptionEngine::new();
        engine.update_tx_key(test_key());
        if let Some(dir) = engine.tx.as_mut() {
            dir.counter = u64::MAX - 1;
        }
        assert!(engine.seal(b"last").is_ok());
        assert_eq!(engine.seal(b"over"), Err(CryptoError::CounterExhaustion));
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", test_key());
        assert!(rendered.contains("App"));
        assert!(!rendered.contains("0, 1, 2"));
    }
}
