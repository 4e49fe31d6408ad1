//! Running SHA-384 transcript hash over encoded handshake messages.

use sha2::{Digest, Sha384};

use crate::core::HASH_SIZE;

/// Both sides feed the same encoded messages in the same order, so their
/// snapshots agree exactly when they saw the same handshake.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    hasher: Sha384,
}

impl Transcript {
    /// Start an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one encoded handshake message.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Hash of everything appended so far. The transcript keeps running.
    pub fn current_hash(&self) -> [u8; HASH_SIZE] {
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&self.hasher.clone().finalize());
        out
    }
}
