//! QLIC security layer.
//!
//! - `keys.rs`: HKDF-SHA384 key schedule and traffic secrets
//! - `aead.rs`: AES-128-GCM record protection and the per-connection engine
//! - `nonce.rs`: IV XOR counter nonce construction
//! - `rekey.rs`: application key-update policy

mod aead;
mod keys;
mod nonce;
mod rekey;

pub use aead::{EncryptionEngine, SecurityLevel, TrafficKey, open, seal};
pub use keys::{DirectionalSecrets, KeySchedule, TrafficSecret, hkdf_expand_label, hkdf_extract};
pub use nonce::construct_nonce;
pub use rekey::{KeyUpdatePolicy, RekeyState};
