//! Application key updates.
//!
//! After the handshake each side may roll its transmit key forward on its
//! own schedule. The sender derives the next traffic secret, installs its
//! key and flips the key-phase bit in the packet header; the receiver sees
//! the flipped bit and derives the same next secret before opening.
//!
//! - [`KEY_UPDATE_AFTER_RECORDS`]: update once this many records have been
//!   sealed under one key
//! - [`KEY_UPDATE_INTERVAL`]: update once a key has been in use this long

use std::time::{Duration, Instant};

use crate::core::{KEY_UPDATE_AFTER_RECORDS, KEY_UPDATE_INTERVAL};

/// When to roll the transmit key forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdatePolicy {
    /// Records sealed under one key before an update.
    pub after_records: u64,
    /// Age of a key before an update.
    pub interval: Duration,
}

impl KeyUpdatePolicy {
    /// A policy that never triggers.
    pub fn disabled() -> Self {
        Self {
            after_records: u64::MAX,
            interval: Duration::MAX,
        }
    }
}

impl Default for KeyUpdatePolicy {
    fn default() -> Self {
        Self {
            after_records: KEY_UPDATE_AFTER_RECORDS,
            interval: KEY_UPDATE_INTERVAL,
        }
    }
}

/// Tracks the current key phase and when to leave it.
#[derive(Debug)]
pub struct RekeyState {
    policy: KeyUpdatePolicy,
    /// Number of updates performed so far.
    epoch: u32,
    /// When the current key was installed.
    epoch_start: Instant,
    /// Records sealed under the current key.
    sealed: u64,
}

impl RekeyState {
    /// Start at phase 0 under `policy`.
    pub fn new(policy: KeyUpdatePolicy) -> Self {
        Self {
            policy,
            epoch: 0,
            epoch_start: Instant::now(),
            sealed: 0,
        }
    }

    /// Number of updates performed.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// The header bit for the current key.
    pub fn key_phase(&self) -> bool {
        self.epoch % 2 == 1
    }

    /// Records sealed under the current key.
    pub fn sealed(&self) -> u64 {
        self.sealed
    }

    /// Count one sealed record.
    pub fn record_sealed(&mut self) {
        self.sealed = self.sealed.saturating_add(1);
    }

    /// Check if the policy asks for a new key.
    pub fn should_update(&self) -> bool {
        self.sealed >= self.policy.after_records
            || self.epoch_start.elapsed() >= self.policy.interval
    }

    /// Enter the next phase. Returns the new key-phase bit.
    pub fn advance(&mut self) -> bool {
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch_start = Instant::now();
        self.sealed = 0;
        self.key_phase()
    }
}

impl Default for RekeyState {
    fn default() -> Self {
        Self::new(KeyUpdatePolicy::default())
    }
}
