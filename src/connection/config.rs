//! Per-connection configuration.

use crate::core::{DEFAULT_MAX_PACKET_PLAINTEXT, DEFAULT_SEND_WINDOW, MAX_STREAM_CHUNK, Role};
use crate::crypto::KeyUpdatePolicy;
use crate::handshake::{PreSharedSecret, TrustMode};

/// Settings for one connection attempt. Supplied by the caller; nothing
/// here is derived internally.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Which end of the link this is.
    pub role: Role,
    /// How the peer is authenticated.
    pub trust_mode: TrustMode,
    /// Largest packet plaintext this side produces.
    pub max_packet_plaintext: usize,
    /// Unacknowledged stream bytes allowed in flight.
    pub send_window: u64,
    /// Unacknowledged stream bytes accepted from the peer. Must be at least
    /// the peer's send window.
    pub receive_window: u64,
    /// When to roll the transmit key forward.
    pub key_update: KeyUpdatePolicy,
}

impl ConnectionConfig {
    /// Config with defaults for everything but role and trust mode.
    pub fn new(role: Role, trust_mode: TrustMode) -> Self {
        Self {
            role,
            trust_mode,
            max_packet_plaintext: DEFAULT_MAX_PACKET_PLAINTEXT,
            send_window: DEFAULT_SEND_WINDOW,
            receive_window: DEFAULT_SEND_WINDOW,
            key_update: KeyUpdatePolicy::default(),
        }
    }

    /// Start a builder.
    pub fn builder(role: Role, trust_mode: TrustMode) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self::new(role, trust_mode),
        }
    }

    /// Pretrusted config from a key and salt.
    pub fn pretrusted(role: Role, key: impl Into<Vec<u8>>, salt: impl Into<Vec<u8>>) -> Self {
        Self::new(role, TrustMode::Pretrusted(PreSharedSecret::new(key, salt)))
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the largest packet plaintext. Never below one full stream chunk.
    pub fn max_packet_plaintext(mut self, size: usize) -> Self {
        self.config.max_packet_plaintext = size.max(MAX_STREAM_CHUNK + 64);
        self
    }

    /// Set the send window.
    pub fn send_window(mut self, bytes: u64) -> Self {
        self.config.send_window = bytes.max(1);
        self
    }

    /// Set the receive window.
    pub fn receive_window(mut self, bytes: u64) -> Self {
        self.config.receive_window = bytes.max(1);
        self
    }

    /// Set the key-update policy.
    pub fn key_update(mut self, policy: KeyUpdatePolicy) -> Self {
        self.config.key_update = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}
