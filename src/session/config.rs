//! Session configuration.

use std::time::Duration;

use crate::connection::ConnectionConfig;
use crate::core::DEFAULT_RECONNECT_DELAY;

/// Settings for a [`Session`](super::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Used for every connection attempt.
    pub connection: ConnectionConfig,
    /// Start a fresh attempt whenever a connection ends.
    pub auto_reconnect: bool,
    /// Pause between attempts.
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    /// Single-attempt session.
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            auto_reconnect: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Start a builder.
    pub fn builder(connection: ConnectionConfig) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::new(connection),
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Enable or disable auto-reconnect.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set the pause between attempts.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
