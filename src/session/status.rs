//! Session status events.

use std::fmt;
use std::sync::Arc;

use crate::connection::{ConnectionError, ConnectionMetadata, ConnectionOutcome};

/// Why a connection ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// This side closed the connection.
    LocalClose {
        /// Close code sent.
        code: u64,
        /// Reason sent.
        reason: String,
    },
    /// The peer closed the connection.
    PeerClose {
        /// Close code received.
        code: u64,
        /// Reason received.
        reason: String,
    },
    /// The link ended cleanly.
    LinkClosed,
    /// The session was closed before a connection was established.
    SessionClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::LocalClose { code, reason } => {
                write!(f, "closed locally ({code:#x}): {reason}")
            }
            DisconnectReason::PeerClose { code, reason } => {
                write!(f, "closed by peer ({code:#x}): {reason}")
            }
            DisconnectReason::LinkClosed => f.write_str("link closed"),
            DisconnectReason::SessionClosed => f.write_str("session closed"),
        }
    }
}

/// Lifecycle event published by a [`Session`](super::Session).
///
/// Each event replaces the previous one; consumers should treat `Error` and
/// `Disconnected` as the end of every stream opened on the old connection.
#[derive(Debug, Clone)]
pub enum ConnectionStatus {
    /// A connection attempt started.
    ConnectStart,
    /// The handshake completed.
    Connected {
        /// Facts about the new connection.
        metadata: ConnectionMetadata,
    },
    /// The attempt or connection ended with an error.
    Error {
        /// What went wrong.
        cause: Arc<ConnectionError>,
    },
    /// The connection ended without an error.
    Disconnected {
        /// How it ended.
        reason: DisconnectReason,
    },
}

impl ConnectionStatus {
    /// Check if this status ends a connection attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Error { .. } | ConnectionStatus::Disconnected { .. }
        )
    }

    /// Check if this is `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }
}

impl From<ConnectionOutcome> for ConnectionStatus {
    fn from(outcome: ConnectionOutcome) -> Self {
        let reason = match outcome {
            ConnectionOutcome::Failed(err) => {
                return ConnectionStatus::Error {
                    cause: Arc::new(err),
                };
            }
            ConnectionOutcome::LocalClose { code, reason } => {
                DisconnectReason::LocalClose { code, reason }
            }
            ConnectionOutcome::PeerClose { code, reason } => {
                DisconnectReason::PeerClose { code, reason }
            }
            ConnectionOutcome::LinkClosed => DisconnectReason::LinkClosed,
        };
        ConnectionStatus::Disconnected { reason }
    }
}

impl From<ConnectionError> for ConnectionStatus {
    fn from(err: ConnectionError) -> Self {
        ConnectionStatus::Error {
            cause: Arc::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        let status = ConnectionStatus::from(ConnectionOutcome::LinkClosed);
        assert!(matches!(
            status,
            ConnectionStatus::Disconnected {
                reason: DisconnectReason::LinkClosed
            }
        ));
        assert!(status.is_terminal());

        let status = ConnectionStatus::from(ConnectionOutcome::Failed(
            ConnectionError::ProtocolViolation("x"),
        ));
        assert!(matches!(status, ConnectionStatus::Error { .. }));

        let status = ConnectionStatus::from(ConnectionOutcome::PeerClose {
            code: 3,
            reason: "bye".into(),
        });
        match status {
            ConnectionStatus::Disconnected { reason } => {
                assert_eq!(reason.to_string(), "closed by peer (0x3): bye")
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn test_connect_start_is_not_terminal() {
        assert!(!ConnectionStatus::ConnectStart.is_terminal());
        assert!(!ConnectionStatus::ConnectStart.is_connected());
    }
}
