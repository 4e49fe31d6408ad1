//! Connection and stream error types.

use std::io;

use thiserror::Error;

use crate::core::{
    CLOSE_FLOW_CONTROL_ERROR, CLOSE_FRAME_ENCODING_ERROR, CLOSE_HANDSHAKE_FAILED, CLOSE_INTERNAL_ERROR,
    CLOSE_PROTOCOL_VIOLATION, CLOSE_STREAM_STATE_ERROR, CryptoError, FrameError,
};
use crate::handshake::HandshakeError;
use crate::transport::TransportError;

/// Error classes that decide how a failure is reported and whether the
/// connection survives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Truncated or unrecognized frame or packet.
    Framing,
    /// AEAD tag mismatch, bad signature, chain or trust rejection.
    Authentication,
    /// Link read/write failure or unexpected close.
    Link,
    /// Peer broke the protocol state machine.
    Protocol,
    /// Local misuse or local resource limits.
    Local,
}

/// Errors that end (or refuse) a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A frame failed to decode.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The packet layer failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Record protection failed.
    #[error("record protection failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Peer broke the connection state machine.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Peer broke a stream state machine.
    #[error("stream state violation on stream {stream_id}: {reason}")]
    StreamState {
        /// Offending stream.
        stream_id: u64,
        /// What went wrong.
        reason: &'static str,
    },

    /// Peer sent more than this side agreed to buffer.
    #[error("flow control violation: {0}")]
    FlowControl(&'static str),

    /// Peer closed with a transport error.
    #[error("peer closed connection with code {code:#x}: {reason}")]
    PeerError {
        /// Close code.
        code: u64,
        /// Reason phrase.
        reason: String,
    },

    /// Link could not be acquired.
    #[error("link connect failed: {0}")]
    Connect(io::Error),

    /// Operation needs an established connection.
    #[error("connection not established")]
    NotConnected,

    /// Connection is already closed.
    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConnectionError::Frame(_) => ErrorCategory::Framing,
            ConnectionError::Transport(e) if e.is_framing() => ErrorCategory::Framing,
            ConnectionError::Transport(_) | ConnectionError::Connect(_) => ErrorCategory::Link,
            ConnectionError::Handshake(e) if e.is_authentication_failure() => {
                ErrorCategory::Authentication
            }
            ConnectionError::Crypto(CryptoError::AuthenticationFailure) => {
                ErrorCategory::Authentication
            }
            ConnectionError::Handshake(_)
            | ConnectionError::ProtocolViolation(_)
            | ConnectionError::StreamState { .. }
            | ConnectionError::FlowControl(_)
            | ConnectionError::PeerError { .. } => ErrorCategory::Protocol,
            ConnectionError::Crypto(_) | ConnectionError::NotConnected | ConnectionError::Closed => {
                ErrorCategory::Local
            }
        }
    }

    /// Check if the connection must be torn down.
    ///
    /// Only caller-misuse errors leave the connection usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConnectionError::NotConnected | ConnectionError::Closed)
    }

    /// Close code and offending frame type to send to the peer, if the
    /// link is still worth writing to.
    ///
    /// Authentication and handshake failures all map to one generic code
    /// with no reason phrase.
    pub(crate) fn close_code(&self) -> Option<(u64, u64)> {
        match self {
            ConnectionError::Frame(e) => {
                Some((CLOSE_FRAME_ENCODING_ERROR, e.frame_type.unwrap_or(0)))
            }
            ConnectionError::Transport(e) if e.is_framing() => Some((CLOSE_FRAME_ENCODING_ERROR, 0)),
            ConnectionError::Transport(_)
            | ConnectionError::Connect(_)
            | ConnectionError::PeerError { .. }
            | ConnectionError::NotConnected
            | ConnectionError::Closed => None,
            ConnectionError::Handshake(_) => Some((CLOSE_HANDSHAKE_FAILED, 0)),
            ConnectionError::Crypto(CryptoError::AuthenticationFailure) => {
                Some((CLOSE_HANDSHAKE_FAILED, 0))
            }
            ConnectionError::Crypto(_) => Some((CLOSE_INTERNAL_ERROR, 0)),
            ConnectionError::ProtocolViolation(_) => Some((CLOSE_PROTOCOL_VIOLATION, 0)),
            ConnectionError::StreamState { .. } => Some((CLOSE_STREAM_STATE_ERROR, 0)),
            ConnectionError::FlowControl(_) => Some((CLOSE_FLOW_CONTROL_ERROR, 0)),
        }
    }
}

/// Errors local to one stream. They never close the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Peer reset its sending half.
    #[error("stream reset by peer with code {0}")]
    Reset(u64),

    /// Peer asked us to stop sending.
    #[error("peer stopped the stream with code {0}")]
    Stopped(u64),

    /// Message is larger than a peer will reassemble.
    #[error("message of {0} bytes is too large")]
    MessageTooLarge(usize),

    /// Local sending half is already finished or reset.
    #[error("stream already finished")]
    Finished,

    /// Connection ended; stream state is gone.
    #[error("connection lost")]
    ConnectionLost,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FrameErrorReason;
    use crate::handshake::AttestationError;

    #[test]
    fn test_categories() {
        assert_eq!(
            ConnectionError::from(FrameError::unrecognized(0x03)).category(),
            ErrorCategory::Framing
        );
        assert_eq!(
            ConnectionError::from(TransportError::InvalidHeader(0x80)).category(),
            ErrorCategory::Framing
        );
        assert_eq!(
            ConnectionError::from(TransportError::UnexpectedClose { buffered: 3 }).category(),
            ErrorCategory::Link
        );
        assert_eq!(
            ConnectionError::from(CryptoError::AuthenticationFailure).category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ConnectionError::from(HandshakeError::from(AttestationError::ChallengeMismatch))
                .category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ConnectionError::ProtocolViolation("x").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(ConnectionError::NotConnected.category(), ErrorCategory::Local);
    }

    #[test]
    fn test_close_codes_hide_auth_detail() {
        let bad_sig = ConnectionError::from(HandshakeError::BadSignature);
        let bad_chain =
            ConnectionError::from(HandshakeError::from(AttestationError::UntrustedAnchor));
        let bad_tag = ConnectionError::from(CryptoError::AuthenticationFailure);
        assert_eq!(bad_sig.close_code(), Some((CLOSE_HANDSHAKE_FAILED, 0)));
        assert_eq!(bad_chain.close_code(), bad_sig.close_code());
        assert_eq!(bad_tag.close_code(), bad_sig.close_code());
    }

    #[test]
    fn test_framing_close_reports_frame_type() {
        let err = ConnectionError::from(FrameError {
            frame_type: Some(0x1D),
            reason: FrameErrorReason::InvalidUtf8,
        });
        assert_eq!(err.close_code(), Some((CLOSE_FRAME_ENCODING_ERROR, 0x1D)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_flow_control_close_code() {
        let err = ConnectionError::FlowControl("receive window exceeded");
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert_eq!(err.close_code(), Some((CLOSE_FLOW_CONTROL_ERROR, 0)));
    }

    #[test]
    fn test_misuse_is_not_fatal() {
        assert!(!ConnectionError::NotConnected.is_fatal());
        assert!(ConnectionError::from(TransportError::ConnectionClosed).is_fatal());
    }
}
