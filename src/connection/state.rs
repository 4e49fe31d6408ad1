//! Connection lifecycle.

/// Connection phase.
///
/// ```text
/// Idle -> Handshaking -> Connected -> Closing -> Closed
///               \             \
///                +-------------+--> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Link acquired, nothing sent yet.
    Idle,
    /// Handshake in progress; only handshake frames accepted.
    Handshaking,
    /// App keys installed; streams usable.
    Connected,
    /// Close sent, shutting down.
    Closing,
    /// Closed cleanly by either side.
    Closed,
    /// Ended by a fatal error.
    Error,
}

impl ConnectionPhase {
    /// Check if the connection has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionPhase::Closed | ConnectionPhase::Error)
    }

    /// Check if stream and flow frames may be exchanged.
    pub fn is_connected(self) -> bool {
        self == ConnectionPhase::Connected
    }

    /// Check if moving to `next` follows the lifecycle.
    pub fn can_transition_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        match (self, next) {
            (Idle, Handshaking) => true,
            (Handshaking, Connected) => true,
            (Idle | Handshaking | Connected, Closing) => true,
            (Closing, Closed) => true,
            (Idle | Handshaking | Connected, Closed) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        use ConnectionPhase::*;
        assert!(Idle.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Handshaking.can_transition_to(Error));
        assert!(Closing.can_transition_to(Error));
    }

    #[test]
    fn test_no_way_back() {
        use ConnectionPhase::*;
        assert!(!Connected.can_transition_to(Handshaking));
        assert!(!Closed.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Connected));
        assert!(Closed.is_terminal() && Error.is_terminal());
        assert!(!Closing.is_terminal());
    }
}
