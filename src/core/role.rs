//! Endpoint role.

/// Which end of the connection this endpoint is.
///
/// The client sends the first handshake message and opens even-numbered
/// streams; the server answers and opens odd-numbered ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake (the phone app in production).
    Client,
    /// Answers the handshake (the headset in production).
    Server,
}

impl Role {
    /// The other end.
    pub fn peer(self) -> Self {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }

    /// Low bit of every stream id this role opens.
    pub fn stream_initiator_bit(self) -> u64 {
        match self {
            Role::Client => 0,
            Role::Server => 1,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}
