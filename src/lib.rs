//! # QLIC
//!
//! A QUIC-style secure multiplexed transport for constrained point-to-point
//! links: Bluetooth L2CAP channels and any other ordered, reliable byte pipe.
//!
//! QLIC keeps QUIC's frame vocabulary, TLS 1.3-style key schedule and stream
//! multiplexing, and drops everything an ordered link already provides:
//! there is no packet number, no loss recovery and no congestion control.
//!
//! - **Security**: AES-128-GCM records, HKDF-SHA384 key schedule, key update
//! - **Authentication**: pre-shared secret or attested certificate chains
//! - **Multiplexing**: bidirectional message streams over one link
//! - **Lifecycle**: a session controller with status events and reconnect
//!
//! ## Feature Flags
//!
//! - `transport` (default): packet framing, read/write engines, link adapters
//! - `crypto` (default): record protection, key schedule, handshake
//! - `session` (default): connections, streams, session controller
//!
//! ## Modules
//!
//! - [`core`]: constants, shared error types, roles, link traits (always included)
//! - [`codec`]: varint and frame codecs (always included)
//! - [`crypto`]: record protection and key schedule (requires `crypto`)
//! - [`handshake`]: handshake engine and peer authentication (requires `crypto`)
//! - [`transport`]: packet layer over a link (requires `transport`)
//! - [`connection`]: connection run loop and streams (requires `session`)
//! - [`session`]: connection lifecycle and reconnect (requires `session`)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use qlic::prelude::*;
//!
//! # async fn example() -> Result<(), ConnectionError> {
//! let (client_link, server_link) = memory_link_pair(DEFAULT_MTU);
//! let client = ConnectionConfig::pretrusted(Role::Client, b"shared key".to_vec(), b"salt".to_vec());
//! let server = ConnectionConfig::pretrusted(Role::Server, b"shared key".to_vec(), b"salt".to_vec());
//!
//! let (client, server) = tokio::join!(
//!     Connection::establish(client_link, client),
//!     Connection::establish(server_link, server),
//! );
//! let (client, _client_task) = client?;
//! let (server, _server_task) = server?;
//!
//! let mut stream = client.open_stream().await?;
//! stream.send(b"hello").await.ok();
//!
//! let mut incoming = server.accept_stream().await?;
//! assert_eq!(incoming.recv().await.ok().flatten(), Some(b"hello".to_vec()));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire codecs (always included)
pub mod codec;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Handshake and peer authentication (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod handshake;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Connections and streams (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod connection;

// Session controller (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core constants, errors and traits
    pub use crate::core::*;

    pub use crate::codec::Frame;

    #[cfg(feature = "crypto")]
    pub use crate::handshake::{
        AttestedConfig, PeerIdentity, PeerVerifier, PolicyTrustManager, PreSharedSecret,
        TrustManager, TrustMode,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{IoLink, TransportError, memory_connector, memory_link_pair};

    #[cfg(feature = "session")]
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionError, ConnectionMetadata, ConnectionOutcome,
        ConnectionPhase, ConnectionTask, ErrorCategory, Stream, StreamError,
    };

    #[cfg(feature = "session")]
    pub use crate::session::{ConnectionStatus, DisconnectReason, Session, SessionConfig};
}

// Re-export commonly used items at crate root
pub use crate::core::{CryptoError, FrameError, Role, VarintError};

#[cfg(feature = "session")]
pub use connection::{Connection, ConnectionConfig, ConnectionError, Stream, StreamError};

#[cfg(feature = "session")]
pub use session::{ConnectionStatus, Session, SessionConfig};
