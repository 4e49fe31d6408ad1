//! Core traits for QLIC.
//!
//! The physical link (Bluetooth L2CAP in production) is an external
//! collaborator: QLIC never discovers or opens it. These traits are the seam
//! platform adapters implement.

#[cfg(feature = "transport")]
use std::future::Future;
#[cfg(feature = "transport")]
use std::io;

#[cfg(feature = "transport")]
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected, order-preserving duplex byte stream.
///
/// Reads report whatever bytes are currently available; writes accept
/// whatever capacity the link currently has. Dropping the link closes it.
#[cfg(feature = "transport")]
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Preferred maximum transmit unit of the link, in bytes.
    fn mtu(&self) -> usize;
}

/// Acquires a fresh [`Link`] for each connection attempt.
///
/// # Example
///
/// ```ignore
/// struct L2capConnector { psm: u16 }
///
/// impl LinkConnector for L2capConnector {
///     type Link = IoLink<PlatformChannel>;
///
///     async fn connect(&self) -> io::Result<Self::Link> {
///         let channel = PlatformChannel::open(self.psm).await?;
///         let mtu = channel.mtu();
///         Ok(IoLink::new(channel, mtu))
///     }
/// }
/// ```
#[cfg(feature = "transport")]
pub trait LinkConnector: Send + Sync + 'static {
    /// The link type produced.
    type Link: Link;

    /// Open a new link to the peer.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Link>> + Send;
}
