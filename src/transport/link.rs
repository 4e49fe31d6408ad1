//! Link adapters.
//!
//! [`IoLink`] turns any tokio byte stream into a [`Link`]. The in-memory
//! helpers wire two endpoints together inside one process, which is how
//! tests and simulators stand in for a Bluetooth channel.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::core::{Link, LinkConnector};

/// Any `AsyncRead + AsyncWrite` stream with a caller-given MTU.
#[derive(Debug)]
pub struct IoLink<T> {
    inner: T,
    mtu: usize,
}

impl<T> IoLink<T> {
    /// Wrap `inner`, advertising `mtu`.
    pub fn new(inner: T, mtu: usize) -> Self {
        Self { inner, mtu }
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for IoLink<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for IoLink<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<T> Link for IoLink<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn mtu(&self) -> usize {
        self.mtu
    }
}

/// One end of an in-memory link.
pub type MemoryLink = IoLink<DuplexStream>;

/// Two connected in-memory links.
///
/// Each direction buffers up to 16 MTUs before writes wait.
pub fn memory_link_pair(mtu: usize) -> (MemoryLink, MemoryLink) {
    let mtu = mtu.max(1);
    let (a, b) = tokio::io::duplex(mtu.saturating_mul(16));
    (IoLink::new(a, mtu), IoLink::new(b, mtu))
}

/// [`LinkConnector`] that hands the far end of every new in-memory link to a
/// [`MemoryAcceptor`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    mtu: usize,
    peers: mpsc::Sender<MemoryLink>,
}

/// Receives the far ends produced by a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    peers: mpsc::Receiver<MemoryLink>,
}

impl MemoryAcceptor {
    /// Wait for the next incoming link. `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.peers.recv().await
    }
}

/// Create a connector/acceptor pair.
pub fn memory_connector(mtu: usize) -> (MemoryConnector, MemoryAcceptor) {
    let (peers_tx, peers_rx) = mpsc::channel(4);
    (
        MemoryConnector {
            mtu,
            peers: peers_tx,
        },
        MemoryAcceptor { peers: peers_rx },
    )
}

impl LinkConnector for MemoryConnector {
    type Link = MemoryLink;

    async fn connect(&self) -> io::Result<MemoryLink> {
        let (local, remote) = memory_link_pair(self.mtu);
        self.peers
            .send(remote)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "acceptor gone"))?;
        Ok(local)
    }
}
