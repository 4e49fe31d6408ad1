//! Transport write engine.
//!
//! Chunks are appended to one pending buffer and written out in MTU-sized
//! pieces, so a burst of small packets costs one link write per MTU rather
//! than one per packet. The pending buffer never holds more than one MTU
//! plus the chunk being added; callers get backpressure from the bounded
//! queue feeding the writer.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use super::error::TransportError;

/// Writes packet bytes to a link.
#[derive(Debug)]
pub struct PacketWriter<W> {
    inner: W,
    mtu: usize,
    pending: Vec<u8>,
    total: u64,
    writes: u64,
    bytes_written: watch::Sender<u64>,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// Wrap the write half of a link.
    pub fn new(inner: W, mtu: usize) -> Self {
        let mtu = mtu.max(1);
        let (bytes_written, _) = watch::channel(0);
        Self {
            inner,
            mtu,
            pending: Vec::with_capacity(mtu * 2),
            total: 0,
            writes: 0,
            bytes_written,
        }
    }

    /// Subscribe to the running count of bytes written to the link.
    pub fn bytes_written(&self) -> watch::Receiver<u64> {
        self.bytes_written.subscribe()
    }

    /// Number of link writes issued so far.
    pub fn write_calls(&self) -> u64 {
        self.writes
    }

    /// Bytes queued but not yet written.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue chunks, writing every full MTU as it fills.
    ///
    /// A tail shorter than one MTU stays queued until [`flush`](Self::flush).
    pub async fn send<I>(&mut self, chunks: I) -> Result<(), TransportError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        for chunk in chunks {
            self.pending.extend_from_slice(chunk.as_ref());
            while self.pending.len() >= self.mtu {
                self.write_front(self.mtu).await?;
            }
        }
        Ok(())
    }

    /// Write everything queued and flush the link.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        while !self.pending.is_empty() {
            let len = self.pending.len().min(self.mtu);
            self.write_front(len).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the write half.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn write_front(&mut self, len: usize) -> Result<(), TransportError> {
        let n = self.inner.write(&self.pending[..len]).await?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        self.pending.drain(..n);
        self.writes += 1;
        self.total += n as u64;
        self.bytes_written.send_replace(self.total);
        Ok(())
    }
}
