//! Transport read engine.
//!
//! [`PacketParser`] is the pure incremental state machine: bytes go in as
//! they arrive, whole packets come out. [`PacketReader`] drives it from an
//! `AsyncRead`, reading whatever the link has available each time and
//! publishing a running byte count.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use super::error::TransportError;
use super::packet::{Packet, PacketHeader};
use crate::core::MAX_PACKET_PAYLOAD;

/// Incremental packet parser.
///
/// A packet may arrive split across any number of pushes, and one push may
/// carry several packets.
#[derive(Debug, Default)]
pub struct PacketParser {
    buf: Vec<u8>,
    header: Option<PacketHeader>,
}

impl PacketParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held after the last complete packet, excluding a parsed header.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Check if the parser sits exactly on a packet boundary.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && self.header.is_none()
    }

    /// Take the next complete packet, if one is buffered.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        let header = match self.header {
            Some(header) => header,
            None => {
                let Some((header, used)) = PacketHeader::parse(&self.buf)? else {
                    return Ok(None);
                };
                self.buf.drain(..used);
                self.header = Some(header);
                header
            }
        };
        if self.buf.len() < header.payload_len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..header.payload_len).collect();
        self.header = None;
        Ok(Some(Packet { header, payload }))
    }
}

/// Reads packets from a link.
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
    parser: PacketParser,
    read_buf: Vec<u8>,
    total: u64,
    bytes_read: watch::Sender<u64>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Wrap the read half of a link. `mtu` sizes the read buffer.
    pub fn new(inner: R, mtu: usize) -> Self {
        let (bytes_read, _) = watch::channel(0);
        Self {
            inner,
            parser: PacketParser::new(),
            read_buf: vec![0u8; mtu.clamp(1, MAX_PACKET_PAYLOAD)],
            total: 0,
            bytes_read,
        }
    }

    /// Subscribe to the running count of bytes read from the link.
    pub fn bytes_read(&self) -> watch::Receiver<u64> {
        self.bytes_read.subscribe()
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` when the link closes on a packet boundary and
    /// `UnexpectedClose` when it closes inside one.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            if let Some(packet) = self.parser.next_packet()? {
                return Ok(Some(packet));
            }
            let n = self.inner.read(&mut self.read_buf).await?;
            if n == 0 {
                if self.parser.is_idle() {
                    return Ok(None);
                }
                return Err(TransportError::UnexpectedClose {
                    buffered: self.parser.buffered(),
                });
            }
            self.total += n as u64;
            self.bytes_read.send_replace(self.total);
            self.parser.push(&self.read_buf[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::AsyncWriteExt;

    fn wire(payloads: &[Vec<u8>]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| Packet::new(false, p.clone()).to_bytes().unwrap())
            .collect()
    }

    #[test]
    fn test_one_shot() {
        let mut parser = PacketParser::new();
        parser.push(&wire(&[b"hello".to_vec(), Vec::new(), b"world".to_vec()]));
        assert_eq!(parser.next_packet().unwrap().unwrap().payload, b"hello");
        assert_eq!(parser.next_packet().unwrap().unwrap().payload, b"");
        assert_eq!(parser.next_packet().unwrap().unwrap().payload, b"world");
        assert!(parser.next_packet().unwrap().is_none());
        assert!(parser.is_idle());
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = wire(&[vec![7; 300]]);
        let mut parser = PacketParser::new();
        for (i, byte) in bytes.iter().enumerate() {
            parser.push(&[*byte]);
            let packet = parser.next_packet().unwrap();
            assert_eq!(packet.is_some(), i == bytes.len() - 1);
        }
    }

    #[tokio::test]
    async fn test_reader_counts_bytes_and_reports_eof() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(rx, 16);
        let counter = reader.bytes_read();

        let bytes = wire(&[vec![1; 40], vec![2; 3]]);
        tx.write_all(&bytes).await.unwrap();
        drop(tx);

        assert_eq!(reader.read_packet().await.unwrap().unwrap().payload, vec![1; 40]);
        assert_eq!(reader.read_packet().await.unwrap().unwrap().payload, vec![2; 3]);
        assert!(reader.read_packet().await.unwrap().is_none());
        assert_eq!(*counter.borrow(), bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_reader_close_mid_packet() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(rx, 64);
        let bytes = wire(&[vec![9; 20]]);
        tx.write_all(&bytes[..10]).await.unwrap();
        drop(tx);

        assert!(matches!(
            reader.read_packet().await,
            Err(TransportError::UnexpectedClose { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_split_points_reassemble(
            payload in proptest::collection::vec(any::<u8>(), 1..2048),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let bytes = wire(&[payload.clone()]);
            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len())).collect();
            points.push(bytes.len());
            points.sort_unstable();
            points.dedup();

            let mut parser = PacketParser::new();
            let mut packets = Vec::new();
            let mut start = 0;
            for end in points {
                parser.push(&bytes[start..end]);
                start = end;
                while let Some(packet) = parser.next_packet().unwrap() {
                    packets.push(packet);
                }
            }
            prop_assert_eq!(packets, vec![Packet::new(false, payload)]);
            prop_assert!(parser.is_idle());
        }
    }
}
