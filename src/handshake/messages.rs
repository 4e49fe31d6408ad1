//! Handshake messages and their reassembly from Crypto frames.
//!
//! ```text
//! message     = [msg_type: varint][body_len: varint][body]
//! ClientHello = [trust_mode: u8][random: 32][key_share: vec]
//! ServerHello = [random: 32][key_share: vec]
//! Verify      = [chain_len: varint]{[cert: vec]}*[signature: vec]
//! ```

use super::error::HandshakeError;
use super::wire::{put_vec, take_array, take_u8, take_varint, take_vec};
use crate::codec::varint;
use crate::core::{
    HANDSHAKE_CLIENT_HELLO, HANDSHAKE_SERVER_HELLO, HANDSHAKE_VERIFY, MAX_HANDSHAKE_MESSAGE,
    RANDOM_SIZE,
};

/// Trust model announced in the ClientHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustModeKind {
    /// Both sides hold the same pre-shared secret.
    Pretrusted,
    /// Peers prove themselves with attestation certificate chains.
    Attested,
}

impl TrustModeKind {
    fn to_byte(self) -> u8 {
        match self {
            TrustModeKind::Pretrusted => 0,
            TrustModeKind::Attested => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TrustModeKind::Pretrusted),
            1 => Some(TrustModeKind::Attested),
            _ => None,
        }
    }
}

/// One handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Client's opening message.
    ClientHello {
        /// Trust model the client is configured for.
        trust_mode: TrustModeKind,
        /// Fresh client random; doubles as the attestation challenge.
        random: [u8; RANDOM_SIZE],
        /// Uncompressed SEC1 P-256 ephemeral public key.
        key_share: Vec<u8>,
    },
    /// Server's answer.
    ServerHello {
        /// Fresh server random.
        random: [u8; RANDOM_SIZE],
        /// Uncompressed SEC1 P-256 ephemeral public key.
        key_share: Vec<u8>,
    },
    /// Proof of identity over the transcript so far.
    Verify {
        /// Encoded certificates, leaf first. Empty in pretrusted mode.
        certificate_chain: Vec<Vec<u8>>,
        /// ECDSA P-256 signature, 64 bytes, or empty when unauthenticated.
        signature: Vec<u8>,
    },
}

impl HandshakeMessage {
    /// Wire type of this message.
    pub fn message_type(&self) -> u64 {
        match self {
            HandshakeMessage::ClientHello { .. } => HANDSHAKE_CLIENT_HELLO,
            HandshakeMessage::ServerHello { .. } => HANDSHAKE_SERVER_HELLO,
            HandshakeMessage::Verify { .. } => HANDSHAKE_VERIFY,
        }
    }

    /// Encode with the type and length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, HandshakeError> {
        let mut body = Vec::new();
        match self {
            HandshakeMessage::ClientHello {
                trust_mode,
                random,
                key_share,
            } => {
                body.push(trust_mode.to_byte());
                body.extend_from_slice(random);
                put_vec(&mut body, key_share)?;
            }
            HandshakeMessage::ServerHello { random, key_share } => {
                body.extend_from_slice(random);
                put_vec(&mut body, key_share)?;
            }
            HandshakeMessage::Verify {
                certificate_chain,
                signature,
            } => {
                varint::encode(certificate_chain.len() as u64, &mut body)?;
                for cert in certificate_chain {
                    put_vec(&mut body, cert)?;
                }
                put_vec(&mut body, signature)?;
            }
        }
        if body.len() > MAX_HANDSHAKE_MESSAGE {
            return Err(HandshakeError::MessageTooLarge(body.len()));
        }

        let mut out = Vec::with_capacity(body.len() + 4);
        varint::encode(self.message_type(), &mut out)?;
        put_vec(&mut out, &body)?;
        Ok(out)
    }

    /// Decode a message body of type `message_type`.
    pub fn decode_body(message_type: u64, mut body: &[u8]) -> Result<Self, HandshakeError> {
        let cursor = &mut body;
        let message = match message_type {
            HANDSHAKE_CLIENT_HELLO => {
                let trust_mode = take_u8(cursor)
                    .and_then(TrustModeKind::from_byte)
                    .ok_or(HandshakeError::Malformed("client hello trust mode"))?;
                let random = take_array(cursor).ok_or(HandshakeError::Malformed("client hello random"))?;
                let key_share = take_vec(cursor)
                    .ok_or(HandshakeError::Malformed("client hello key share"))?
                    .to_vec();
                HandshakeMessage::ClientHello {
                    trust_mode,
                    random,
                    key_share,
                }
            }
            HANDSHAKE_SERVER_HELLO => {
                let random = take_array(cursor).ok_or(HandshakeError::Malformed("server hello random"))?;
                let key_share = take_vec(cursor)
                    .ok_or(HandshakeError::Malformed("server hello key share"))?
                    .to_vec();
                HandshakeMessage::ServerHello { random, key_share }
            }
            HANDSHAKE_VERIFY => {
                let count = take_varint(cursor).ok_or(HandshakeError::Malformed("verify chain length"))?;
                let mut certificate_chain = Vec::new();
                for _ in 0..count {
                    let cert = take_vec(cursor).ok_or(HandshakeError::Malformed("verify certificate"))?;
                    certificate_chain.push(cert.to_vec());
                }
                let signature = take_vec(cursor)
                    .ok_or(HandshakeError::Malformed("verify signature"))?
                    .to_vec();
                HandshakeMessage::Verify {
                    certificate_chain,
                    signature,
                }
            }
            other => return Err(HandshakeError::UnexpectedMessage(other)),
        };
        if !cursor.is_empty() {
            return Err(HandshakeError::Malformed("trailing bytes"));
        }
        Ok(message)
    }
}

/// Collects Crypto frame bytes until whole messages are available.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buf: Vec<u8>,
}

impl MessageBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from a Crypto frame.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes waiting for the rest of their message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete message, with its raw encoding for the
    /// transcript.
    pub fn next_message(&mut self) -> Result<Option<(HandshakeMessage, Vec<u8>)>, HandshakeError> {
        let mut cursor = &self.buf[..];
        let Ok(message_type) = varint::read(&mut cursor) else {
            return Ok(None);
        };
        let Ok(body_len) = varint::read(&mut cursor) else {
            return Ok(None);
        };
        let body_len = usize::try_from(body_len).unwrap_or(usize::MAX);
        if body_len > MAX_HANDSHAKE_MESSAGE {
            return Err(HandshakeError::MessageTooLarge(body_len));
        }
        if cursor.len() < body_len {
            return Ok(None);
        }

        let header_len = self.buf.len() - cursor.len();
        let raw: Vec<u8> = self.buf.drain(..header_len + body_len).collect();
        let message = HandshakeMessage::decode_body(message_type, &raw[header_len..])?;
        Ok(Some((message, raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello() -> HandshakeMessage {
        HandshakeMessage::ClientHello {
            trust_mode: TrustModeKind::Attested,
            random: [7; RANDOM_SIZE],
            key_share: vec![4; 65],
        }
    }

    #[test]
    fn test_client_hello_layout() {
        let bytes = client_hello().encode().unwrap();
        // Body: mode (1) + random (32) + share length (2) + share (65) = 100.
        // The 65-byte share is above 63, so its length prefix is a
        // two-byte varint, and so is the body length.
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..3], &[0x40, 100]);
        assert_eq!(bytes[3], 1);
        assert_eq!(&bytes[36..38], &[0x40, 65]);
        assert_eq!(bytes.len(), 3 + 100);
    }

    #[test]
    fn test_buffer_reassembles_split_messages() {
        let verify = HandshakeMessage::Verify {
            certificate_chain: vec![vec![1, 2, 3], vec![4; 200]],
            signature: vec![9; 64],
        };
        let mut wire = client_hello().encode().unwrap();
        wire.extend(verify.encode().unwrap());

        let mut buffer = MessageBuffer::new();
        let mut seen = Vec::new();
        for chunk in wire.chunks(7) {
            buffer.push(chunk);
            while let Some((message, _)) = buffer.next_message().unwrap() {
                seen.push(message);
            }
        }
        assert_eq!(seen, vec![client_hello(), verify]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_raw_bytes_match_encoding() {
        let encoded = client_hello().encode().unwrap();
        let mut buffer = MessageBuffer::new();
        buffer.push(&encoded);
        let (_, raw) = buffer.next_message().unwrap().unwrap();
        assert_eq!(raw, encoded);
    }

    #[test]
    fn test_unknown_trust_mode_rejected() {
        let mut bytes = client_hello().encode().unwrap();
        bytes[3] = 9;
        let mut buffer = MessageBuffer::new();
        buffer.push(&bytes);
        assert!(matches!(
            buffer.next_message(),
            Err(HandshakeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let mut buffer = MessageBuffer::new();
        buffer.push(&[0x03, 0x00]);
        assert!(matches!(
            buffer.next_message(),
            Err(HandshakeError::UnexpectedMessage(0x03))
        ));
    }

    #[test]
    fn test_oversized_message_rejected_early() {
        let mut buffer = MessageBuffer::new();
        let mut header = vec![0x04];
        varint::encode((MAX_HANDSHAKE_MESSAGE + 1) as u64, &mut header).unwrap();
        buffer.push(&header);
        assert!(matches!(
            buffer.next_message(),
            Err(HandshakeError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let hello = HandshakeMessage::ServerHello {
            random: [1; RANDOM_SIZE],
            key_share: vec![4; 65],
        };
        let encoded = hello.encode().unwrap();
        // Rebuild with one extra body byte.
        let mut body = encoded[3..].to_vec();
        body.push(0);
        assert!(matches!(
            HandshakeMessage::decode_body(HANDSHAKE_SERVER_HELLO, &body),
            Err(HandshakeError::Malformed("trailing bytes"))
        ));
    }
}
