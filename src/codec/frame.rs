//! Frame encoding and decoding.
//!
//! Every frame is `[type: varint][type-specific fields]`. A packet's
//! plaintext is a concatenation of frames.
//!
//! | Type | Frame |
//! |------|-------|
//! | 0x00 | Padding |
//! | 0x01 | Ping |
//! | 0x02 | Ack `[bytes]` |
//! | 0x04 | ResetStream `[stream_id][error_code]` |
//! | 0x05 | StopSending `[stream_id][error_code]` |
//! | 0x06 | Crypto `[len][data]` |
//! | 0x08-0x0B | Stream `[stream_id][len][data]`, bit0 = fin, bit1 = message boundary |
//! | 0x1C | ProtocolClose `[error_code][frame_type][len][reason]` |
//! | 0x1D | AppClose `[error_code][len][reason]` |

use crate::core::{
    FRAME_TYPE_ACK, FRAME_TYPE_APP_CLOSE, FRAME_TYPE_CRYPTO, FRAME_TYPE_PADDING, FRAME_TYPE_PING,
    FRAME_TYPE_PROTOCOL_CLOSE, FRAME_TYPE_RESET_STREAM, FRAME_TYPE_STOP_SENDING,
    FRAME_TYPE_STREAM, FRAME_TYPE_STREAM_MAX, FrameError, FrameErrorReason, MAX_PACKET_PAYLOAD,
    STREAM_FLAG_FIN, STREAM_FLAG_MESSAGE_BOUNDARY, VarintError,
};

use super::varint;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// No-op filler.
    Padding,
    /// Liveness check; the peer answers with an Ack.
    Ping,
    /// Stream bytes received since the previous Ack.
    Ack {
        /// Byte count.
        bytes_since_last_ack: u64,
    },
    /// Sender abandons its half of a stream.
    ResetStream {
        /// Stream id.
        stream_id: u64,
        /// Application error code.
        error_code: u64,
    },
    /// Receiver asks the peer to stop sending on a stream.
    StopSending {
        /// Stream id.
        stream_id: u64,
        /// Application error code.
        error_code: u64,
    },
    /// Handshake bytes.
    Crypto {
        /// Handshake message bytes (may split or join messages).
        data: Vec<u8>,
    },
    /// Stream data.
    Stream {
        /// Stream id.
        stream_id: u64,
        /// Payload bytes.
        data: Vec<u8>,
        /// Last frame of the sender's half.
        fin: bool,
        /// Last frame of an application message.
        ends_on_message_boundary: bool,
    },
    /// Transport-level close.
    ProtocolClose {
        /// Close code.
        error_code: u64,
        /// Type of the frame that triggered the close (0 if none).
        frame_type: u64,
        /// Human-readable reason.
        reason: String,
    },
    /// Application-level close.
    AppClose {
        /// Close code.
        error_code: u64,
        /// Human-readable reason.
        reason: String,
    },
}

impl Frame {
    /// The wire discriminant for this frame.
    pub fn frame_type(&self) -> u64 {
        match self {
            Frame::Padding => FRAME_TYPE_PADDING,
            Frame::Ping => FRAME_TYPE_PING,
            Frame::Ack { .. } => FRAME_TYPE_ACK,
            Frame::ResetStream { .. } => FRAME_TYPE_RESET_STREAM,
            Frame::StopSending { .. } => FRAME_TYPE_STOP_SENDING,
            Frame::Crypto { .. } => FRAME_TYPE_CRYPTO,
            Frame::Stream {
                fin,
                ends_on_message_boundary,
                ..
            } => {
                let mut ty = FRAME_TYPE_STREAM;
                if *fin {
                    ty |= STREAM_FLAG_FIN;
                }
                if *ends_on_message_boundary {
                    ty |= STREAM_FLAG_MESSAGE_BOUNDARY;
                }
                ty
            }
            Frame::ProtocolClose { .. } => FRAME_TYPE_PROTOCOL_CLOSE,
            Frame::AppClose { .. } => FRAME_TYPE_APP_CLOSE,
        }
    }

    /// Check if this frame is allowed before the handshake completes.
    pub fn is_handshake_frame(&self) -> bool {
        matches!(
            self,
            Frame::Padding | Frame::Ping | Frame::Crypto { .. }
        ) || self.is_close()
    }

    /// Check if this frame closes the connection.
    pub fn is_close(&self) -> bool {
        matches!(self, Frame::ProtocolClose { .. } | Frame::AppClose { .. })
    }

    /// Number of bytes [`Frame::encode`] appends, or `None` if a field is
    /// out of varint range.
    pub fn encoded_len(&self) -> Option<usize> {
        let mut buf = Vec::new();
        self.encode(&mut buf).ok().map(|()| buf.len())
    }

    /// Append the wire encoding of this frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), VarintError> {
        varint::encode(self.frame_type(), buf)?;
        match self {
            Frame::Padding | Frame::Ping => {}
            Frame::Ack {
                bytes_since_last_ack,
            } => varint::encode(*bytes_since_last_ack, buf)?,
            Frame::ResetStream {
                stream_id,
                error_code,
            }
            | Frame::StopSending {
                stream_id,
                error_code,
            } => {
                varint::encode(*stream_id, buf)?;
                varint::encode(*error_code, buf)?;
            }
            Frame::Crypto { data } => put_vector(data, buf)?,
            Frame::Stream {
                stream_id, data, ..
            } => {
                varint::encode(*stream_id, buf)?;
                put_vector(data, buf)?;
            }
            Frame::ProtocolClose {
                error_code,
                frame_type,
                reason,
            } => {
                varint::encode(*error_code, buf)?;
                varint::encode(*frame_type, buf)?;
                put_vector(reason.as_bytes(), buf)?;
            }
            Frame::AppClose { error_code, reason } => {
                varint::encode(*error_code, buf)?;
                put_vector(reason.as_bytes(), buf)?;
            }
        }
        Ok(())
    }

    /// Decode one frame from the front of `cursor`, advancing it past the
    /// frame.
    ///
    /// Never reads past the end of the buffer; truncation and unknown
    /// discriminants are reported as distinct [`FrameError`] reasons.
    pub fn decode(cursor: &mut &[u8]) -> Result<Frame, FrameError> {
        let mut input = *cursor;
        let frame_type = varint::read(&mut input).map_err(|_| FrameError {
            frame_type: None,
            reason: FrameErrorReason::Truncated,
        })?;

        let field = |input: &mut &[u8]| {
            varint::read(input).map_err(|_| FrameError::truncated(frame_type))
        };

        let frame = match frame_type {
            FRAME_TYPE_PADDING => Frame::Padding,
            FRAME_TYPE_PING => Frame::Ping,
            FRAME_TYPE_ACK => Frame::Ack {
                bytes_since_last_ack: field(&mut input)?,
            },
            FRAME_TYPE_RESET_STREAM => Frame::ResetStream {
                stream_id: field(&mut input)?,
                error_code: field(&mut input)?,
            },
            FRAME_TYPE_STOP_SENDING => Frame::StopSending {
                stream_id: field(&mut input)?,
                error_code: field(&mut input)?,
            },
            FRAME_TYPE_CRYPTO => Frame::Crypto {
                data: take_vector(&mut input, frame_type)?.to_vec(),
            },
            FRAME_TYPE_STREAM..=FRAME_TYPE_STREAM_MAX => {
                let stream_id = field(&mut input)?;
                let data = take_vector(&mut input, frame_type)?.to_vec();
                Frame::Stream {
                    stream_id,
                    data,
                    fin: frame_type & STREAM_FLAG_FIN != 0,
                    ends_on_message_boundary: frame_type & STREAM_FLAG_MESSAGE_BOUNDARY != 0,
                }
            }
            FRAME_TYPE_PROTOCOL_CLOSE => {
                let error_code = field(&mut input)?;
                let offending = field(&mut input)?;
                let reason = take_reason(&mut input, frame_type)?;
                Frame::ProtocolClose {
                    error_code,
                    frame_type: offending,
                    reason,
                }
            }
            FRAME_TYPE_APP_CLOSE => {
                let error_code = field(&mut input)?;
                let reason = take_reason(&mut input, frame_type)?;
                Frame::AppClose { error_code, reason }
            }
            other => return Err(FrameError::unrecognized(other)),
        };

        *cursor = input;
        Ok(frame)
    }
}

/// Encode a sequence of frames into one packet plaintext.
pub fn encode_frames(frames: &[Frame]) -> Result<Vec<u8>, VarintError> {
    let mut buf = Vec::new();
    for frame in frames {
        frame.encode(&mut buf)?;
    }
    Ok(buf)
}

/// Decode every frame in a packet plaintext.
pub fn decode_frames(mut payload: &[u8]) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    while !payload.is_empty() {
        frames.push(Frame::decode(&mut payload)?);
    }
    Ok(frames)
}

fn put_vector(bytes: &[u8], buf: &mut Vec<u8>) -> Result<(), VarintError> {
    varint::encode(bytes.len() as u64, buf)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn take_vector<'a>(input: &mut &'a [u8], frame_type: u64) -> Result<&'a [u8], FrameError> {
    let len = varint::read(input).map_err(|_| FrameError::truncated(frame_type))?;
    if len > MAX_PACKET_PAYLOAD as u64 {
        return Err(FrameError {
            frame_type: Some(frame_type),
            reason: FrameErrorReason::LengthTooLarge,
        });
    }
    let len = len as usize;
    if input.len() < len {
        return Err(FrameError::truncated(frame_type));
    }
    let (data, rest) = input.split_at(len);
    *input = rest;
    Ok(data)
}

fn take_reason(input: &mut &[u8], frame_type: u64) -> Result<String, FrameError> {
    let bytes = take_vector(input, frame_type)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError {
        frame_type: Some(frame_type),
        reason: FrameErrorReason::InvalidUtf8,
    })
}
