//! Protocol constants for QLIC.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed
//! without a version bump on both peers.

use std::time::Duration;

// =============================================================================
// VARINT
// =============================================================================

/// Largest value a varint can carry (2^62 - 1).
pub const VARINT_MAX: u64 = (1 << 62) - 1;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// AES-128-GCM key size.
pub const AEAD_KEY_SIZE: usize = 16;

/// AES-GCM nonce / traffic IV size.
pub const AEAD_IV_SIZE: usize = 12;

/// GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// SHA-384 output size; also the size of every traffic secret.
pub const HASH_SIZE: usize = 48;

/// Hello random size.
pub const RANDOM_SIZE: usize = 32;

/// Uncompressed SEC1 P-256 point size.
pub const KEY_SHARE_SIZE: usize = 65;

/// Raw (r || s) P-256 ECDSA signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Prefix of every HKDF-Expand-Label label.
pub const LABEL_PREFIX: &[u8] = b"qlic ";

/// Signature context for the server's transcript signature.
pub const SERVER_VERIFY_CONTEXT: &[u8] = b"qlic server verify";

/// Signature context for the client's transcript signature.
pub const CLIENT_VERIFY_CONTEXT: &[u8] = b"qlic client verify";

// =============================================================================
// FRAME TYPES
// =============================================================================

/// Padding frame.
pub const FRAME_TYPE_PADDING: u64 = 0x00;

/// Ping frame.
pub const FRAME_TYPE_PING: u64 = 0x01;

/// Ack frame (byte-count flow signal).
pub const FRAME_TYPE_ACK: u64 = 0x02;

/// Reset-stream frame.
pub const FRAME_TYPE_RESET_STREAM: u64 = 0x04;

/// Stop-sending frame.
pub const FRAME_TYPE_STOP_SENDING: u64 = 0x05;

/// Crypto (handshake) frame.
pub const FRAME_TYPE_CRYPTO: u64 = 0x06;

/// First stream frame type; the low two bits carry flags.
pub const FRAME_TYPE_STREAM: u64 = 0x08;

/// Last stream frame type.
pub const FRAME_TYPE_STREAM_MAX: u64 = 0x0B;

/// Stream flag: this frame ends the sender's half of the stream.
pub const STREAM_FLAG_FIN: u64 = 0x01;

/// Stream flag: this frame ends an application message.
pub const STREAM_FLAG_MESSAGE_BOUNDARY: u64 = 0x02;

/// Transport-level connection close.
pub const FRAME_TYPE_PROTOCOL_CLOSE: u64 = 0x1C;

/// Application-level connection close.
pub const FRAME_TYPE_APP_CLOSE: u64 = 0x1D;

// =============================================================================
// HANDSHAKE MESSAGES
// =============================================================================

/// Client hello.
pub const HANDSHAKE_CLIENT_HELLO: u64 = 0x01;

/// Server hello.
pub const HANDSHAKE_SERVER_HELLO: u64 = 0x02;

/// Transcript signature plus optional certificate chain.
pub const HANDSHAKE_VERIFY: u64 = 0x04;

/// Largest handshake message accepted from a peer.
pub const MAX_HANDSHAKE_MESSAGE: usize = 16 * 1024;

// =============================================================================
// CLOSE CODES
// =============================================================================

/// Graceful close.
pub const CLOSE_NO_ERROR: u64 = 0x0;

/// Local implementation failure.
pub const CLOSE_INTERNAL_ERROR: u64 = 0x1;

/// Peer exceeded flow-control limits.
pub const CLOSE_FLOW_CONTROL_ERROR: u64 = 0x3;

/// Frame referenced a stream in an invalid state.
pub const CLOSE_STREAM_STATE_ERROR: u64 = 0x5;

/// Frame or packet could not be decoded.
pub const CLOSE_FRAME_ENCODING_ERROR: u64 = 0x7;

/// Peer broke the protocol state machine.
pub const CLOSE_PROTOCOL_VIOLATION: u64 = 0xA;

/// Any authentication failure. Deliberately uninformative.
pub const CLOSE_HANDSHAKE_FAILED: u64 = 0x128;

// =============================================================================
// PACKETS
// =============================================================================

/// Packet header flag: key phase bit.
pub const PACKET_FLAG_KEY_PHASE: u8 = 0x01;

/// Largest packet payload accepted from the link.
pub const MAX_PACKET_PAYLOAD: usize = 64 * 1024;

/// Largest plaintext the connection puts in one outgoing packet.
pub const DEFAULT_MAX_PACKET_PLAINTEXT: usize = 16 * 1024;

/// Largest stream data chunk placed in one stream frame.
pub const MAX_STREAM_CHUNK: usize = 8 * 1024;

/// MTU assumed when a link does not advertise one.
pub const DEFAULT_MTU: usize = 512;

// =============================================================================
// FLOW SIGNALING
// =============================================================================

/// Unacknowledged stream bytes allowed in flight before sends pause.
pub const DEFAULT_SEND_WINDOW: u64 = 256 * 1024;

/// Largest message a receiving stream reassembles.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Received stream bytes that trigger an Ack.
pub const ACK_THRESHOLD: u64 = 32 * 1024;

/// Depth of the per-connection stream data queue.
pub const STREAM_DATA_QUEUE_DEPTH: usize = 32;

/// How long a closing connection waits for its final packets to drain.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest close reason phrase put on the wire.
pub const MAX_CLOSE_REASON: usize = 1024;

/// Depth of the encoded packet queue feeding the write engine.
pub const PACKET_QUEUE_DEPTH: usize = 16;

// =============================================================================
// KEY UPDATE
// =============================================================================

/// Rotate the tx key after this many sealed records.
pub const KEY_UPDATE_AFTER_RECORDS: u64 = 1 << 20;

/// Rotate the tx key after this long.
pub const KEY_UPDATE_INTERVAL: Duration = Duration::from_secs(600);

// =============================================================================
// SESSION
// =============================================================================

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the session status broadcast channel.
pub const STATUS_CHANNEL_CAPACITY: usize = 64;
