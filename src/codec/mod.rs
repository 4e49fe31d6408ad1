//! Wire codecs: QUIC-style varints and the QLIC frame union.
//!
//! Both are pure byte-level code with no I/O, shared by the handshake,
//! the connection run loop and the tests.

pub mod frame;
pub mod varint;

pub use frame::{Frame, decode_frames, encode_frames};
