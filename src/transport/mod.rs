//! QLIC transport layer.
//!
//! Turns a raw link into discrete packets and back:
//!
//! - **Packet header**: [`PacketHeader`], [`Packet`]
//! - **Read engine**: [`PacketParser`] (incremental reassembly) and
//!   [`PacketReader`] (drives it from a link)
//! - **Write engine**: [`PacketWriter`] (MTU coalescing)
//! - **Links**: [`IoLink`] and in-memory pairs for tests and simulators
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Connection (frames, streams)       │
//! ├─────────────────────────────────────────┤
//! │      Security (AEAD records)            │
//! ├─────────────────────────────────────────┤
//! │      Transport                          │  ← This module
//! │   packet header, read/write engines     │
//! ├─────────────────────────────────────────┤
//! │      Link (L2CAP or any byte pipe)      │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod link;
mod packet;
mod reader;
mod writer;

pub use error::TransportError;
pub use link::{
    IoLink, MemoryAcceptor, MemoryConnector, MemoryLink, memory_connector, memory_link_pair,
};
pub use packet::{Packet, PacketHeader};
pub use reader::{PacketParser, PacketReader};
pub use writer::PacketWriter;
