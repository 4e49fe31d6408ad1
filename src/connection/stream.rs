//! Stream multiplexing.
//!
//! Stream ids follow QUIC bidirectional numbering: bit 0 names the
//! initiator (0 client, 1 server) and ids advance by 4. Received bytes are
//! reassembled into messages on the message-boundary flag; there is no
//! second length prefix at this layer.
//!
//! Each direction of a stream ends independently:
//!
//! ```text
//!                local fin                  remote fin
//! Open ───────────────────────> HalfClosedLocal ─────────> Closed
//!   │          remote fin                      local fin    ^
//!   └─────────────────────────> HalfClosedRemote ───────────┘
//!
//! reset (either side) ──────────────────────────────────> Closed
//! ```
//!
//! Stopping the receive half locally leaves the state alone. Data the
//! peer sent before seeing StopSending is discarded until its fin or reset
//! arrives.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};

use super::error::{ConnectionError, StreamError};
use crate::core::{MAX_MESSAGE_SIZE, Role, VARINT_MAX};

/// Per-stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Allocated, nothing exchanged.
    Idle,
    /// Both halves open.
    Open,
    /// Local sending half finished.
    HalfClosedLocal,
    /// Peer's sending half finished.
    HalfClosedRemote,
    /// Both halves finished, or reset.
    Closed,
}

impl StreamState {
    /// State after the local sending half ends, or `None` if it already had.
    pub fn on_local_finish(self) -> Option<Self> {
        match self {
            StreamState::Idle | StreamState::Open => Some(StreamState::HalfClosedLocal),
            StreamState::HalfClosedRemote => Some(StreamState::Closed),
            StreamState::HalfClosedLocal | StreamState::Closed => None,
        }
    }

    /// State after the peer's sending half ends, or `None` if it already had.
    pub fn on_remote_finish(self) -> Option<Self> {
        match self {
            StreamState::Idle | StreamState::Open => Some(StreamState::HalfClosedRemote),
            StreamState::HalfClosedLocal => Some(StreamState::Closed),
            StreamState::HalfClosedRemote | StreamState::Closed => None,
        }
    }

    /// Check if the local side may still send.
    pub fn can_send(self) -> bool {
        matches!(
            self,
            StreamState::Idle | StreamState::Open | StreamState::HalfClosedRemote
        )
    }

    /// Check if the peer may still send.
    pub fn can_receive(self) -> bool {
        matches!(
            self,
            StreamState::Idle | StreamState::Open | StreamState::HalfClosedLocal
        )
    }
}

/// Delivered to a stream handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One complete message.
    Message(Vec<u8>),
    /// Peer finished its sending half.
    Finished,
    /// Peer reset the stream.
    Reset(u64),
}

/// Channel ends handed to a new stream handle.
#[derive(Debug)]
pub(crate) struct StreamChannels {
    pub(crate) id: u64,
    pub(crate) events: mpsc::UnboundedReceiver<StreamEvent>,
    pub(crate) send_blocked: watch::Receiver<Option<StreamError>>,
}

#[derive(Debug)]
struct StreamEntry {
    state: StreamState,
    reassembly: Vec<u8>,
    events: mpsc::UnboundedSender<StreamEvent>,
    send_blocked: watch::Sender<Option<StreamError>>,
    recv_stopped: bool,
}

impl StreamEntry {
    fn new(id: u64, state: StreamState) -> (Self, StreamChannels) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (blocked_tx, blocked_rx) = watch::channel(None);
        let entry = Self {
            state,
            reassembly: Vec::new(),
            events: events_tx,
            send_blocked: blocked_tx,
            recv_stopped: false,
        };
        let channels = StreamChannels {
            id,
            events: events_rx,
            send_blocked: blocked_rx,
        };
        (entry, channels)
    }

    fn deliver(&self, event: StreamEvent) {
        // A dropped handle has already asked the peer to stop.
        let _ = self.events.send(event);
    }
}

/// All live streams of one connection.
///
/// Owned by the connection run loop; a new connection starts with an empty
/// table.
#[derive(Debug)]
pub struct StreamTable {
    role: Role,
    next_local: u64,
    next_peer: u64,
    streams: HashMap<u64, StreamEntry>,
}

impl StreamTable {
    /// Empty table for `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            next_local: role.stream_initiator_bit(),
            next_peer: role.peer().stream_initiator_bit(),
            streams: HashMap::new(),
        }
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check if no stream is live.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// State of a live stream.
    pub fn state(&self, stream_id: u64) -> Option<StreamState> {
        self.streams.get(&stream_id).map(|s| s.state)
    }

    /// Check if the local side may send on `stream_id`.
    pub fn can_send(&self, stream_id: u64) -> bool {
        self.state(stream_id).is_some_and(StreamState::can_send)
    }

    fn is_local(&self, stream_id: u64) -> bool {
        stream_id & 1 == self.role.stream_initiator_bit()
    }

    /// Allocate the next locally initiated stream.
    pub(crate) fn open_local(&mut self) -> Result<StreamChannels, ConnectionError> {
        let id = self.next_local;
        if id > VARINT_MAX {
            return Err(ConnectionError::StreamState {
                stream_id: id,
                reason: "stream ids exhausted",
            });
        }
        self.next_local += 4;
        let (entry, channels) = StreamEntry::new(id, StreamState::Open);
        self.streams.insert(id, entry);
        Ok(channels)
    }

    /// Apply an incoming Stream frame.
    ///
    /// Returns the channels of a newly opened peer stream so it can be
    /// handed to `accept_stream`.
    pub(crate) fn on_stream_frame(
        &mut self,
        stream_id: u64,
        data: Vec<u8>,
        fin: bool,
        ends_on_message_boundary: bool,
    ) -> Result<Option<StreamChannels>, ConnectionError> {
        let mut opened = None;
        if !self.streams.contains_key(&stream_id) {
            match self.admit(stream_id)? {
                Some(channels) => opened = Some(channels),
                // Late frame for a stream that already closed.
                None => return Ok(None),
            }
        }
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return Ok(opened);
        };
        if entry.recv_stopped {
            if fin {
                if let Some(next) = entry.state.on_remote_finish() {
                    entry.state = next;
                }
            }
            self.remove_if_closed(stream_id);
            return Ok(opened);
        }
        if !entry.state.can_receive() {
            return Err(ConnectionError::StreamState {
                stream_id,
                reason: "data after fin",
            });
        }
        if entry.state == StreamState::Idle {
            entry.state = StreamState::Open;
        }

        if entry.reassembly.len() + data.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::FlowControl("message exceeds reassembly limit"));
        }
        entry.reassembly.extend_from_slice(&data);
        if ends_on_message_boundary || (fin && !entry.reassembly.is_empty()) {
            let message = std::mem::take(&mut entry.reassembly);
            entry.deliver(StreamEvent::Message(message));
        }
        if fin {
            entry.deliver(StreamEvent::Finished);
            if let Some(next) = entry.state.on_remote_finish() {
                entry.state = next;
            }
        }
        self.remove_if_closed(stream_id);
        Ok(opened)
    }

    /// Open a peer-initiated stream on its first frame.
    fn admit(&mut self, stream_id: u64) -> Result<Option<StreamChannels>, ConnectionError> {
        if stream_id & 0x2 != 0 {
            return Err(ConnectionError::StreamState {
                stream_id,
                reason: "unidirectional stream id",
            });
        }
        if self.is_local(stream_id) {
            if stream_id < self.next_local {
                return Ok(None);
            }
            return Err(ConnectionError::StreamState {
                stream_id,
                reason: "locally initiated stream not opened",
            });
        }
        if stream_id < self.next_peer {
            return Ok(None);
        }
        self.next_peer = stream_id + 4;
        let (entry, channels) = StreamEntry::new(stream_id, StreamState::Idle);
        self.streams.insert(stream_id, entry);
        Ok(Some(channels))
    }

    /// Apply an incoming ResetStream.
    pub(crate) fn on_reset(&mut self, stream_id: u64, error_code: u64) -> Result<(), ConnectionError> {
        match self.streams.remove(&stream_id) {
            Some(entry) => {
                entry.deliver(StreamEvent::Reset(error_code));
                entry.send_blocked.send_replace(Some(StreamError::Reset(error_code)));
                Ok(())
            }
            None => self.check_known(stream_id),
        }
    }

    /// Apply an incoming StopSending.
    ///
    /// Returns `true` if the local sending half was still open, in which
    /// case the caller answers with a ResetStream.
    pub(crate) fn on_stop_sending(
        &mut self,
        stream_id: u64,
        error_code: u64,
    ) -> Result<bool, ConnectionError> {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return self.check_known(stream_id).map(|()| false);
        };
        entry.send_blocked.send_replace(Some(StreamError::Stopped(error_code)));
        let Some(next) = entry.state.on_local_finish() else {
            return Ok(false);
        };
        entry.state = next;
        self.remove_if_closed(stream_id);
        Ok(true)
    }

    /// End the local sending half after its final frame was queued.
    pub(crate) fn finish_local(&mut self, stream_id: u64) -> Result<(), StreamError> {
        let entry = self
            .streams
            .get_mut(&stream_id)
            .ok_or(StreamError::Finished)?;
        entry.state = entry.state.on_local_finish().ok_or(StreamError::Finished)?;
        self.remove_if_closed(stream_id);
        Ok(())
    }

    /// Abandon a stream locally. Returns `true` if it was live.
    pub(crate) fn reset_local(&mut self, stream_id: u64) -> bool {
        match self.streams.remove(&stream_id) {
            Some(entry) => {
                entry.send_blocked.send_replace(Some(StreamError::Finished));
                true
            }
            None => false,
        }
    }

    /// Stop reading a stream locally. Returns `true` if the peer may still
    /// be sending, in which case the caller sends StopSending.
    ///
    /// The state is untouched: the peer's fin or reset still closes the
    /// receive half, and anything it sends before then is dropped.
    pub(crate) fn stop_local(&mut self, stream_id: u64) -> bool {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return false;
        };
        if entry.recv_stopped || !entry.state.can_receive() {
            return false;
        }
        entry.recv_stopped = true;
        entry.reassembly = Vec::new();
        true
    }

    /// Frames for unknown ids are fine if the id was used before.
    fn check_known(&self, stream_id: u64) -> Result<(), ConnectionError> {
        let limit = if self.is_local(stream_id) {
            self.next_local
        } else {
            self.next_peer
        };
        if stream_id < limit {
            Ok(())
        } else {
            Err(ConnectionError::StreamState {
                stream_id,
                reason: "unknown stream",
            })
        }
    }

    fn remove_if_closed(&mut self, stream_id: u64) {
        if self.state(stream_id) == Some(StreamState::Closed) {
            self.streams.remove(&stream_id);
        }
    }
}
