//! Public connection and stream handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::config::ConnectionConfig;
use super::driver::{Command, ConnectionOutcome, Driver, IoTasks, Outgoing};
use super::error::{ConnectionError, StreamError};
use super::state::ConnectionPhase;
use super::stream::{StreamChannels, StreamEvent};
use crate::core::{
    CLOSE_NO_ERROR, Link, MAX_MESSAGE_SIZE, MAX_STREAM_CHUNK, PACKET_QUEUE_DEPTH, Role, STREAM_DATA_QUEUE_DEPTH,
};
use crate::handshake::{PeerIdentity, TrustModeKind};
use crate::transport::{PacketReader, PacketWriter};

/// Facts about an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Local role.
    pub role: Role,
    /// Trust mode the handshake ran under.
    pub trust_mode: TrustModeKind,
    /// MTU of the underlying link.
    pub mtu: usize,
    /// Attempt number within a session, starting at 1.
    pub attempt: u32,
    /// Attested peer identity, if the peer was verified.
    pub peer: Option<PeerIdentity>,
}

#[derive(Debug)]
struct Shared {
    control: mpsc::UnboundedSender<Command>,
    data: mpsc::Sender<Outgoing>,
    phase: watch::Receiver<ConnectionPhase>,
    accept: Mutex<mpsc::UnboundedReceiver<StreamChannels>>,
    metadata: ConnectionMetadata,
    bytes_read: watch::Receiver<u64>,
    bytes_written: watch::Receiver<u64>,
}

/// Handle to an established connection.
///
/// Cheap to clone. The connection closes with code 0 once every
/// connection and stream handle is dropped.
///
/// # Example
///
/// ```ignore
/// let (conn, task) = Connection::establish(link, config).await?;
/// let mut stream = conn.open_stream().await?;
/// stream.send(b"hello").await?;
/// stream.finish().await?;
/// conn.close(0, "done")?;
/// let outcome = task.await;
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// The spawned run loop of a connection. Resolves to how it ended.
///
/// Dropping it detaches the connection; use [`abort`](Self::abort) to kill
/// it without a close.
#[derive(Debug)]
pub struct ConnectionTask {
    handle: JoinHandle<ConnectionOutcome>,
}

impl ConnectionTask {
    /// Stop the run loop immediately.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Check if the run loop has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ConnectionTask {
    type Output = ConnectionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| {
                debug!(%err, "connection task did not complete");
                ConnectionOutcome::Failed(ConnectionError::Closed)
            })
        })
    }
}

impl Connection {
    /// Run the handshake over `link` and return once the connection is
    /// established.
    pub async fn establish<L: Link>(
        link: L,
        config: ConnectionConfig,
    ) -> Result<(Connection, ConnectionTask), ConnectionError> {
        Self::establish_attempt(link, config, 1).await
    }

    pub(crate) async fn establish_attempt<L: Link>(
        link: L,
        config: ConnectionConfig,
        attempt: u32,
    ) -> Result<(Connection, ConnectionTask), ConnectionError> {
        let mtu = link.mtu();
        let role = config.role;
        let trust_mode = config.trust_mode.kind();

        let (read_half, write_half) = tokio::io::split(link);
        let reader = PacketReader::new(read_half, mtu);
        let writer = PacketWriter::new(write_half, mtu);
        let bytes_read = reader.bytes_read();
        let bytes_written = writer.bytes_written();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (packets_tx, packets_rx) = mpsc::channel(PACKET_QUEUE_DEPTH);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::channel(STREAM_DATA_QUEUE_DEPTH);
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (phase_tx, mut phase_rx) = watch::channel(ConnectionPhase::Idle);
        let (peer_tx, peer_rx) = watch::channel(None);

        debug!(%role, mtu, attempt, "starting connection");
        let io = IoTasks::spawn(reader, writer, packets_rx, events_tx, config.receive_window);
        let driver = Driver::new(config, packets_tx, accept_tx, phase_tx, peer_tx);
        let mut task = ConnectionTask {
            handle: tokio::spawn(driver.run(events_rx, control_rx, data_rx, io)),
        };

        let reached = phase_rx
            .wait_for(|phase| phase.is_connected() || phase.is_terminal())
            .await
            .map(|phase| *phase);
        if !matches!(reached, Ok(ConnectionPhase::Connected)) {
            return Err(match (&mut task).await {
                ConnectionOutcome::Failed(err) => err,
                _ => ConnectionError::Closed,
            });
        }

        let metadata = ConnectionMetadata {
            role,
            trust_mode,
            mtu,
            attempt,
            peer: peer_rx.borrow().clone(),
        };
        let connection = Connection {
            shared: Arc::new(Shared {
                control: control_tx,
                data: data_tx,
                phase: phase_rx,
                accept: Mutex::new(accept_rx),
                metadata,
                bytes_read,
                bytes_written,
            }),
        };
        Ok((connection, task))
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase.borrow()
    }

    /// Check if streams can be opened.
    pub fn is_connected(&self) -> bool {
        self.phase().is_connected()
    }

    /// Facts fixed at establishment.
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.shared.metadata
    }

    /// Running count of bytes read from the link.
    pub fn bytes_read(&self) -> watch::Receiver<u64> {
        self.shared.bytes_read.clone()
    }

    /// Running count of bytes written to the link.
    pub fn bytes_written(&self) -> watch::Receiver<u64> {
        self.shared.bytes_written.clone()
    }

    /// Open a new locally initiated stream.
    ///
    /// Fails with `NotConnected` unless the connection is established.
    pub async fn open_stream(&self) -> Result<Stream, ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let (reply, response) = oneshot::channel();
        self.shared
            .control
            .send(Command::OpenStream { reply })
            .map_err(|_| ConnectionError::NotConnected)?;
        let channels = response.await.map_err(|_| ConnectionError::NotConnected)??;
        Ok(self.stream(channels))
    }

    /// Wait for the next stream the peer opens.
    ///
    /// Fails with `Closed` once the connection has ended.
    pub async fn accept_stream(&self) -> Result<Stream, ConnectionError> {
        let mut accept = self.shared.accept.lock().await;
        let channels = accept.recv().await.ok_or(ConnectionError::Closed)?;
        Ok(self.stream(channels))
    }

    /// Close with an application code and reason.
    pub fn close(&self, code: u64, reason: impl Into<String>) -> Result<(), ConnectionError> {
        self.command(Command::Close {
            error_code: code,
            reason: reason.into(),
        })
    }

    /// Send a Ping; the peer answers with an Ack.
    pub fn ping(&self) -> Result<(), ConnectionError> {
        self.command(Command::Ping)
    }

    /// Wait until the connection has ended and return its final phase.
    pub async fn closed(&self) -> ConnectionPhase {
        let mut phase = self.shared.phase.clone();
        let _ = phase.wait_for(|phase| phase.is_terminal()).await;
        let current = *phase.borrow();
        current
    }

    fn command(&self, command: Command) -> Result<(), ConnectionError> {
        self.shared
            .control
            .send(command)
            .map_err(|_| ConnectionError::Closed)
    }

    fn stream(&self, channels: StreamChannels) -> Stream {
        Stream {
            id: channels.id,
            events: channels.events,
            send_blocked: channels.send_blocked,
            control: self.shared.control.clone(),
            data: self.shared.data.clone(),
            finished: false,
            recv_done: false,
        }
    }
}

/// One bidirectional stream.
///
/// Messages are delivered whole: [`send`](Self::send) marks the end of each
/// message and [`recv`](Self::recv) returns one message per call.
///
/// Dropping a stream whose sending half is still open resets it; dropping
/// one that was finished but is still receiving sends StopSending.
#[derive(Debug)]
pub struct Stream {
    id: u64,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    send_blocked: watch::Receiver<Option<StreamError>>,
    control: mpsc::UnboundedSender<Command>,
    data: mpsc::Sender<Outgoing>,
    finished: bool,
    recv_done: bool,
}

impl Stream {
    /// Stream id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send one message.
    ///
    /// Large messages are split into chunks; only the last one carries the
    /// message boundary. Messages above `MAX_MESSAGE_SIZE` are refused,
    /// since the peer would not reassemble them.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), StreamError> {
        self.check_writable()?;
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(StreamError::MessageTooLarge(message.len()));
        }
        if message.is_empty() {
            return self.push(Vec::new(), false, true).await;
        }
        let mut chunks = message.chunks(MAX_STREAM_CHUNK).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.push(chunk.to_vec(), false, last).await?;
        }
        Ok(())
    }

    /// Send raw bytes without ending a message.
    ///
    /// The bytes join the next message the peer reassembles, which counts
    /// against its `MAX_MESSAGE_SIZE` limit.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.check_writable()?;
        for chunk in bytes.chunks(MAX_STREAM_CHUNK) {
            self.push(chunk.to_vec(), false, false).await?;
        }
        Ok(())
    }

    /// Finish the sending half.
    pub async fn finish(&mut self) -> Result<(), StreamError> {
        self.check_writable()?;
        self.push(Vec::new(), true, false).await?;
        self.finished = true;
        Ok(())
    }

    /// Abandon both halves of the stream.
    pub fn reset(&mut self, error_code: u64) -> Result<(), StreamError> {
        if self.finished && self.recv_done {
            return Err(StreamError::Finished);
        }
        self.finished = true;
        self.recv_done = true;
        self.control
            .send(Command::Reset {
                stream_id: self.id,
                error_code,
            })
            .map_err(|_| StreamError::ConnectionLost)
    }

    /// Ask the peer to stop sending.
    pub fn stop_sending(&mut self, error_code: u64) -> Result<(), StreamError> {
        if self.recv_done {
            return Ok(());
        }
        self.recv_done = true;
        self.control
            .send(Command::StopSending {
                stream_id: self.id,
                error_code,
            })
            .map_err(|_| StreamError::ConnectionLost)
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has finished and every message has
    /// been read.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if self.recv_done {
            return Ok(None);
        }
        match self.events.recv().await {
            Some(StreamEvent::Message(message)) => Ok(Some(message)),
            Some(StreamEvent::Finished) => {
                self.recv_done = true;
                Ok(None)
            }
            Some(StreamEvent::Reset(code)) => {
                self.recv_done = true;
                self.finished = true;
                Err(StreamError::Reset(code))
            }
            None => Err(StreamError::ConnectionLost),
        }
    }

    /// Wait until the sending half is stopped or reset by the peer.
    pub async fn stopped(&mut self) -> StreamError {
        match self.send_blocked.wait_for(Option::is_some).await {
            Ok(blocked) => (*blocked).clone().unwrap_or(StreamError::ConnectionLost),
            Err(_) => StreamError::ConnectionLost,
        }
    }

    fn check_writable(&self) -> Result<(), StreamError> {
        if self.finished {
            return Err(StreamError::Finished);
        }
        if let Some(err) = self.send_blocked.borrow().clone() {
            return Err(err);
        }
        Ok(())
    }

    async fn push(
        &mut self,
        data: Vec<u8>,
        fin: bool,
        ends_on_message_boundary: bool,
    ) -> Result<(), StreamError> {
        self.data
            .send(Outgoing {
                stream_id: self.id,
                data,
                fin,
                ends_on_message_boundary,
            })
            .await
            .map_err(|_| StreamError::ConnectionLost)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let command = if !self.finished {
            Command::Reset {
                stream_id: self.id,
                error_code: CLOSE_NO_ERROR,
            }
        } else if !self.recv_done {
            Command::StopSending {
                stream_id: self.id,
                error_code: CLOSE_NO_ERROR,
            }
        } else {
            return;
        };
        let _ = self.control.send(command);
    }
}
