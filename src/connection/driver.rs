//! Connection run loop.
//!
//! Three tasks serve one connection:
//!
//! ```text
//!  link read half ──> read task ──(packets)──> driver ──(bytes)──> write task ──> link write half
//!                                                ^
//!                         handles ──(commands, stream data)
//! ```
//!
//! The driver owns every piece of mutable protocol state: the handshake
//! engine, record protection, the stream table and the flow counters.
//! Handles talk to it only through channels.
//!
//! Receive limits:
//!
//! - Stream bytes received since our last Ack may not exceed the receive
//!   window plus one chunk. A sender honouring its window never gets there.
//! - Packets the read task has queued but the driver has not processed are
//!   charged against a byte budget of twice the receive window. The read
//!   task never blocks on the driver, so a driver stalled on a full link
//!   cannot stall the peer's acks in turn.
//!
//! A peer that breaks either limit is closed with a flow-control error.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::config::ConnectionConfig;
use super::error::ConnectionError;
use super::state::ConnectionPhase;
use super::stream::{StreamChannels, StreamTable};
use crate::codec::{Frame, decode_frames};
use crate::core::{
    ACK_THRESHOLD, AEAD_TAG_SIZE, CLOSE_FLUSH_TIMEOUT, CLOSE_HANDSHAKE_FAILED, CLOSE_NO_ERROR,
    CryptoError, MAX_CLOSE_REASON, MAX_PACKET_PAYLOAD, MAX_STREAM_CHUNK, Role,
};
use crate::crypto::{EncryptionEngine, RekeyState, SecurityLevel, TrafficSecret};
use crate::handshake::{HandshakeAction, HandshakeEngine, PeerIdentity};
use crate::transport::{Packet, PacketReader, PacketWriter, TransportError};

/// What the read and write tasks report to the driver.
///
/// `Ok(None)` is a clean end of stream on the link.
pub(crate) type PacketEvent = Result<Option<Inbound>, ConnectionError>;

/// A packet from the read task, holding its share of the inbound budget
/// until the driver is done with it.
pub(crate) struct Inbound {
    pub(crate) packet: Packet,
    _budget: OwnedSemaphorePermit,
}

/// Requests from handles that are not stream data.
#[derive(Debug)]
pub(crate) enum Command {
    OpenStream {
        reply: oneshot::Sender<Result<StreamChannels, ConnectionError>>,
    },
    Reset {
        stream_id: u64,
        error_code: u64,
    },
    StopSending {
        stream_id: u64,
        error_code: u64,
    },
    Ping,
    Close {
        error_code: u64,
        reason: String,
    },
}

/// One chunk of stream data from a handle.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) stream_id: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) fin: bool,
    pub(crate) ends_on_message_boundary: bool,
}

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// Closed by this side.
    LocalClose {
        /// Close code sent.
        code: u64,
        /// Reason sent.
        reason: String,
    },
    /// Closed by the peer with an application close.
    PeerClose {
        /// Close code received.
        code: u64,
        /// Reason received.
        reason: String,
    },
    /// The link ended cleanly on a packet boundary.
    LinkClosed,
    /// A fatal error ended the connection.
    Failed(ConnectionError),
}

impl ConnectionOutcome {
    /// Check if the connection ended in an error.
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionOutcome::Failed(_))
    }
}

/// Protocol state of one connection.
pub(crate) struct Driver {
    role: Role,
    max_packet_plaintext: usize,
    send_window: u64,
    receive_window: u64,
    handshake: HandshakeEngine,
    crypto: EncryptionEngine,
    rekey: RekeyState,
    tx_secret: Option<TrafficSecret>,
    rx_secret: Option<TrafficSecret>,
    rx_key_phase: bool,
    streams: StreamTable,
    /// Stream bytes sent and not yet acknowledged.
    in_flight: u64,
    /// Stream bytes received since our last Ack.
    unacked_recv: u64,
    /// Frames waiting to be packed.
    pending: Vec<Frame>,
    /// Sealed packets waiting for the write task.
    outbox: Vec<Vec<u8>>,
    packets_out: Option<mpsc::Sender<Vec<u8>>>,
    accept: mpsc::UnboundedSender<StreamChannels>,
    phase: watch::Sender<ConnectionPhase>,
    peer: watch::Sender<Option<PeerIdentity>>,
}

/// Read packets until the link ends, fails or overruns the budget.
pub(crate) async fn read_loop<R>(
    mut reader: PacketReader<R>,
    events: mpsc::UnboundedSender<PacketEvent>,
    budget: Arc<Semaphore>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let event = match reader.read_packet().await {
            Ok(Some(packet)) => charge(packet, &budget),
            Ok(None) => Ok(None),
            Err(err) => Err(err.into()),
        };
        let last = !matches!(event, Ok(Some(_)));
        if events.send(event).is_err() || last {
            break;
        }
    }
}

fn charge(packet: Packet, budget: &Arc<Semaphore>) -> PacketEvent {
    let cost = u32::try_from(packet.payload.len().max(1)).unwrap_or(u32::MAX);
    match budget.clone().try_acquire_many_owned(cost) {
        Ok(permit) => Ok(Some(Inbound {
            packet,
            _budget: permit,
        })),
        Err(_) => Err(ConnectionError::FlowControl("unprocessed packets exceed receive budget")),
    }
}

/// Bytes of queued inbound packets allowed for a receive window.
fn inbound_budget(receive_window: u64) -> usize {
    let bytes = receive_window
        .saturating_mul(2)
        .saturating_add(MAX_PACKET_PAYLOAD as u64);
    usize::try_from(bytes)
        .unwrap_or(Semaphore::MAX_PERMITS)
        .min(Semaphore::MAX_PERMITS)
}

/// Write queued packets, coalescing whatever is ready into one flush.
pub(crate) async fn write_loop<W>(
    mut writer: PacketWriter<W>,
    mut packets: mpsc::Receiver<Vec<u8>>,
    events: mpsc::UnboundedSender<PacketEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = packets.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = packets.try_recv() {
            batch.push(next);
        }
        if let Err(err) = write_batch(&mut writer, &batch).await {
            trace!(%err, "write task stopping");
            let _ = events.send(Err(err.into()));
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        trace!(%err, "link shutdown failed");
    }
}

async fn write_batch<W>(writer: &mut PacketWriter<W>, batch: &[Vec<u8>]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.send(batch).await?;
    writer.flush().await
}

/// Tasks that move bytes between the link and the driver.
pub(crate) struct IoTasks {
    pub(crate) reader: JoinHandle<()>,
    pub(crate) writer: JoinHandle<()>,
}

impl IoTasks {
    /// Spawn the read and write tasks for a split link.
    pub(crate) fn spawn<L>(
        reader: PacketReader<ReadHalf<L>>,
        writer: PacketWriter<WriteHalf<L>>,
        packets_out: mpsc::Receiver<Vec<u8>>,
        events: mpsc::UnboundedSender<PacketEvent>,
        receive_window: u64,
    ) -> Self
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let budget = Arc::new(Semaphore::new(inbound_budget(receive_window)));
        let reader = tokio::spawn(read_loop(reader, events.clone(), budget));
        let writer = tokio::spawn(write_loop(writer, packets_out, events));
        Self { reader, writer }
    }
}

impl Driver {
    pub(crate) fn new(
        config: ConnectionConfig,
        packets_out: mpsc::Sender<Vec<u8>>,
        accept: mpsc::UnboundedSender<StreamChannels>,
        phase: watch::Sender<ConnectionPhase>,
        peer: watch::Sender<Option<PeerIdentity>>,
    ) -> Self {
        Self {
            role: config.role,
            max_packet_plaintext: config
                .max_packet_plaintext
                .clamp(MAX_STREAM_CHUNK + 64, MAX_PACKET_PAYLOAD - AEAD_TAG_SIZE),
            send_window: config.send_window,
            receive_window: config.receive_window,
            handshake: HandshakeEngine::new(config.role, config.trust_mode),
            crypto: EncryptionEngine::new(),
            rekey: RekeyState::new(config.key_update),
            tx_secret: None,
            rx_secret: None,
            rx_key_phase: false,
            streams: StreamTable::new(config.role),
            in_flight: 0,
            unacked_recv: 0,
            pending: Vec::new(),
            outbox: Vec::new(),
            packets_out: Some(packets_out),
            accept,
            phase,
            peer,
        }
    }

    /// Run the connection to its end.
    pub(crate) async fn run(
        mut self,
        mut packets: mpsc::UnboundedReceiver<PacketEvent>,
        mut control: mpsc::UnboundedReceiver<Command>,
        mut data: mpsc::Receiver<Outgoing>,
        io: IoTasks,
    ) -> ConnectionOutcome {
        let result = self.drive(&mut packets, &mut control, &mut data).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(role = %self.role, %err, "connection failed");
                self.send_protocol_close(&err).await;
                ConnectionOutcome::Failed(err)
            }
        };

        // Let the write task drain, then drop the link.
        self.packets_out = None;
        let mut writer = io.writer;
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
            debug!(role = %self.role, "final packets not drained");
            writer.abort();
        }
        io.reader.abort();

        let final_phase = if outcome.is_error() {
            ConnectionPhase::Error
        } else {
            ConnectionPhase::Closed
        };
        self.set_phase(final_phase);
        debug!(role = %self.role, ?outcome, "connection ended");
        outcome
    }

    async fn drive(
        &mut self,
        packets: &mut mpsc::UnboundedReceiver<PacketEvent>,
        control: &mut mpsc::UnboundedReceiver<Command>,
        data: &mut mpsc::Receiver<Outgoing>,
    ) -> Result<ConnectionOutcome, ConnectionError> {
        self.set_phase(ConnectionPhase::Handshaking);
        let actions = self.handshake.start()?;
        self.apply(actions)?;
        self.flush().await?;

        loop {
            let can_send = self.is_connected() && self.in_flight < self.send_window;
            let outcome = tokio::select! {
                event = packets.recv() => match event {
                    Some(Ok(Some(inbound))) => {
                        let outcome = self.on_packet(inbound.packet)?;
                        if outcome.is_none() && self.should_ack(packets.is_empty()) {
                            let bytes = std::mem::take(&mut self.unacked_recv);
                            self.pending.push(Frame::Ack { bytes_since_last_ack: bytes });
                        }
                        outcome
                    }
                    Some(Ok(None)) | None => Some(self.on_link_closed()?),
                    Some(Err(err)) => return Err(err),
                },
                command = control.recv() => match command {
                    Some(command) => self.on_command(command)?,
                    // Every handle is gone.
                    None => Some(self.close_locally(CLOSE_NO_ERROR, String::new())),
                },
                Some(outgoing) = data.recv(), if can_send => {
                    self.on_outgoing(outgoing);
                    None
                }
            };
            self.flush().await?;
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.phase.borrow().is_connected()
    }

    fn set_phase(&self, next: ConnectionPhase) {
        self.phase.send_if_modified(|phase| {
            if *phase == next || !phase.can_transition_to(next) {
                return false;
            }
            trace!(role = %self.role, from = ?*phase, to = ?next, "phase change");
            *phase = next;
            true
        });
    }

    fn should_ack(&self, inbound_idle: bool) -> bool {
        self.unacked_recv >= ACK_THRESHOLD || (self.unacked_recv > 0 && inbound_idle)
    }

    fn on_link_closed(&self) -> Result<ConnectionOutcome, ConnectionError> {
        if self.is_connected() {
            info!(role = %self.role, "link closed");
            Ok(ConnectionOutcome::LinkClosed)
        } else {
            Err(TransportError::ConnectionClosed.into())
        }
    }

    fn close_locally(&mut self, code: u64, reason: String) -> ConnectionOutcome {
        self.set_phase(ConnectionPhase::Closing);
        let reason = truncate_reason(reason);
        self.pending.push(Frame::AppClose {
            error_code: code,
            reason: reason.clone(),
        });
        info!(role = %self.role, code, "closing connection");
        ConnectionOutcome::LocalClose { code, reason }
    }

    /// Best effort: tell the peer why we are going away.
    async fn send_protocol_close(&mut self, err: &ConnectionError) {
        let Some((error_code, frame_type)) = err.close_code() else {
            return;
        };
        let reason = if error_code == CLOSE_HANDSHAKE_FAILED {
            String::new()
        } else {
            truncate_reason(err.to_string())
        };
        self.pending.clear();
        self.outbox.clear();
        self.pending.push(Frame::ProtocolClose {
            error_code,
            frame_type,
            reason,
        });
        if let Err(err) = self.flush().await {
            trace!(%err, "protocol close not sent");
        }
    }

    fn on_packet(&mut self, packet: Packet) -> Result<Option<ConnectionOutcome>, ConnectionError> {
        if packet.header.key_phase != self.rx_key_phase {
            self.update_rx_key()?;
            self.rx_key_phase = packet.header.key_phase;
        }
        let plaintext = self.crypto.open(&packet.payload)?;
        for frame in decode_frames(&plaintext)? {
            if let Some(outcome) = self.on_frame(frame)? {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    fn on_frame(&mut self, frame: Frame) -> Result<Option<ConnectionOutcome>, ConnectionError> {
        if !frame.is_handshake_frame() && !self.is_connected() {
            return Err(ConnectionError::ProtocolViolation(
                "application frame before handshake completed",
            ));
        }
        match frame {
            Frame::Padding => {}
            Frame::Ping => {
                if self.is_connected() {
                    let bytes = std::mem::take(&mut self.unacked_recv);
                    self.pending.push(Frame::Ack {
                        bytes_since_last_ack: bytes,
                    });
                }
            }
            Frame::Ack {
                bytes_since_last_ack,
            } => {
                self.in_flight = self.in_flight.saturating_sub(bytes_since_last_ack);
            }
            Frame::Crypto { data } => {
                if self.handshake.is_complete() {
                    return Err(ConnectionError::ProtocolViolation(
                        "crypto frame after handshake completed",
                    ));
                }
                let actions = self.handshake.on_crypto(&data)?;
                self.apply(actions)?;
            }
            Frame::Stream {
                stream_id,
                data,
                fin,
                ends_on_message_boundary,
            } => {
                self.unacked_recv += data.len() as u64;
                if self.unacked_recv > self.receive_window + MAX_STREAM_CHUNK as u64 {
                    return Err(ConnectionError::FlowControl("receive window exceeded"));
                }
                if let Some(channels) =
                    self.streams
                        .on_stream_frame(stream_id, data, fin, ends_on_message_boundary)?
                {
                    debug!(role = %self.role, stream_id, "peer opened stream");
                    let _ = self.accept.send(channels);
                }
            }
            Frame::ResetStream {
                stream_id,
                error_code,
            } => self.streams.on_reset(stream_id, error_code)?,
            Frame::StopSending {
                stream_id,
                error_code,
            } => {
                if self.streams.on_stop_sending(stream_id, error_code)? {
                    self.pending.push(Frame::ResetStream {
                        stream_id,
                        error_code,
                    });
                }
            }
            Frame::ProtocolClose {
                error_code, reason, ..
            } => {
                return Err(ConnectionError::PeerError {
                    code: error_code,
                    reason,
                });
            }
            Frame::AppClose { error_code, reason } => {
                info!(role = %self.role, code = error_code, "peer closed connection");
                return Ok(Some(ConnectionOutcome::PeerClose {
                    code: error_code,
                    reason,
                }));
            }
        }
        Ok(None)
    }

    fn apply(&mut self, actions: Vec<HandshakeAction>) -> Result<(), ConnectionError> {
        for action in actions {
            match action {
                HandshakeAction::Send(bytes) => {
                    // Leave room for the Crypto frame header.
                    let chunk = self.max_packet_plaintext - 16;
                    for piece in bytes.chunks(chunk) {
                        self.pending.push(Frame::Crypto {
                            data: piece.to_vec(),
                        });
                    }
                }
                HandshakeAction::InstallTx(secret) => {
                    // Everything queued so far goes out under the old key.
                    self.seal_pending()?;
                    self.crypto.update_tx_key(secret.traffic_key()?);
                    self.tx_secret = Some(secret);
                }
                HandshakeAction::InstallRx(secret) => {
                    self.crypto.update_rx_key(secret.traffic_key()?);
                    self.rx_secret = Some(secret);
                }
                HandshakeAction::Complete { peer } => {
                    self.peer.send_replace(peer);
                    self.set_phase(ConnectionPhase::Connected);
                    info!(role = %self.role, "connection established");
                }
            }
        }
        Ok(())
    }

    fn on_command(&mut self, command: Command) -> Result<Option<ConnectionOutcome>, ConnectionError> {
        match command {
            Command::OpenStream { reply } => {
                let result = if self.is_connected() {
                    self.streams.open_local()
                } else {
                    Err(ConnectionError::NotConnected)
                };
                let _ = reply.send(result);
            }
            Command::Reset {
                stream_id,
                error_code,
            } => {
                if self.streams.reset_local(stream_id) {
                    self.pending.push(Frame::ResetStream {
                        stream_id,
                        error_code,
                    });
                }
            }
            Command::StopSending {
                stream_id,
                error_code,
            } => {
                if self.streams.stop_local(stream_id) {
                    self.pending.push(Frame::StopSending {
                        stream_id,
                        error_code,
                    });
                }
            }
            Command::Ping => self.pending.push(Frame::Ping),
            Command::Close { error_code, reason } => {
                return Ok(Some(self.close_locally(error_code, reason)));
            }
        }
        Ok(None)
    }

    fn on_outgoing(&mut self, outgoing: Outgoing) {
        let Outgoing {
            stream_id,
            data,
            fin,
            ends_on_message_boundary,
        } = outgoing;
        // Stopped or reset while queued.
        if !self.streams.can_send(stream_id) {
            return;
        }
        self.in_flight += data.len() as u64;
        self.pending.push(Frame::Stream {
            stream_id,
            data,
            fin,
            ends_on_message_boundary,
        });
        if fin {
            let _ = self.streams.finish_local(stream_id);
        }
    }

    /// Pack pending frames into plaintexts no larger than the limit.
    fn pack(&mut self) -> Result<Vec<Vec<u8>>, ConnectionError> {
        let mut plaintexts = Vec::new();
        let mut current = Vec::new();
        // Encoding only fails for ids or codes beyond the varint range.
        for frame in self.pending.drain(..) {
            let len = frame.encoded_len().ok_or(CryptoError::EncryptionFailed)?;
            if !current.is_empty() && current.len() + len > self.max_packet_plaintext {
                plaintexts.push(std::mem::take(&mut current));
            }
            frame
                .encode(&mut current)
                .map_err(|_| CryptoError::EncryptionFailed)?;
        }
        if !current.is_empty() {
            plaintexts.push(current);
        }
        Ok(plaintexts)
    }

    fn seal_pending(&mut self) -> Result<(), ConnectionError> {
        for plaintext in self.pack()? {
            let key_phase = if self.crypto.tx_level() == Some(SecurityLevel::App) {
                if self.rekey.should_update() {
                    self.update_tx_key()?;
                }
                self.rekey.record_sealed();
                self.rekey.key_phase()
            } else {
                false
            };
            let payload = self.crypto.seal(&plaintext)?;
            self.outbox.push(Packet::new(key_phase, payload).to_bytes()?);
        }
        Ok(())
    }

    fn update_tx_key(&mut self) -> Result<(), ConnectionError> {
        let current = self.tx_secret.as_ref().ok_or(CryptoError::KeyDerivationFailed)?;
        let next = current.next()?;
        self.crypto.update_tx_key(next.traffic_key()?);
        self.tx_secret = Some(next);
        self.rekey.advance();
        debug!(role = %self.role, epoch = self.rekey.epoch(), "transmit key updated");
        Ok(())
    }

    fn update_rx_key(&mut self) -> Result<(), ConnectionError> {
        if self.crypto.rx_level() != Some(SecurityLevel::App) {
            return Err(ConnectionError::ProtocolViolation(
                "key phase changed before application keys",
            ));
        }
        let current = self.rx_secret.as_ref().ok_or(CryptoError::KeyDerivationFailed)?;
        let next = current.next()?;
        self.crypto.update_rx_key(next.traffic_key()?);
        self.rx_secret = Some(next);
        debug!(role = %self.role, "receive key updated");
        Ok(())
    }

    /// Seal pending frames and hand every sealed packet to the write task.
    async fn flush(&mut self) -> Result<(), ConnectionError> {
        self.seal_pending()?;
        let Some(out) = &self.packets_out else {
            self.outbox.clear();
            return Ok(());
        };
        for packet in self.outbox.drain(..) {
            out.send(packet)
                .await
                .map_err(|_| TransportError::ConnectionClosed)?;
        }
        Ok(())
    }
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
