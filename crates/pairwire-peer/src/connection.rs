//! One end of an established stream connection.
//!
//! Lifecycle: `Handshaking` until [`Connection::start`], then `Active` while
//! the socket is open. Once the socket closes the connection is `Draining`
//! until every buffered message has been taken, then `Closed`.

use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use pairwire_frame::{
    ChannelReceiver, ChannelSender, DisconnectSignal, FrameConfig, FrameError, Message,
    MessageChannel, Packet, DEFAULT_MAX_PAYLOAD,
};
use pairwire_transport::{Stream, TransportError};
use tracing::{debug, error, trace, warn};

use crate::error::{PeerError, Result};
use crate::handshake::{exchange_markers, Role};
use crate::listener::SessionTable;
use crate::queue::PacketQueue;
use crate::sync::lock;

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on each blocking read and write of the marker exchange.
    pub handshake_timeout: Duration,
    /// Read timeout once active. `None` blocks until the peer sends or closes.
    pub read_timeout: Option<Duration>,
    /// Write timeout once active.
    pub write_timeout: Option<Duration>,
    /// Largest frame payload accepted or sent.
    pub max_payload_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            read_timeout: None,
            write_timeout: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ConnectionConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Frame settings for the active phase.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Marker exchange not yet complete, or receive thread not yet started.
    Handshaking,
    /// Socket open; sends allowed.
    Active,
    /// Socket closed; buffered messages remain.
    Draining,
    /// Socket closed and nothing left to take.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A handshaken stream with a background receive thread.
///
/// `Connection` is `Send + Sync`; share it behind an `Arc` to send from one
/// thread while another consumes the queue.
pub struct Connection {
    shared: Arc<Shared>,
    pending: Mutex<Option<Stream>>,
    handshaken: AtomicBool,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

/// State reachable from the receive thread.
struct Shared {
    role: Role,
    peer: String,
    config: ConnectionConfig,
    started: AtomicBool,
    interrupted: AtomicBool,
    writer: Mutex<Option<ChannelSender<Stream>>>,
    control: OnceLock<Stream>,
    queue: PacketQueue,
    session: OnceLock<SessionLink>,
}

struct SessionLink {
    id: u64,
    table: Weak<SessionTable>,
}

impl Connection {
    /// Wrap a connected stream. Nothing is exchanged yet.
    pub fn open(stream: Stream, role: Role, config: ConnectionConfig) -> Self {
        let peer = stream.peer_label();
        Self {
            shared: Arc::new(Shared {
                role,
                peer,
                config,
                started: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                writer: Mutex::new(None),
                control: OnceLock::new(),
                queue: PacketQueue::new(),
                session: OnceLock::new(),
            }),
            pending: Mutex::new(Some(stream)),
            handshaken: AtomicBool::new(false),
            receiver: Mutex::new(None),
        }
    }

    /// Open, handshake and start in one step.
    pub fn establish(stream: Stream, role: Role, config: ConnectionConfig) -> Result<Self> {
        let connection = Self::open(stream, role, config);
        connection.handshake()?;
        connection.start()?;
        Ok(connection)
    }

    /// Exchange marker bytes with the peer.
    ///
    /// Each blocking step is bounded by `handshake_timeout`; elapsing it
    /// yields [`PeerError::Timeout`].
    pub fn handshake(&self) -> Result<()> {
        let mut pending = lock(&self.pending);
        let stream = pending
            .as_mut()
            .ok_or(PeerError::IllegalState("connection already started"))?;
        if self.handshaken.load(Ordering::Acquire) {
            return Err(PeerError::IllegalState("handshake already completed"));
        }

        let timeout = self.shared.config.handshake_timeout;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        exchange_markers(stream, self.shared.role)
            .map_err(|err| handshake_timeout(err, timeout))?;

        self.handshaken.store(true, Ordering::Release);
        debug!(peer = %self.shared.peer, role = %self.shared.role, "handshake complete");
        Ok(())
    }

    /// Start the receive thread. The connection becomes `Active`.
    pub fn start(&self) -> Result<()> {
        if !self.handshaken.load(Ordering::Acquire) {
            return Err(PeerError::IllegalState("start before handshake completed"));
        }
        let stream = lock(&self.pending)
            .take()
            .ok_or(PeerError::IllegalState("connection already started"))?;

        let control = stream.try_clone()?;
        let (sender, receiver) =
            MessageChannel::open(stream, self.shared.config.frame_config())?.split();
        *lock(&self.shared.writer) = Some(sender);
        let _ = self.shared.control.set(control);
        self.shared.started.store(true, Ordering::Release);

        let name = match self.id() {
            Some(id) => format!("pairwire-session-{id}"),
            None => format!("pairwire-{}", self.shared.role),
        };
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(name)
            .spawn(move || shared.receive_loop(receiver));
        match spawned {
            Ok(handle) => {
                *lock(&self.receiver) = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.close();
                Err(TransportError::Io(err).into())
            }
        }
    }

    pub(crate) fn attach_session(&self, id: u64, table: Weak<SessionTable>) {
        let _ = self.shared.session.set(SessionLink { id, table });
    }

    /// Listener-assigned session id; `None` for outbound connections.
    pub fn id(&self) -> Option<u64> {
        self.shared.session.get().map(|link| link.id)
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Remote end, as `tcp://addr` or `unix:path`.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        if !self.shared.started.load(Ordering::Acquire) {
            return ConnectionState::Handshaking;
        }
        match self.shared.queue.status() {
            (false, _) => ConnectionState::Active,
            (true, 0) => ConnectionState::Closed,
            (true, _) => ConnectionState::Draining,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Encode and write one message.
    ///
    /// A transport failure during the write closes the connection.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.send_packet(&Packet::from(message.into()))
    }

    /// Send a routed message.
    pub fn send_routed(
        &self,
        label: impl Into<String>,
        payload: impl Into<serde_json::Value>,
    ) -> Result<()> {
        self.send(Message::routed(label, payload))
    }

    /// Ask the peer to close. The peer acknowledges and both ends close;
    /// [`Connection::wait`] returns once that has happened here.
    pub fn disconnect(&self) -> Result<()> {
        self.send_packet(&Packet::from(DisconnectSignal::NOTICE))
    }

    fn send_packet(&self, packet: &Packet) -> Result<()> {
        match self.state() {
            ConnectionState::Handshaking => {
                Err(PeerError::IllegalState("send before handshake completed"))
            }
            ConnectionState::Draining | ConnectionState::Closed => {
                Err(PeerError::Disconnected(self.shared.peer.clone()))
            }
            ConnectionState::Active => self.shared.write_packet(packet),
        }
    }

    /// Take the oldest queued message without waiting.
    pub fn try_take(&self) -> Option<Message> {
        let message = self.shared.queue.try_take();
        self.shared.reap_if_drained();
        message
    }

    /// Take the oldest queued message, waiting for one to arrive.
    ///
    /// Messages received before the socket closed are still returned; once
    /// none remain this fails with [`PeerError::Cancelled`].
    pub fn take(&self) -> Result<Message> {
        self.require_started()?;
        let message = self.shared.queue.take();
        self.shared.reap_if_drained();
        message
    }

    /// Like [`Connection::take`], giving up with [`PeerError::QueueEmpty`]
    /// after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Message> {
        self.require_started()?;
        let message = self.shared.queue.take_timeout(timeout);
        self.shared.reap_if_drained();
        message
    }

    /// Socket closed and queue empty.
    pub fn is_drained(&self) -> bool {
        let drained = self.shared.queue.is_drained();
        if drained {
            self.shared.reap_if_drained();
        }
        drained
    }

    /// Number of messages waiting to be taken.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Close the socket now, without the disconnect exchange.
    ///
    /// Wakes the receive thread and any blocked takers. Queued messages stay
    /// retrievable.
    pub fn interrupt(&self) {
        drop(lock(&self.pending).take());
        self.shared.interrupt();
    }

    /// Block until the receive thread has finished.
    pub fn wait(&self) {
        let handle = lock(&self.receiver).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(peer = %self.shared.peer, "receive thread panicked");
            }
        }
    }

    fn require_started(&self) -> Result<()> {
        if self.shared.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PeerError::IllegalState("receive before handshake completed"))
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.interrupt();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.shared.role)
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::AcqRel) && self.started.load(Ordering::Acquire) {
            debug!(peer = %self.peer, "interrupting connection");
        }
        self.close();
    }

    /// Shut the socket down, then close the queue.
    fn close(&self) {
        if let Some(stream) = self.control.get() {
            if let Err(err) = stream.shutdown() {
                debug!(peer = %self.peer, error = %err, "socket shutdown failed");
            }
        }
        self.queue.close();
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let result = {
            let mut writer = lock(&self.writer);
            match writer.as_mut() {
                Some(sender) => sender.send(packet),
                None => return Err(PeerError::IllegalState("send before handshake completed")),
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(err @ (FrameError::PayloadTooLarge { .. } | FrameError::Encode(_))) => {
                Err(err.into())
            }
            Err(err) => {
                warn!(peer = %self.peer, error = %err, "write failed; closing connection");
                self.interrupt();
                Err(err.into())
            }
        }
    }

    fn receive_loop(&self, mut receiver: ChannelReceiver<Stream>) {
        let session = self.session.get().map(|link| link.id);
        debug!(peer = %self.peer, session = ?session, "receive loop started");

        while !self.interrupted() {
            match receiver.receive() {
                Ok(Packet::Disconnect(signal)) => {
                    if signal.is_acknowledgement() {
                        debug!(peer = %self.peer, "disconnect acknowledged");
                    } else {
                        debug!(peer = %self.peer, "disconnect notice received");
                        let ack = Packet::from(DisconnectSignal::ACK);
                        if let Err(err) = self.write_packet(&ack) {
                            debug!(peer = %self.peer, error = %err, "could not acknowledge disconnect");
                        }
                    }
                    break;
                }
                Ok(packet) => {
                    if let Some(message) = packet.into_message() {
                        trace!(peer = %self.peer, kind = message.kind(), "message queued");
                        if !self.queue.push(message) {
                            break;
                        }
                    }
                }
                Err(err) if self.interrupted() => {
                    debug!(peer = %self.peer, error = %err, "receive interrupted");
                    break;
                }
                Err(err) if err.is_clean_close() => {
                    debug!(peer = %self.peer, "peer closed the stream");
                    break;
                }
                Err(err) if err.is_timeout() => {
                    warn!(peer = %self.peer, session = ?session, "read timed out; closing");
                    break;
                }
                Err(err @ FrameError::Decode(_)) => {
                    error!(peer = %self.peer, error = %err, "undecodable message; closing");
                    break;
                }
                Err(err) => {
                    error!(peer = %self.peer, error = %err, "receive failed; closing");
                    break;
                }
            }
        }

        self.close();
        self.reap_if_drained();
        debug!(peer = %self.peer, session = ?session, queued = self.queue.len(), "receive loop finished");
    }

    /// Drop a drained session from its listener's live table.
    fn reap_if_drained(&self) {
        let Some(link) = self.session.get() else {
            return;
        };
        if !self.queue.is_drained() {
            return;
        }
        let Some(table) = link.table.upgrade() else {
            return;
        };
        let removed = lock(&table).remove(&link.id);
        if removed.is_some() {
            debug!(session = link.id, peer = %self.peer, "session drained; released");
        }
    }
}

fn handshake_timeout(err: PeerError, timeout: Duration) -> PeerError {
    match err {
        PeerError::Transport(TransportError::Io(ref io))
            if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            PeerError::Timeout(timeout)
        }
        other => other,
    }
}
