//! Client sessions: per-connection decode, dispatch, and send.
//!
//! A [`ClientSession`] is created by the network manager for every admitted
//! connection. Its lifecycle is `Connecting → Active → Closed`:
//!
//! - [`ClientSession::initialize`] binds the codec and the shared handler
//!   registry and makes the session usable.
//! - [`ClientSession::on_frame_received`] decodes one frame, resolves its
//!   identifier and runs the handler. Faults stay inside this call.
//! - [`ClientSession::send`] encodes a payload and queues it for the
//!   connection's writer task, which writes frames in queue order.
//! - [`ClientSession::destroy`] releases the codec and handler table and
//!   closes the outbound queue. It is idempotent.

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::codec::PacketCodec;
use crate::error::SessionError;
use crate::manager::ConnectionId;
use crate::packet::Packet;
use crate::registry::HandlerRegistry;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet bound to a codec and handler table.
    Connecting,
    /// Bound and processing frames.
    Active,
    /// Destroyed; every operation is refused.
    Closed,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran to completion.
    Handled,
    /// No handler is registered for the identifier. The frame was dropped.
    Unroutable,
    /// The frame could not be decoded into a packet. It was dropped.
    Malformed,
    /// The handler returned an error or panicked. The session stays up.
    Faulted,
    /// The session is not active. The frame was dropped.
    Inactive,
}

/// Runtime state for one live connection.
pub struct ClientSession {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: Instant,
    state: RwLock<SessionState>,
    codec: Mutex<Option<Box<dyn PacketCodec>>>,
    handlers: RwLock<Option<Arc<HandlerRegistry>>>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    close_tx: watch::Sender<bool>,
}

impl ClientSession {
    /// Create a session whose encoded output goes to `outbound`.
    ///
    /// The capacity of `outbound` bounds how far the peer may fall behind.
    /// A send that finds the queue full closes the session.
    ///
    /// The session refuses all traffic until [`initialize`](Self::initialize)
    /// has run.
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            peer,
            connected_at: Instant::now(),
            state: RwLock::new(SessionState::Connecting),
            codec: Mutex::new(None),
            handlers: RwLock::new(None),
            outbound: Mutex::new(Some(outbound)),
            close_tx,
        }
    }

    /// Bind the session's codec and the shared handler table.
    pub fn initialize(
        &self,
        codec: Box<dyn PacketCodec>,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write();
        if *state != SessionState::Connecting {
            return Err(SessionError::Closed);
        }
        tracing::debug!(
            connection_id = %self.id,
            codec = codec.name(),
            "session initialized"
        );
        *self.codec.lock() = Some(codec);
        *self.handlers.write() = Some(handlers);
        *state = SessionState::Active;
        Ok(())
    }

    /// Connection identifier assigned at accept time.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// When the connection was admitted.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the session is initialized and not yet destroyed.
    pub fn is_alive(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Decode one frame and dispatch it to its handler.
    ///
    /// Frames of one session are processed strictly one after another by the
    /// connection's reader task. Nothing that happens here terminates the
    /// session.
    pub fn on_frame_received(&self, frame: &[u8]) -> Dispatch {
        if !self.is_alive() {
            tracing::debug!(connection_id = %self.id, "frame on inactive session dropped");
            return Dispatch::Inactive;
        }

        let decoded = {
            let mut codec = self.codec.lock();
            let Some(codec) = codec.as_mut() else {
                return Dispatch::Inactive;
            };
            match codec.decode(frame) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "undecodable frame dropped");
                    return Dispatch::Malformed;
                }
            }
        };

        let packet = match Packet::parse(&decoded) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "frame without identifier dropped");
                return Dispatch::Malformed;
            }
        };

        // Clone the table out so a handler may destroy its own session.
        let Some(handlers) = self.handlers.read().clone() else {
            return Dispatch::Inactive;
        };
        let Some(handler) = handlers.resolve(&packet.identifier) else {
            tracing::debug!(
                connection_id = %self.id,
                identifier = %packet.identifier,
                "no handler registered, dropping packet"
            );
            return Dispatch::Unroutable;
        };

        match catch_unwind(AssertUnwindSafe(|| handler.handle(self, &packet))) {
            Ok(Ok(())) => Dispatch::Handled,
            Ok(Err(e)) => {
                tracing::error!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    identifier = %packet.identifier,
                    error = %e,
                    "packet handler failed"
                );
                Dispatch::Faulted
            }
            Err(panic) => {
                tracing::error!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    identifier = %packet.identifier,
                    panic = panic_message(panic.as_ref()),
                    "packet handler panicked"
                );
                Dispatch::Faulted
            }
        }
    }

    /// Encode `payload` and queue it for the writer task.
    ///
    /// Sends from one session reach the wire in the order they were issued.
    /// A full queue means the peer stopped reading: the session is asked to
    /// close and the send fails with [`SessionError::Closed`].
    pub fn send(&self, payload: &[u8]) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Connecting => return Err(SessionError::NotInitialized),
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Active => {}
        }

        // Encoding and queueing happen under the codec lock so that a
        // stateful codec sees payloads in queue order.
        let mut codec = self.codec.lock();
        let codec = codec.as_mut().ok_or(SessionError::Closed)?;
        let wire = codec.encode(payload)?;

        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(SessionError::Closed)?;
        match tx.try_send(wire) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // The peer is not reading; treat it like a dead transport.
                tracing::warn!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    capacity = tx.max_capacity(),
                    "outbound queue full, disconnecting"
                );
                self.disconnect();
                Err(SessionError::Closed)
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::Closed),
        }
    }

    /// Serialize and send a packet.
    pub fn send_packet(&self, packet: &Packet) -> Result<(), SessionError> {
        self.send(&packet.to_bytes())
    }

    /// Ask the connection to close. Teardown runs through the manager's
    /// disconnect path once the connection tasks notice.
    pub fn disconnect(&self) {
        self.close_tx.send_replace(true);
    }

    /// Subscribe to the close signal.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Release the codec and handler table, close the outbound queue and
    /// mark the session dead. Calling it again changes nothing.
    pub fn destroy(&self) {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.outbound.lock().take();
        self.codec.lock().take();
        self.handlers.write().take();
        self.close_tx.send_replace(true);
        tracing::debug!(connection_id = %self.id, "session destroyed");
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
