//! Network manager: listener, admission, and the live session registry.
//!
//! The [`NetworkManager`] owns the listening socket and the accept loop. For
//! every accepted connection it consults the [`ConnectionGuard`], creates a
//! [`ClientSession`] with a fresh codec, registers it under its
//! [`ConnectionId`], and spawns the connection's reader and writer tasks.
//! When a connection ends, [`NetworkManager::on_disconnect`] removes it from
//! the registry and destroys the session. The registry is the single source
//! of truth for who is connected.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;

use crate::codec::CodecFactory;
use crate::connection::{read_loop, signalled, write_loop};
use crate::error::{AdmissionError, StartupError};
use crate::framing::FramingStrategy;
use crate::guard::{ConnectionGuard, DEFAULT_QUIET_WINDOW};
use crate::registry::HandlerRegistry;
use crate::session::ClientSession;
use crate::socket::{SocketOptions, bind_listener, configure_stream};

/// Unique identifier for a TCP connection within a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrent map of live sessions keyed by [`ConnectionId`].
pub type SessionRegistry = DashMap<ConnectionId, Arc<ClientSession>>;

/// Default per-session outbound queue capacity, in frames.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;

/// Configuration for [`NetworkManager`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:4005`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions. Default: 1024.
    pub max_connections: usize,
    /// Minimum time between two admissions from one address. Default: 5 s.
    pub quiet_window: Duration,
    /// Upper bound for writing one frame before the peer is considered dead.
    /// Default: 10 s.
    pub write_timeout: Duration,
    /// Frames a session may have queued for writing before it is treated as
    /// a stalled peer and closed. Default: 1024.
    pub outbound_queue: usize,
    /// Socket options for the listener and accepted streams.
    pub socket: SocketOptions,
}

impl ServerConfig {
    /// Configuration for `bind_address:port` with default policy values.
    pub fn new(bind_address: IpAddr, port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::new(bind_address, port),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 4005),
            max_connections: 1024,
            quiet_window: DEFAULT_QUIET_WINDOW,
            write_timeout: Duration::from_secs(10),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            socket: SocketOptions::default(),
        }
    }
}

/// Live-session counter that enforces the connection limit.
///
/// A slot is taken before the session is built and given back when it
/// leaves the registry, so concurrent admissions can never overshoot.
#[derive(Debug)]
pub(crate) struct ConnectionSlots {
    limit: usize,
    taken: AtomicUsize,
}

impl ConnectionSlots {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            taken: AtomicUsize::new(0),
        }
    }

    /// Take a slot if one is free.
    pub(crate) fn try_acquire(&self) -> bool {
        self.taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return a slot taken by [`try_acquire`](Self::try_acquire).
    pub(crate) fn release(&self) {
        let _ = self
            .taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn taken(&self) -> usize {
        self.taken.load(Ordering::Acquire)
    }
}

/// State shared between the manager handle, the accept loop and every
/// connection task.
pub(crate) struct Shared {
    config: ServerConfig,
    framing: FramingStrategy,
    pub(crate) sessions: SessionRegistry,
    pub(crate) guard: ConnectionGuard,
    pub(crate) slots: ConnectionSlots,
    handlers: Arc<HandlerRegistry>,
    codec_factory: Arc<dyn CodecFactory>,
    id_gen: IdGenerator,
    shutdown_rx: watch::Receiver<bool>,
    tasks: TaskTracker,
}

/// TCP game server front end.
pub struct NetworkManager {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl NetworkManager {
    /// Bind the configured address and start accepting connections.
    ///
    /// `handlers` must be fully built; it is shared read-only by every
    /// session. `codec_factory` is invoked once per admitted connection.
    pub async fn start<F>(
        config: ServerConfig,
        handlers: Arc<HandlerRegistry>,
        codec_factory: F,
        framing: FramingStrategy,
    ) -> Result<Self, StartupError>
    where
        F: CodecFactory + 'static,
    {
        let addr = config.bind_addr;
        let listener = bind_listener(addr, &config.socket)
            .map_err(|source| StartupError::Bind { addr, source })?;
        Self::start_with_listener(listener, config, handlers, codec_factory, framing)
    }

    /// Start accepting on an already bound listener (useful for tests).
    pub fn start_with_listener<F>(
        listener: TcpListener,
        config: ServerConfig,
        handlers: Arc<HandlerRegistry>,
        codec_factory: F,
        framing: FramingStrategy,
    ) -> Result<Self, StartupError>
    where
        F: CodecFactory + 'static,
    {
        let local_addr = listener.local_addr().map_err(StartupError::LocalAddr)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            address = %local_addr,
            handlers = ?handlers.identifiers(),
            quiet_window_ms = config.quiet_window.as_millis() as u64,
            "network manager listening"
        );

        let shared = Arc::new(Shared {
            guard: ConnectionGuard::new(config.quiet_window),
            slots: ConnectionSlots::new(config.max_connections),
            config,
            framing,
            sessions: DashMap::new(),
            handlers,
            codec_factory: Arc::new(codec_factory),
            id_gen: IdGenerator::new(),
            shutdown_rx,
            tasks: TaskTracker::new(),
        });

        shared
            .tasks
            .spawn(accept_loop(Arc::clone(&shared), listener));
        if !shared.guard.quiet_window().is_zero() {
            shared.tasks.spawn(sweep_guard(Arc::clone(&shared)));
        }

        Ok(Self {
            shared,
            local_addr,
            shutdown_tx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Admit or refuse a freshly accepted connection.
    ///
    /// This runs on the accept path and never awaits.
    pub fn on_accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionId, AdmissionError> {
        self.shared.on_accept(stream, peer)
    }

    /// Remove a session from the registry and destroy it. Returns `false` if
    /// the id was not registered.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        self.shared.on_disconnect(id)
    }

    /// Look up a live session.
    pub fn session(&self, id: ConnectionId) -> Option<Arc<ClientSession>> {
        self.shared.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Ids of all live sessions in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.shared.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Send `payload` to every live session. Returns how many accepted it.
    pub fn broadcast(&self, payload: &[u8]) -> usize {
        self.live_sessions()
            .iter()
            .filter(|session| session.send(payload).is_ok())
            .count()
    }

    /// Stop accepting, close every session and wait until all connection
    /// tasks have released their resources.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.shared.tasks.close();

        let live = self.live_sessions();
        tracing::info!(sessions = live.len(), "network manager shutting down");
        for session in &live {
            session.disconnect();
        }

        self.shared.tasks.wait().await;
        tracing::info!("network manager stopped");
    }

    fn live_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.shared
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Shared {
    fn on_accept(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionId, AdmissionError> {
        let id = self.id_gen.next_id();
        self.admit(id, stream, peer)
    }

    pub(crate) fn admit(
        self: &Arc<Self>,
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionId, AdmissionError> {
        let admitted_at = Instant::now();
        if !self.guard.is_allowed(peer.ip(), admitted_at) {
            drop(stream);
            tracing::warn!(peer = %peer, "forced disconnect: reconnect inside quiet window");
            return Err(AdmissionError::Rejected { peer });
        }

        let limit = self.config.max_connections;
        if !self.slots.try_acquire() {
            self.guard.revoke(peer.ip(), admitted_at);
            drop(stream);
            tracing::warn!(peer = %peer, limit, "connection limit reached, rejecting");
            return Err(AdmissionError::ConnectionLimitReached { limit });
        }

        if let Err(e) = configure_stream(&stream, &self.config.socket) {
            tracing::debug!(peer = %peer, error = %e, "could not apply socket options");
        }

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let session = Arc::new(ClientSession::new(id, peer, outbound_tx));

        if let Err(e) = session.initialize(self.codec_factory.create(), Arc::clone(&self.handlers))
        {
            self.abandon(&session, admitted_at);
            tracing::warn!(
                connection_id = %id,
                peer = %peer,
                error = %e,
                "forced disconnect: session could not be initialized"
            );
            return Err(AdmissionError::InitializationFailed { id });
        }

        match self.sessions.entry(id) {
            Entry::Occupied(_) => {
                self.abandon(&session, admitted_at);
                tracing::warn!(
                    connection_id = %id,
                    peer = %peer,
                    "forced disconnect: connection id already registered"
                );
                return Err(AdmissionError::RegistryConflict { id });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
            }
        }

        tracing::info!(connection_id = %id, peer = %peer, "new connection");

        let shared = Arc::clone(self);
        let framing = self.framing.clone();
        let write_timeout = self.config.write_timeout;
        let server_shutdown = self.shutdown_rx.clone();
        self.tasks.spawn(async move {
            let writer = tokio::spawn(write_loop(
                Arc::clone(&session),
                write_half,
                outbound_rx,
                framing.clone(),
                write_timeout,
            ));
            read_loop(&session, read_half, &framing, server_shutdown).await;
            shared.on_disconnect(id);
            let _ = writer.await;
        });

        Ok(id)
    }

    /// Undo a half-finished admission that never reached the registry.
    pub(crate) fn abandon(&self, session: &ClientSession, admitted_at: Instant) {
        session.destroy();
        self.slots.release();
        self.guard.revoke(session.peer().ip(), admitted_at);
    }

    fn on_disconnect(&self, id: ConnectionId) -> bool {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return false;
        };
        self.slots.release();
        session.destroy();
        tracing::info!(connection_id = %id, peer = %session.peer(), "disconnected");
        true
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown_rx = shared.shutdown_rx.clone();
    let mut backoff = Duration::from_millis(10);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    backoff = Duration::from_millis(10);
                    // Refusals are logged where they are decided.
                    let _ = shared.on_accept(stream, peer);
                }
                Err(e) => {
                    // Usually descriptor exhaustion; wait for sessions to free some.
                    tracing::error!(error = %e, "accept failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(1));
                }
            },
            _ = signalled(&mut shutdown_rx) => break,
        }
    }

    tracing::debug!("accept loop stopped");
}

async fn sweep_guard(shared: Arc<Shared>) {
    let mut shutdown_rx = shared.shutdown_rx.clone();
    let mut ticker = tokio::time::interval(shared.guard.quiet_window());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = shared.guard.purge_expired(Instant::now());
                if removed > 0 {
                    tracing::trace!(removed, "expired guard entries purged");
                }
            }
            _ = signalled(&mut shutdown_rx) => break,
        }
    }
}
