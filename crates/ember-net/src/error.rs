//! Error types for the connection and dispatch core.
//!
//! Only [`StartupError`] is fatal to the server. Every other error is scoped to
//! a single connection and is logged where it is raised.

use std::net::SocketAddr;

use crate::framing::FrameError;
use crate::manager::ConnectionId;

/// Failure to bring the listener up. Aborts server start.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The listening socket could not be created, bound, or put into listen mode.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the server tried to bind.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The bound listener could not report its local address.
    #[error("failed to resolve listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Reasons a freshly accepted connection did not become a session.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The remote address reconnected inside the quiet window.
    #[error("{peer} reconnected inside the quiet window")]
    Rejected {
        /// Remote address of the refused connection.
        peer: SocketAddr,
    },

    /// A live session already holds this connection id.
    #[error("connection id {id} is already registered")]
    RegistryConflict {
        /// The colliding id.
        id: ConnectionId,
    },

    /// The session registry is at its configured capacity.
    #[error("connection limit of {limit} reached")]
    ConnectionLimitReached {
        /// Configured maximum number of live sessions.
        limit: usize,
    },

    /// The new session refused its codec and handler setup.
    #[error("session {id} could not be initialized")]
    InitializationFailed {
        /// Id of the abandoned session.
        id: ConnectionId,
    },
}

/// Errors raised by a [`PacketCodec`](crate::codec::PacketCodec).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The wire bytes could not be transformed back into a plain payload.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Errors surfaced by [`ClientSession`](crate::session::ClientSession) operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `initialize` has not run yet.
    #[error("session is not initialized")]
    NotInitialized,

    /// The session has been destroyed or its transport is gone.
    #[error("session is closed")]
    Closed,

    /// The bound codec rejected the payload.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The framer rejected the payload.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A fault reported by a packet handler.
///
/// Handler faults never terminate the session; they are logged at the
/// dispatch boundary together with the session and packet context.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The packet body did not have the shape the handler expects.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Sending a reply failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Any other failure, including errors from external collaborators.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Wrap any displayable error as a [`HandlerError::Failed`].
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Startup configuration errors for the handler table.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two handlers were registered for the same packet identifier.
    #[error("duplicate handler for packet identifier {0:?}")]
    DuplicateHandler(String),

    /// A handler was registered with an empty identifier.
    #[error("packet identifier must not be empty")]
    EmptyIdentifier,
}
