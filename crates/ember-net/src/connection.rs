//! Per-connection reader and writer tasks.
//!
//! Every admitted connection is split into two halves. The reader task pulls
//! frames off the socket and hands them to the session one at a time. The
//! writer task drains the session's outbound queue and writes each entry as
//! one frame. Either task ending for any reason closes the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::framing::{FrameError, FramingStrategy, read_frame, write_frame};
use crate::session::ClientSession;

/// Read frames until the peer leaves, the transport fails, the session is
/// asked to close, or the server shuts down.
pub(crate) async fn read_loop(
    session: &ClientSession,
    read_half: OwnedReadHalf,
    framing: &FramingStrategy,
    mut server_shutdown: watch::Receiver<bool>,
) {
    let id = session.id();
    let mut reader = BufReader::new(read_half);
    let mut closed = session.closed();

    loop {
        tokio::select! {
            result = read_frame(&mut reader, framing) => match result {
                Ok(frame) => {
                    session.on_frame_received(&frame);
                }
                Err(FrameError::ConnectionClosed) => {
                    tracing::debug!(connection_id = %id, "peer closed connection");
                    break;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "transport fault");
                    break;
                }
            },
            _ = signalled(&mut closed) => break,
            _ = signalled(&mut server_shutdown) => break,
        }
    }
}

/// Write queued payloads as frames until the queue closes or the session is
/// asked to close, then shut the write half down.
///
/// Queued payloads are flushed before a close request is honoured. A write
/// that does not finish within `write_timeout` counts as a transport fault.
pub(crate) async fn write_loop(
    session: Arc<ClientSession>,
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    framing: FramingStrategy,
    write_timeout: Duration,
) {
    let id = session.id();
    let mut writer = write_half;
    let mut closed = session.closed();

    loop {
        tokio::select! {
            biased;
            next = outbound.recv() => {
                let Some(wire) = next else { break };
                match tokio::time::timeout(write_timeout, write_frame(&mut writer, &wire, &framing)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(FrameError::Io(e))) => {
                        tracing::debug!(connection_id = %id, error = %e, "write failed");
                        session.disconnect();
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(connection_id = %id, error = %e, "unframeable payload dropped");
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %id, "write timed out");
                        session.disconnect();
                        break;
                    }
                }
            }
            _ = signalled(&mut closed) => break,
        }
    }

    let _ = tokio::time::timeout(write_timeout, writer.shutdown()).await;
}

/// Resolves once `signal` is set or its sender is gone.
pub(crate) async fn signalled(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|set| *set).await;
}
