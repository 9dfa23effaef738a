//! Listener and stream socket options.
//!
//! The listener is built through `socket2` so `SO_REUSEADDR`, dual-stack IPv6
//! and the accept backlog can be set before binding. Accepted streams get
//! `TCP_NODELAY` and keepalive probes so dead peers are eventually noticed
//! even when the game client never sends again.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Socket options applied by the network manager.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm. Default: true.
    pub nodelay: bool,
    /// Idle time before keepalive probes start; `None` disables keepalive.
    /// Default: 60 s.
    pub keepalive: Option<Duration>,
    /// Set `SO_REUSEADDR` on the listener. Default: true except on Windows.
    pub reuse_addr: bool,
    /// Pending-connection backlog passed to `listen`. Default: 1024.
    pub backlog: i32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
            reuse_addr: !cfg!(target_os = "windows"),
            backlog: 1024,
        }
    }
}

/// Create, bind and start listening on `addr`.
pub fn bind_listener(addr: SocketAddr, options: &SocketOptions) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if options.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    // Accept IPv4 peers on an unspecified IPv6 bind as well.
    if addr.is_ipv6() && addr.ip().is_unspecified() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(options.backlog)?;

    TcpListener::from_std(socket.into())
}

/// Apply per-connection options to an accepted stream.
pub fn configure_stream(stream: &TcpStream, options: &SocketOptions) -> std::io::Result<()> {
    stream.set_nodelay(options.nodelay)?;

    if let Some(idle) = options.keepalive {
        let keepalive = TcpKeepalive::new().with_time(idle);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &SocketOptions::default())
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let options = SocketOptions {
            reuse_addr: false,
            ..SocketOptions::default()
        };
        let first = bind_listener("127.0.0.1:0".parse().unwrap(), &options).unwrap();
        let taken = first.local_addr().unwrap();

        assert!(bind_listener(taken, &options).is_err());
    }

    #[tokio::test]
    async fn test_accepted_stream_gets_nodelay() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &SocketOptions::default())
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, _) = listener.accept().await.unwrap();
        let _client = client.await.unwrap();

        configure_stream(&stream, &SocketOptions::default()).unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }
}
