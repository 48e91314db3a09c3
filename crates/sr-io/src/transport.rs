//! # Transport — Listening Socket and Client Connections
//!
//! The relay only needs three things from a client transport: a
//! non-blocking read, a non-blocking vectored write, and a stable name for
//! logs. [`TcpRelayListener`] provides them over std's TCP sockets.

use std::io::{self, IoSlice, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// One accepted peer.
///
/// Reads and writes follow `std::io` conventions: `ErrorKind::WouldBlock`
/// means "try again next tick", `Ok(0)` means the peer closed.
pub trait Connection {
    /// Stable human-readable peer name, fixed at accept time.
    fn identity(&self) -> &str;

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Best-effort close in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Source of new peers.
pub trait Listener {
    type Conn: Connection;

    /// Accept one pending peer, or `Ok(None)` if nobody is waiting.
    ///
    /// A peer that cannot be used is reported as `ConnectionAborted`, which
    /// the relay skips before trying the next one.
    fn try_accept(&mut self) -> io::Result<Option<Self::Conn>>;
}

/// Non-blocking TCP listener.
pub struct TcpRelayListener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl TcpRelayListener {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let inner = TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Listener for TcpRelayListener {
    type Conn = TcpConnection;

    fn try_accept(&mut self) -> io::Result<Option<TcpConnection>> {
        let (stream, peer) = match self.inner.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        };

        // A socket we cannot make non-blocking would stall every tick. Report
        // it as aborted so the caller moves on to the next queued peer.
        if let Err(e) = stream.set_nonblocking(true) {
            tracing::warn!("Rejecting client {}: set_nonblocking failed: {}", peer, e);
            return Err(io::ErrorKind::ConnectionAborted.into());
        }
        // Relayed serial traffic is latency sensitive and usually tiny.
        let _ = stream.set_nodelay(true);

        Ok(Some(TcpConnection {
            stream,
            identity: peer.to_string(),
        }))
    }
}

/// Accepted TCP peer, already non-blocking.
pub struct TcpConnection {
    stream: TcpStream,
    identity: String,
}

impl Connection for TcpConnection {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn try_write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.stream.write_vectored(bufs)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// Errors that mean the peer went away rather than something broke.
pub(crate) fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Errors that only mean "not now".
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
