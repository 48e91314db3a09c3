//! # Cursor — Per-Client Read Position
//!
//! Each connected peer owns one [`ClientCursor`]: its connection handle and
//! its own absolute position in the shared logical stream. The relay's
//! client list exclusively owns every cursor; nothing else holds a
//! reference to a client's socket.

use std::fmt;

/// Why a client stopped being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Orderly close: zero-length read or zero-length write.
    PeerClosed,
    /// Connection reset, broken pipe, or similar peer-side abort.
    Reset,
    /// Unexpected error while sending to the client.
    WriteFailed,
    /// Unexpected error while reading from the client.
    ReadFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Reset => write!(f, "connection reset"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::ReadFailed => write!(f, "read failed"),
        }
    }
}

/// Connection liveness. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Disconnected(DisconnectReason),
}

/// A connected peer and how far into the stream it has been served.
///
/// # Invariant
///
/// While connected, `tail <= position <= head` of the shared ring. The
/// relay maintains the lower bound through [`clamp_to`](Self::clamp_to)
/// whenever the overflow policy moves `tail`.
pub struct ClientCursor<C> {
    conn: C,
    identity: String,
    /// Next stream position this client has not received yet.
    position: u64,
    state: ClientState,
    /// Bytes skipped by eviction since the last report.
    pending_drop: u64,
    dropped_total: u64,
}

impl<C> ClientCursor<C> {
    /// A freshly accepted client starts at the current `head`: it only
    /// ever sees bytes produced after it joined.
    pub fn new(conn: C, identity: impl Into<String>, head: u64) -> Self {
        Self {
            conn,
            identity: identity.into(),
            position: head,
            state: ClientState::Connected,
            pending_drop: 0,
            dropped_total: 0,
        }
    }

    #[inline]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Bytes between this cursor and `head`.
    #[inline]
    pub fn pending(&self, head: u64) -> u64 {
        head.saturating_sub(self.position)
    }

    /// Total bytes this client lost to eviction.
    #[inline]
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    #[inline]
    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Record `n` bytes delivered.
    #[inline]
    pub fn advance(&mut self, n: u64) {
        self.position += n;
    }

    /// Force the cursor up to `tail` if eviction left it behind.
    ///
    /// Returns how many bytes this client skipped. The skip is also
    /// accumulated until [`take_pending_drop`](Self::take_pending_drop).
    pub fn clamp_to(&mut self, tail: u64) -> u64 {
        if self.position >= tail {
            return 0;
        }
        let skipped = tail - self.position;
        self.position = tail;
        self.pending_drop += skipped;
        self.dropped_total += skipped;
        skipped
    }

    /// Drain the eviction loss accumulated since the last call.
    pub fn take_pending_drop(&mut self) -> u64 {
        std::mem::take(&mut self.pending_drop)
    }

    /// Mark the client as gone. The first reason sticks.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        if self.is_connected() {
            self.state = ClientState::Disconnected(reason);
        }
    }
}

impl<C> fmt::Debug for ClientCursor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCursor")
            .field("identity", &self.identity)
            .field("position", &self.position)
            .field("state", &self.state)
            .field("dropped_total", &self.dropped_total)
            .finish()
    }
}
