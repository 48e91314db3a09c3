//! # Relay — The Tick
//!
//! One [`Relay`] owns the ring, the listening transport, the upstream and
//! every connected client. [`Relay::tick`] runs the five steps in a fixed
//! order, each over all clients before the next begins:
//!
//! 1. **accept** new peers, positioned at the current `head`
//! 2. **ingest** whatever upstream has, evicting oldest bytes if needed
//! 3. **broadcast** `[position, head)` to each client with one vectored write,
//!    then pull `tail` up to the slowest connected client
//! 4. **reverse-forward** client input to the upstream sink
//! 5. **reap** disconnected clients
//!
//! Nothing here blocks. Per-client failures only disconnect that client;
//! only upstream and listener failures leave the tick as an error, and
//! even then the client-side steps of the tick still run to completion.

use std::io::{self, IoSlice};

use sr_core::RingBuffer;

use crate::cursor::{ClientCursor, ClientState, DisconnectReason};
use crate::error::{RelayError, Result};
use crate::overflow;
use crate::tap::ByteTap;
use crate::telemetry::Telemetry;
use crate::transport::{is_peer_gone, is_transient, Connection, Listener};
use crate::upstream::Upstream;

/// Size of a single upstream read.
const INGEST_CHUNK: usize = 4096;

/// Size of a single client read on the reverse path.
const REVERSE_CHUNK: usize = 128;

/// Running totals since the relay started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_ingested: u64,
    pub bytes_delivered: u64,
    pub bytes_forwarded: u64,
    /// Bytes clients skipped because eviction overtook them.
    pub bytes_dropped: u64,
    /// Client bytes the upstream sink did not take.
    pub reverse_dropped: u64,
    pub clients_accepted: u64,
    pub clients_reaped: u64,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub accepted: usize,
    pub ingested: usize,
    pub delivered: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub reaped: usize,
}

/// The relay loop state.
pub struct Relay<L: Listener, U, T> {
    ring: RingBuffer,
    listener: L,
    upstream: U,
    telemetry: T,
    clients: Vec<ClientCursor<L::Conn>>,
    taps: Vec<Box<dyn ByteTap>>,
    scratch: Box<[u8]>,
    stats: RelayStats,
}

impl<L, U, T> Relay<L, U, T>
where
    L: Listener,
    U: Upstream,
    T: Telemetry,
{
    /// Build a relay around a ring of `capacity` bytes (power of two).
    pub fn new(capacity: usize, listener: L, upstream: U, telemetry: T) -> Result<Self> {
        let ring = RingBuffer::new(capacity)?;
        Ok(Self {
            ring,
            listener,
            upstream,
            telemetry,
            clients: Vec::new(),
            taps: Vec::new(),
            scratch: vec![0u8; INGEST_CHUNK].into_boxed_slice(),
            stats: RelayStats::default(),
        })
    }

    /// Attach a read-only consumer of every ingested chunk.
    pub fn with_tap(mut self, tap: impl ByteTap + 'static) -> Self {
        self.taps.push(Box::new(tap));
        self
    }

    #[inline]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    #[inline]
    pub fn clients(&self) -> &[ClientCursor<L::Conn>] {
        &self.clients
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[inline]
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    #[inline]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    #[inline]
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Swap in a freshly opened upstream and hand back the old one.
    ///
    /// Clients and the ring are untouched, so the stream carries on from the
    /// current `head`.
    pub fn replace_upstream(&mut self, upstream: U) -> U {
        std::mem::replace(&mut self.upstream, upstream)
    }

    /// Run one accept → ingest → broadcast → reverse-forward → reap pass.
    pub fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let accepted = self.accept(&mut report);

        let ingested = self.ingest(&mut report);
        self.report_drops(&mut report);

        self.broadcast(&mut report);

        // With the upstream gone there is nowhere to send client input;
        // leave it in the sockets.
        let forwarded = match ingested {
            Ok(()) => self.reverse_forward(&mut report),
            Err(_) => Ok(()),
        };

        report.reaped = self.reap();

        accepted?;
        ingested?;
        forwarded?;
        Ok(report)
    }

    /// Close every client and release the listener.
    ///
    /// Best effort: bytes still queued for a client may be lost.
    pub fn shutdown(mut self) -> RelayStats {
        let had_clients = !self.clients.is_empty();
        for client in self.clients.iter_mut().filter(|c| c.is_connected()) {
            if let Err(e) = client.conn_mut().shutdown() {
                tracing::debug!("Failed to shut down client {}: {}", client.identity(), e);
            }
        }
        self.clients.clear();
        if had_clients {
            self.telemetry.client_count_changed(0);
        }

        tracing::info!(
            "Relay stopped: {} bytes in, {} delivered, {} forwarded, {} dropped",
            self.stats.bytes_ingested,
            self.stats.bytes_delivered,
            self.stats.bytes_forwarded,
            self.stats.bytes_dropped,
        );
        self.stats
    }

    fn accept(&mut self, report: &mut TickReport) -> Result<()> {
        let mut accepted = 0;
        let outcome = loop {
            match self.listener.try_accept() {
                Ok(Some(conn)) => {
                    let identity = conn.identity().to_owned();
                    tracing::debug!("New client connected from {}", identity);
                    self.clients
                        .push(ClientCursor::new(conn, identity, self.ring.head()));
                    accepted += 1;
                }
                Ok(None) => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                // The peer gave up while queued; try the next one.
                Err(e) if e.kind() == io::ErrorKind::Interrupted || is_peer_gone(&e) => continue,
                Err(e) => break Err(RelayError::Listener(e)),
            }
        };

        if accepted > 0 {
            self.stats.clients_accepted += accepted as u64;
            self.telemetry.client_count_changed(self.clients.len());
        }
        report.accepted = accepted;
        outcome
    }

    fn ingest(&mut self, report: &mut TickReport) -> Result<()> {
        // One ring's worth, but never less than one full read. A bounded
        // budget keeps a never-idle upstream from starving the client side.
        let budget = self.ring.capacity().max(self.scratch.len());

        while report.ingested < budget {
            let want = (budget - report.ingested).min(self.scratch.len());
            let n = match self.upstream.try_read(&mut self.scratch[..want]) {
                Ok(0) => return Err(RelayError::UpstreamClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RelayError::Upstream(e)),
            };

            let chunk = &self.scratch[..n];
            for tap in self.taps.iter_mut() {
                tap.on_ingest(self.ring.head(), chunk);
            }

            let eviction = overflow::reserve(&mut self.ring, &mut self.clients, n);
            let stored = self.ring.ingest(&chunk[eviction.skipped_input..]);
            debug_assert_eq!(stored, n - eviction.skipped_input);

            self.stats.bytes_ingested += n as u64;
            report.ingested += n;
        }
        Ok(())
    }

    /// One warning per client per tick, however many chunks evicted it.
    fn report_drops(&mut self, report: &mut TickReport) {
        for client in self.clients.iter_mut() {
            let dropped = client.take_pending_drop();
            if dropped == 0 {
                continue;
            }
            tracing::warn!(
                identity = client.identity(),
                dropped,
                "Client {} fell behind, skipped {} bytes",
                client.identity(),
                dropped
            );
            self.telemetry.bytes_dropped(client.identity(), dropped);
            self.stats.bytes_dropped += dropped;
            report.dropped += dropped;
        }
    }

    fn broadcast(&mut self, report: &mut TickReport) {
        let head = self.ring.head();

        for client in self.clients.iter_mut() {
            if !client.is_connected() || client.position() == head {
                continue;
            }

            let (first, second) = self.ring.slices(client.position(), head);
            let requested = first.len() + second.len();
            let bufs = [IoSlice::new(first), IoSlice::new(second)];

            match client.conn_mut().try_write_vectored(&bufs) {
                Ok(0) => {
                    tracing::debug!("Client {} disconnected", client.identity());
                    client.disconnect(DisconnectReason::PeerClosed);
                }
                Ok(n) => {
                    // Partial writes are fine: the rest goes out next tick.
                    let n = n.min(requested) as u64;
                    client.advance(n);
                    self.stats.bytes_delivered += n;
                    report.delivered += n;
                }
                // Transmit buffer full.
                Err(e) if is_transient(&e) => {}
                Err(e) if is_peer_gone(&e) => {
                    tracing::debug!("Client {} disconnected: {}", client.identity(), e);
                    client.disconnect(DisconnectReason::Reset);
                }
                Err(e) => {
                    tracing::error!("Failed to write to client {}: {}", client.identity(), e);
                    client.disconnect(DisconnectReason::WriteFailed);
                }
            }
        }

        let tail = self
            .clients
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| c.position())
            .min()
            .unwrap_or(head);
        self.ring.advance_tail(tail);
    }

    fn reverse_forward(&mut self, report: &mut TickReport) -> Result<()> {
        let mut buf = [0u8; REVERSE_CHUNK];

        for client in self.clients.iter_mut() {
            if !client.is_connected() {
                continue;
            }

            loop {
                let n = match client.conn_mut().try_read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("Client {} disconnected", client.identity());
                        client.disconnect(DisconnectReason::PeerClosed);
                        break;
                    }
                    Ok(n) => n,
                    // Receive buffer drained.
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if is_peer_gone(&e) => {
                        tracing::debug!("Client {} disconnected: {}", client.identity(), e);
                        client.disconnect(DisconnectReason::Reset);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read from client {}: {}", client.identity(), e);
                        client.disconnect(DisconnectReason::ReadFailed);
                        break;
                    }
                };

                let written = match self.upstream.try_write(&buf[..n]) {
                    Ok(w) => w.min(n),
                    Err(e) if is_transient(&e) => 0,
                    Err(e) => return Err(RelayError::Upstream(e)),
                };
                if written < n {
                    tracing::debug!(
                        "Upstream took {} of {} bytes from {}",
                        written,
                        n,
                        client.identity()
                    );
                    self.stats.reverse_dropped += (n - written) as u64;
                }
                self.stats.bytes_forwarded += written as u64;
                report.forwarded += written as u64;
            }
        }
        Ok(())
    }

    fn reap(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|c| match c.state() {
            ClientState::Connected => true,
            ClientState::Disconnected(reason) => {
                tracing::debug!(
                    "Removed client {} ({}), {} bytes lost to eviction",
                    c.identity(),
                    reason,
                    c.dropped_total()
                );
                false
            }
        });
        let reaped = before - self.clients.len();

        if reaped > 0 {
            self.stats.clients_reaped += reaped as u64;
            self.telemetry.client_count_changed(self.clients.len());
        }
        reaped
    }
}
