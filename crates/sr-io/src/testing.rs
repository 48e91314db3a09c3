//! Scripted in-memory transport, upstream and telemetry for relay tests.
//!
//! Everything runs on the test thread; handles share state with the relay
//! through `Rc<RefCell<..>>` so a test can script and inspect each side.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::rc::Rc;

use crate::relay::Relay;
use crate::telemetry::Telemetry;
use crate::transport::{Connection, Listener};
use crate::upstream::Upstream;

/// One scripted read result. An empty script reads as would-block.
#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

fn scripted_read(script: &mut VecDeque<ReadStep>, buf: &mut [u8]) -> io::Result<usize> {
    match script.front_mut() {
        None => Err(io::ErrorKind::WouldBlock.into()),
        Some(ReadStep::Data(data)) => {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.drain(..n);
            if data.is_empty() {
                script.pop_front();
            }
            Ok(n)
        }
        Some(ReadStep::Eof) => {
            script.pop_front();
            Ok(0)
        }
        Some(ReadStep::Error(kind)) => {
            let kind = *kind;
            script.pop_front();
            Err(kind.into())
        }
    }
}

#[derive(Default)]
struct ConnState {
    reads: VecDeque<ReadStep>,
    received: Vec<u8>,
    /// Remaining bytes the "socket" will take; `None` is unlimited.
    write_budget: Option<usize>,
    write_error: Option<io::ErrorKind>,
    write_zero: bool,
    shut_down: bool,
}

/// Test-side handle to one mock connection.
#[derive(Clone, Default)]
pub struct ConnHandle(Rc<RefCell<ConnState>>);

impl ConnHandle {
    pub fn push_read(&self, step: ReadStep) {
        self.0.borrow_mut().reads.push_back(step);
    }

    pub fn received(&self) -> Vec<u8> {
        self.0.borrow().received.clone()
    }

    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.0.borrow_mut().write_budget = budget;
    }

    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().write_error = Some(kind);
    }

    pub fn set_write_zero(&self, zero: bool) {
        self.0.borrow_mut().write_zero = zero;
    }

    pub fn is_shut_down(&self) -> bool {
        self.0.borrow().shut_down
    }
}

pub struct MockConn {
    identity: String,
    state: ConnHandle,
}

impl Connection for MockConn {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        scripted_read(&mut self.state.0.borrow_mut().reads, buf)
    }

    fn try_write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut state = self.state.0.borrow_mut();
        if let Some(kind) = state.write_error.take() {
            return Err(kind.into());
        }
        if state.write_zero {
            return Ok(0);
        }

        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let n = match state.write_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => total.min(budget),
            None => total,
        };

        let mut left = n;
        for b in bufs {
            let take = left.min(b.len());
            state.received.extend_from_slice(&b[..take]);
            left -= take;
        }
        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= n;
        }
        Ok(n)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state.0.borrow_mut().shut_down = true;
        Ok(())
    }
}

#[derive(Default)]
struct ListenerState {
    pending: VecDeque<MockConn>,
    accept_error: Option<io::ErrorKind>,
}

#[derive(Clone, Default)]
pub struct ListenerHandle(Rc<RefCell<ListenerState>>);

impl ListenerHandle {
    /// Queue a peer; it is accepted on the next tick.
    pub fn connect(&self, identity: &str) -> ConnHandle {
        let state = ConnHandle::default();
        self.0.borrow_mut().pending.push_back(MockConn {
            identity: identity.to_string(),
            state: state.clone(),
        });
        state
    }

    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().accept_error = Some(kind);
    }
}

pub struct MockListener(ListenerHandle);

impl Listener for MockListener {
    type Conn = MockConn;

    fn try_accept(&mut self) -> io::Result<Option<MockConn>> {
        let mut state = (self.0).0.borrow_mut();
        if let Some(kind) = state.accept_error.take() {
            return Err(kind.into());
        }
        Ok(state.pending.pop_front())
    }
}

#[derive(Default)]
struct UpstreamState {
    reads: VecDeque<ReadStep>,
    sink: Vec<u8>,
    sink_budget: Option<usize>,
}

#[derive(Clone, Default)]
pub struct UpstreamHandle(Rc<RefCell<UpstreamState>>);

impl UpstreamHandle {
    /// Make `bytes` available as one upstream read.
    pub fn push(&self, bytes: Vec<u8>) {
        self.0.borrow_mut().reads.push_back(ReadStep::Data(bytes));
    }

    pub fn close(&self) {
        self.0.borrow_mut().reads.push_back(ReadStep::Eof);
    }

    pub fn sink(&self) -> Vec<u8> {
        self.0.borrow().sink.clone()
    }

    pub fn set_sink_budget(&self, budget: Option<usize>) {
        self.0.borrow_mut().sink_budget = budget;
    }
}

pub struct MockUpstream(UpstreamHandle);

impl MockUpstream {
    pub fn new(handle: UpstreamHandle) -> Self {
        Self(handle)
    }
}

impl Upstream for MockUpstream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        scripted_read(&mut (self.0).0.borrow_mut().reads, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = (self.0).0.borrow_mut();
        let n = match state.sink_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => buf.len().min(budget),
            None => buf.len(),
        };
        state.sink.extend_from_slice(&buf[..n]);
        if let Some(budget) = state.sink_budget.as_mut() {
            *budget -= n;
        }
        Ok(n)
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[derive(Default)]
struct TelemetryState {
    counts: Vec<usize>,
    drops: Vec<(String, u64)>,
}

#[derive(Clone, Default)]
pub struct RecordingTelemetry(Rc<RefCell<TelemetryState>>);

impl RecordingTelemetry {
    pub fn counts(&self) -> Vec<usize> {
        self.0.borrow().counts.clone()
    }

    pub fn drops(&self) -> Vec<(String, u64)> {
        self.0.borrow().drops.clone()
    }
}

impl Telemetry for RecordingTelemetry {
    fn client_count_changed(&mut self, count: usize) {
        self.0.borrow_mut().counts.push(count);
    }

    fn bytes_dropped(&mut self, identity: &str, dropped: u64) {
        self.0
            .borrow_mut()
            .drops
            .push((identity.to_string(), dropped));
    }
}

pub struct Harness {
    pub relay: Relay<MockListener, MockUpstream, RecordingTelemetry>,
    pub listener: ListenerHandle,
    pub upstream: UpstreamHandle,
    pub telemetry: RecordingTelemetry,
}

pub fn harness(capacity: usize) -> Harness {
    let listener = ListenerHandle::default();
    let upstream = UpstreamHandle::default();
    let telemetry = RecordingTelemetry::default();
    let relay = Relay::new(
        capacity,
        MockListener(listener.clone()),
        MockUpstream(upstream.clone()),
        telemetry.clone(),
    )
    .unwrap();

    Harness {
        relay,
        listener,
        upstream,
        telemetry,
    }
}
