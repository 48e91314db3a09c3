//! # Status — Connectivity Push over a Unix Domain Socket
//!
//! Publishes `{"connected":bool,"connection_count":n}` lines to every
//! subscriber (for example `sr watch`). A background thread accepts
//! subscribers; publishing happens on the relay thread and never blocks.

use std::fs;
use std::io::{self, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::telemetry::Telemetry;

/// One published status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub connected: bool,
    pub connection_count: usize,
}

impl StatusLine {
    pub fn for_count(count: usize) -> Self {
        Self {
            connected: count > 0,
            connection_count: count,
        }
    }
}

#[derive(Default)]
struct Shared {
    subscribers: Vec<UnixStream>,
    /// Last line sent, replayed to late subscribers.
    last: Option<String>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pause after a failed accept (e.g. out of descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Broadcast server for [`StatusLine`]s.
///
/// Dropping it stops the accept thread, closes every subscriber and removes
/// the socket file.
pub struct StatusPublisher {
    shared: Arc<Mutex<Shared>>,
    path: PathBuf,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl StatusPublisher {
    pub fn start(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Clean up a socket left behind by a previous run
        if fs::metadata(&path).is_ok() {
            fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        let shared = Arc::new(Mutex::new(Shared::default()));
        let accept_shared = shared.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = stop.clone();

        let accept_thread = thread::Builder::new()
            .name("sr-status".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    if accept_stop.load(Ordering::Acquire) {
                        break;
                    }
                    let mut s = match stream {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::debug!("Status socket accept failed: {}", e);
                            thread::sleep(ACCEPT_BACKOFF);
                            continue;
                        }
                    };
                    if s.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let mut guard = lock(&accept_shared);
                    if let Some(line) = &guard.last {
                        if s.write_all(line.as_bytes()).is_err() {
                            continue;
                        }
                    }
                    guard.subscribers.push(s);
                }
            })?;

        Ok(Self {
            shared,
            path,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send `status` to every subscriber, dropping those that cannot take it.
    pub fn publish(&self, status: StatusLine) {
        let mut line = match serde_json::to_string(&status) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode status line: {}", e);
                return;
            }
        };
        line.push('\n');

        let mut guard = lock(&self.shared);
        guard
            .subscribers
            .retain_mut(|s| s.write_all(line.as_bytes()).is_ok());
        guard.last = Some(line);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared).subscribers.len()
    }
}

impl Telemetry for StatusPublisher {
    fn client_count_changed(&mut self, count: usize) {
        self.publish(StatusLine::for_count(count));
    }
}

impl Drop for StatusPublisher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // The accept thread only sees the flag once `accept` returns.
        if UnixStream::connect(&self.path).is_ok() {
            if let Some(handle) = self.accept_thread.take() {
                let _ = handle.join();
            }
        }
        let _ = fs::remove_file(&self.path);
    }
}
