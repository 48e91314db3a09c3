//! # sr-io — The "Engine" of STREAMRELAY
//!
//! Single-threaded relay loop that fans one upstream byte stream out to any
//! number of TCP clients and funnels whatever the clients send back upstream.
//!
//! One [`relay::Relay::tick`] runs accept → ingest → broadcast →
//! reverse-forward → reap to completion. Every socket is non-blocking; a
//! would-block simply defers the work to the next tick.

pub mod cursor;
pub mod error;
pub mod overflow;
pub mod relay;
#[cfg(unix)]
pub mod status;
pub mod tap;
pub mod telemetry;
pub mod transport;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use error::{RelayError, Result};
pub use relay::{Relay, RelayStats, TickReport};
