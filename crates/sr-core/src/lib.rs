//! # sr-core — The "Ring" of STREAMRELAY
//!
//! One producer, many differently-paced readers, one fixed region of memory.
//!
//! Every byte the upstream ever produced has an absolute *position* in the
//! logical stream. The [`RingBuffer`] keeps the most recent window of that
//! stream, `[tail, head)`, and hands out wraparound-safe [`Spans`] so readers
//! can be served with a single vectored write and no per-reader copies.
//!
//! This crate does no I/O and no logging. The relay loop that drives it lives
//! in `sr-io`; the invariants are model-checked in `sr-verify`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ring;

pub use ring::{CapacityError, Eviction, RingBuffer, Span, Spans};
