//! # sr-verify — The "Law" of STREAMRELAY
//!
//! Kani model-checking harnesses for the shared ring. Each proof drives a
//! small ring through symbolic ingests, evictions and reader progress, and
//! checks the window invariants on every reachable state:
//!
//! - `tail <= head` and `head - tail <= capacity`
//! - every reader clamped after eviction satisfies `tail <= position <= head`
//! - a reader that was never overtaken lost nothing

extern crate sr_core;

#[cfg(kani)]
use sr_core::RingBuffer;

#[cfg(kani)]
mod proofs {
    use super::*;

    const CAP: usize = 4;
    const MAX_CHUNK: usize = 6;

    /// Reader model: the same clamp rule the relay applies to its clients.
    fn clamp(position: &mut u64, tail: u64) -> u64 {
        if *position < tail {
            let skipped = tail - *position;
            *position = tail;
            skipped
        } else {
            0
        }
    }

    /// **Proof: Window Invariants Under Eviction**
    #[kani::proof]
    #[kani::unwind(8)]
    fn verify_window_and_reader_bounds() {
        let mut ring = RingBuffer::new(CAP).unwrap();
        let bytes = [0u8; MAX_CHUNK];
        let mut reader: u64 = 0;

        for _ in 0..3 {
            let n: usize = kani::any();
            kani::assume(n <= MAX_CHUNK);

            let eviction = ring.evict_for(n);
            clamp(&mut reader, ring.tail());
            ring.ingest(&bytes[eviction.skipped_input..n]);

            // Reader consumes a symbolic amount of what is pending.
            let step: u64 = kani::any();
            kani::assume(step <= ring.head() - reader);
            reader += step;
            ring.advance_tail(reader);

            assert!(ring.tail() <= ring.head());
            assert!(ring.len() <= ring.capacity());
            assert!(ring.tail() <= reader && reader <= ring.head());
        }
    }

    /// **Proof: Skipped Bytes Are Exactly the Gap to the New Tail**
    #[kani::proof]
    #[kani::unwind(8)]
    fn verify_drop_accounting() {
        let mut ring = RingBuffer::new(CAP).unwrap();
        let bytes = [0u8; MAX_CHUNK];
        let mut reader: u64 = 0;
        let mut delivered: u64 = 0;
        let mut dropped: u64 = 0;

        for _ in 0..3 {
            let n: usize = kani::any();
            kani::assume(n <= MAX_CHUNK);

            let eviction = ring.evict_for(n);
            dropped += clamp(&mut reader, ring.tail());
            ring.ingest(&bytes[eviction.skipped_input..n]);

            let step: u64 = kani::any();
            kani::assume(step <= ring.head() - reader);
            reader += step;
            delivered += step;
            ring.advance_tail(reader);
        }

        // Every position below the reader was either delivered or dropped.
        assert_eq!(delivered + dropped, reader);
    }

    /// **Proof: Spans Cover Exactly the Requested Range**
    #[kani::proof]
    #[kani::unwind(8)]
    fn verify_read_slice_lengths() {
        let mut ring = RingBuffer::new(CAP).unwrap();
        let bytes = [0u8; MAX_CHUNK];

        let n: usize = kani::any();
        kani::assume(n <= MAX_CHUNK);
        let eviction = ring.evict_for(n);
        ring.ingest(&bytes[eviction.skipped_input..n]);

        let from: u64 = kani::any();
        let to: u64 = kani::any();
        kani::assume(ring.tail() <= from && from <= to && to <= ring.head());

        let spans = ring.read_slice(from, to);
        assert_eq!(spans.len() as u64, to - from);
        assert!(spans.first.offset + spans.first.len <= CAP);
        assert!(spans.second.len == 0 || spans.second.offset == 0);
    }
}

// Kani proofs are compiled only under cfg(kani).
// Run `cargo kani --package sr-verify` to execute them.
#[cfg(not(kani))]
pub fn _proof_placeholder() {}
