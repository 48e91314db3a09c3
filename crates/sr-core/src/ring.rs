//! # Ring — Fixed-Capacity Byte Store with Absolute Positions
//!
//! Tracks the `head` (total bytes ever ingested) and `tail` (oldest byte
//! still guaranteed readable) of the logical stream. Both are 64-bit
//! counters that only move forward; the physical slot of position `p` is
//! `p & (capacity - 1)`.
//!
//! # Invariants
//!
//! - `tail <= head`
//! - `head - tail <= capacity`
//!
//! [`RingBuffer::ingest`] never evicts. When there is not enough free space
//! the caller first runs [`RingBuffer::evict_for`], which force-advances
//! `tail` (drop oldest) so the write can proceed.

use alloc::boxed::Box;
use alloc::vec;

/// Rejected ring capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("ring capacity must be non-zero")]
    Zero,
    #[error("ring capacity {0} is not a power of two")]
    NotPowerOfTwo(usize),
}

/// A contiguous region of the ring's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

/// Up to two storage regions covering an absolute range `[from, to)`.
///
/// `second` is empty unless the range crosses the physical end of storage,
/// in which case it always starts at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Spans {
    pub first: Span,
    pub second: Span,
}

impl Spans {
    #[inline]
    pub fn len(&self) -> usize {
        self.first.len + self.second.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of [`RingBuffer::evict_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Eviction {
    /// Leading bytes of the incoming chunk that will never be stored,
    /// because the chunk alone is larger than the ring.
    pub skipped_input: usize,
    /// Buffered bytes that stopped being retained.
    pub evicted: u64,
}

impl Eviction {
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.skipped_input == 0 && self.evicted == 0
    }
}

/// Fixed-capacity circular byte store shared by every reader.
///
/// Created once with a power-of-two capacity and never resized.
pub struct RingBuffer {
    storage: Box<[u8]>,
    mask: u64,
    head: u64,
    tail: u64,
}

impl RingBuffer {
    /// Allocate a ring of `capacity` bytes.
    ///
    /// Fails fast on a zero or non power-of-two capacity rather than
    /// silently computing wrong indices later.
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        if capacity == 0 {
            return Err(CapacityError::Zero);
        }
        if !capacity.is_power_of_two() {
            return Err(CapacityError::NotPowerOfTwo(capacity));
        }
        Ok(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            mask: capacity as u64 - 1,
            head: 0,
            tail: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Total bytes ever ingested.
    #[inline]
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Oldest position still guaranteed readable.
    #[inline]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Bytes currently retained.
    #[inline]
    pub fn len(&self) -> usize {
        (self.head - self.tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline]
    fn index(&self, pos: u64) -> usize {
        (pos & self.mask) as usize
    }

    /// Append as many of `bytes` as fit in the free space, starting at `head`.
    ///
    /// Returns the number of bytes accepted. Never evicts.
    pub fn ingest(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        if n == 0 {
            return 0;
        }

        let start = self.index(self.head);
        let first = n.min(self.capacity() - start);
        self.storage[start..start + first].copy_from_slice(&bytes[..first]);
        self.storage[..n - first].copy_from_slice(&bytes[first..n]);

        self.head += n as u64;
        n
    }

    /// Storage regions covering absolute positions `[from, to)`.
    ///
    /// # Panics
    /// Panics unless `tail <= from <= to <= head`. Callers clamp their
    /// cursors before asking.
    pub fn read_slice(&self, from: u64, to: u64) -> Spans {
        assert!(
            self.tail <= from && from <= to && to <= self.head,
            "read_slice [{}, {}) outside retained window [{}, {})",
            from,
            to,
            self.tail,
            self.head,
        );

        let len = (to - from) as usize;
        let start = self.index(from);
        let first = len.min(self.capacity() - start);
        Spans {
            first: Span { offset: start, len: first },
            second: Span { offset: 0, len: len - first },
        }
    }

    /// Like [`read_slice`](Self::read_slice) but resolved to byte slices.
    pub fn slices(&self, from: u64, to: u64) -> (&[u8], &[u8]) {
        let spans = self.read_slice(from, to);
        (self.span(spans.first), self.span(spans.second))
    }

    #[inline]
    pub fn span(&self, span: Span) -> &[u8] {
        &self.storage[span.offset..span.offset + span.len]
    }

    /// Move `tail` forward to `new_tail`. Moving backwards is a no-op.
    ///
    /// # Panics
    /// Panics if `new_tail > head`.
    #[inline]
    pub fn advance_tail(&mut self, new_tail: u64) {
        assert!(
            new_tail <= self.head,
            "tail {} would pass head {}",
            new_tail,
            self.head
        );
        if new_tail > self.tail {
            self.tail = new_tail;
        }
    }

    /// Make room for an incoming chunk of `requested` bytes by dropping the
    /// oldest retained bytes.
    ///
    /// When the chunk alone exceeds the capacity, only its last `capacity`
    /// bytes can ever be stored: the leading part is skipped via
    /// [`discard`](Self::discard) and reported in [`Eviction::skipped_input`].
    pub fn evict_for(&mut self, requested: usize) -> Eviction {
        let free = self.free();
        if requested <= free {
            return Eviction::default();
        }

        if requested > self.capacity() {
            let skipped = requested - self.capacity();
            let evicted = self.len() as u64;
            self.discard(skipped as u64);
            return Eviction {
                skipped_input: skipped,
                evicted,
            };
        }

        let overflow = (requested - free) as u64;
        let new_tail = (self.tail + overflow).min(self.head);
        let evicted = new_tail - self.tail;
        self.tail = new_tail;
        Eviction {
            skipped_input: 0,
            evicted,
        }
    }

    /// Account for `n` bytes that pass through without being stored.
    ///
    /// Everything retained so far becomes unreadable: `head` jumps by `n`
    /// and `tail` collapses onto it.
    pub fn discard(&mut self, n: u64) {
        self.head += n;
        self.tail = self.head;
    }
}

impl core::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}

// =============================================================================
// Kani Proofs: Window Invariants
// =============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// **Proof: evict-then-ingest never breaks the window**
    #[kani::proof]
    #[kani::unwind(10)]
    fn verify_evict_then_ingest_keeps_window() {
        let mut ring = RingBuffer::new(4).unwrap();
        let bytes = [0u8; 8];

        for _ in 0..3 {
            let n: usize = kani::any();
            kani::assume(n <= bytes.len());

            let eviction = ring.evict_for(n);
            let accepted = ring.ingest(&bytes[eviction.skipped_input..n]);

            assert_eq!(accepted, n - eviction.skipped_input);
            assert!(ring.tail() <= ring.head());
            assert!(ring.len() <= ring.capacity());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filled(capacity: usize, n: usize) -> RingBuffer {
        let mut ring = RingBuffer::new(capacity).unwrap();
        let data: Vec<u8> = (0..n as u8).collect();
        assert_eq!(ring.ingest(&data), n);
        ring
    }

    #[test]
    fn test_rejects_bad_capacity() {
        assert_eq!(RingBuffer::new(0).unwrap_err(), CapacityError::Zero);
        assert_eq!(
            RingBuffer::new(12).unwrap_err(),
            CapacityError::NotPowerOfTwo(12)
        );
        assert!(RingBuffer::new(1).is_ok());
        assert!(RingBuffer::new(1024).is_ok());
    }

    #[test]
    fn test_new_ring_is_empty() {
        let ring = RingBuffer::new(8).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.free(), 8);
        assert_eq!((ring.head(), ring.tail()), (0, 0));
    }

    #[test]
    fn test_ingest_stops_at_free_space() {
        let mut ring = filled(8, 6);
        assert_eq!(ring.ingest(&[9, 9, 9, 9]), 2);
        assert_eq!(ring.head(), 8);
        assert_eq!(ring.free(), 0);
        assert_eq!(ring.ingest(&[1]), 0);
    }

    #[test]
    fn test_wraparound_write_and_read() {
        let mut ring = filled(8, 6);
        ring.advance_tail(6);
        assert_eq!(ring.ingest(&[10, 11, 12, 13, 14]), 5);

        let spans = ring.read_slice(6, 11);
        assert_eq!(spans.first, Span { offset: 6, len: 2 });
        assert_eq!(spans.second, Span { offset: 0, len: 3 });

        let (a, b) = ring.slices(6, 11);
        assert_eq!(a, &[10, 11]);
        assert_eq!(b, &[12, 13, 14]);
    }

    #[test]
    fn test_read_slice_without_wrap_has_empty_second() {
        let ring = filled(8, 5);
        let spans = ring.read_slice(1, 4);
        assert_eq!(spans.first, Span { offset: 1, len: 3 });
        assert!(spans.second.len == 0);
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_empty_range_is_allowed_at_head() {
        let ring = filled(8, 5);
        assert!(ring.read_slice(5, 5).is_empty());
    }

    #[test]
    #[should_panic(expected = "outside retained window")]
    fn test_read_below_tail_panics() {
        let mut ring = filled(8, 5);
        ring.advance_tail(3);
        ring.read_slice(2, 5);
    }

    #[test]
    #[should_panic(expected = "outside retained window")]
    fn test_read_past_head_panics() {
        let ring = filled(8, 5);
        ring.read_slice(0, 6);
    }

    #[test]
    fn test_advance_tail_is_monotonic() {
        let mut ring = filled(8, 5);
        ring.advance_tail(4);
        ring.advance_tail(2);
        assert_eq!(ring.tail(), 4);
        ring.advance_tail(4);
        assert_eq!(ring.tail(), 4);
    }

    #[test]
    #[should_panic(expected = "would pass head")]
    fn test_advance_tail_past_head_panics() {
        let mut ring = filled(8, 5);
        ring.advance_tail(6);
    }

    #[test]
    fn test_evict_for_drops_oldest() {
        let mut ring = filled(8, 8);
        let eviction = ring.evict_for(3);
        assert_eq!(eviction, Eviction { skipped_input: 0, evicted: 3 });
        assert_eq!(ring.tail(), 3);
        assert_eq!(ring.ingest(&[20, 21, 22]), 3);

        let (a, b) = ring.slices(3, 11);
        assert_eq!(a, &[3, 4, 5, 6, 7]);
        assert_eq!(b, &[20, 21, 22]);
    }

    #[test]
    fn test_evict_for_is_noop_with_room() {
        let mut ring = filled(8, 4);
        assert!(ring.evict_for(4).is_noop());
        assert_eq!(ring.tail(), 0);
    }

    #[test]
    fn test_oversized_chunk_keeps_last_capacity_bytes() {
        let mut ring = RingBuffer::new(8).unwrap();
        let chunk: Vec<u8> = (0..20).collect();

        let eviction = ring.evict_for(chunk.len());
        assert_eq!(eviction.skipped_input, 12);
        assert_eq!((ring.head(), ring.tail()), (12, 12));

        assert_eq!(ring.ingest(&chunk[eviction.skipped_input..]), 8);
        assert_eq!((ring.head(), ring.tail()), (20, 12));

        let (a, b) = ring.slices(12, 20);
        let mut got = a.to_vec();
        got.extend_from_slice(b);
        assert_eq!(got, (12..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_discard_collapses_window() {
        let mut ring = filled(8, 5);
        ring.discard(7);
        assert_eq!((ring.head(), ring.tail()), (12, 12));
        assert_eq!(ring.free(), 8);
    }

    proptest! {
        #[test]
        fn prop_window_invariants_hold(
            ops in proptest::collection::vec((0usize..40, 0u64..40), 1..64)
        ) {
            let mut ring = RingBuffer::new(16).unwrap();
            let mut next = 0u8;
            for (n, tail_step) in ops {
                let chunk: Vec<u8> = (0..n).map(|_| { next = next.wrapping_add(1); next }).collect();
                let eviction = ring.evict_for(chunk.len());
                let accepted = ring.ingest(&chunk[eviction.skipped_input..]);
                prop_assert_eq!(accepted, n - eviction.skipped_input);

                let target = (ring.tail() + tail_step).min(ring.head());
                ring.advance_tail(target);

                prop_assert!(ring.tail() <= ring.head());
                prop_assert!(ring.len() <= ring.capacity());
            }
        }

        #[test]
        fn prop_retained_bytes_match_stream(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..24), 1..32)
        ) {
            let mut ring = RingBuffer::new(16).unwrap();
            let mut stream: Vec<u8> = Vec::new();
            for chunk in chunks {
                stream.extend_from_slice(&chunk);
                let eviction = ring.evict_for(chunk.len());
                ring.ingest(&chunk[eviction.skipped_input..]);
            }

            prop_assert_eq!(ring.head(), stream.len() as u64);
            let (a, b) = ring.slices(ring.tail(), ring.head());
            let mut retained = a.to_vec();
            retained.extend_from_slice(b);
            prop_assert_eq!(&retained[..], &stream[ring.tail() as usize..]);
        }
    }
}
