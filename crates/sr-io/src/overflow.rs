//! # Overflow — Drop-Oldest Eviction Policy
//!
//! When an incoming chunk does not fit in the ring, the oldest bytes are
//! given up: `tail` is force-advanced and every client still reading them
//! jumps forward to the new `tail`. Slow clients lose data; the producer
//! is never refused and memory stays bounded.

use sr_core::{Eviction, RingBuffer};

use crate::cursor::ClientCursor;

/// Make room in `ring` for a chunk of `requested` bytes.
///
/// Clients left behind by the eviction are clamped to the new `tail`; the
/// bytes each one skipped accumulate on its cursor so the relay can report
/// them once per tick. The returned [`Eviction`] tells the caller how many
/// leading bytes of the chunk to leave out of the ring.
pub fn reserve<C>(
    ring: &mut RingBuffer,
    clients: &mut [ClientCursor<C>],
    requested: usize,
) -> Eviction {
    let eviction = ring.evict_for(requested);
    if eviction.is_noop() {
        return eviction;
    }

    let tail = ring.tail();
    for client in clients.iter_mut().filter(|c| c.is_connected()) {
        client.clamp_to(tail);
    }

    debug_assert!(ring.free() >= requested - eviction.skipped_input);
    eviction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(capacity: usize, n: usize) -> RingBuffer {
        let mut ring = RingBuffer::new(capacity).unwrap();
        ring.ingest(&vec![0u8; n]);
        ring
    }

    #[test]
    fn test_no_eviction_when_chunk_fits() {
        let mut ring = ring_with(8, 4);
        let mut clients = vec![ClientCursor::new((), "a", 0)];
        assert!(reserve(&mut ring, &mut clients, 4).is_noop());
        assert_eq!(clients[0].position(), 0);
    }

    #[test]
    fn test_lagging_clients_jump_to_new_tail() {
        let mut ring = ring_with(8, 8);
        let mut clients = vec![
            ClientCursor::new((), "slow", 0),
            ClientCursor::new((), "mid", 5),
            ClientCursor::new((), "fast", 8),
        ];

        let eviction = reserve(&mut ring, &mut clients, 3);
        assert_eq!(eviction.evicted, 3);
        assert_eq!(ring.tail(), 3);

        assert_eq!(clients[0].position(), 3);
        assert_eq!(clients[0].take_pending_drop(), 3);
        assert_eq!(clients[1].position(), 5);
        assert_eq!(clients[1].take_pending_drop(), 0);
        assert_eq!(clients[2].position(), 8);
    }

    #[test]
    fn test_oversized_chunk_moves_everyone_past_skipped_input() {
        let mut ring = RingBuffer::new(8).unwrap();
        let mut clients = vec![ClientCursor::new((), "a", 0)];

        let eviction = reserve(&mut ring, &mut clients, 20);
        assert_eq!(eviction.skipped_input, 12);
        assert_eq!(clients[0].position(), 12);
        assert_eq!(clients[0].take_pending_drop(), 12);
    }

    #[test]
    fn test_disconnected_clients_are_left_alone() {
        let mut ring = ring_with(8, 8);
        let mut clients = vec![ClientCursor::new((), "gone", 0)];
        clients[0].disconnect(crate::cursor::DisconnectReason::PeerClosed);

        reserve(&mut ring, &mut clients, 4);
        assert_eq!(clients[0].position(), 0);
    }
}
