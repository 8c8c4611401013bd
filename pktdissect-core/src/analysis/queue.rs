//! Capture-time ordered packet queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::packet::Packet;

/// Ordering key: capture timestamp, then frame sequence.
pub(crate) type OrderKey = (i64, u64);

struct Entry {
    key: OrderKey,
    packet: Packet,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest key.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

/// Min-queue of packets by `(timestamp, frame)`, tracking buffered bytes.
#[derive(Default)]
pub(crate) struct PacketQueue {
    heap: BinaryHeap<Entry>,
    bytes: usize,
}

impl PacketQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, packet: Packet) {
        self.bytes += packet.len();
        let key = (packet.timestamp_nanos(), packet.frame());
        self.heap.push(Entry { key, packet });
    }

    pub(crate) fn pop(&mut self) -> Option<Packet> {
        let entry = self.heap.pop()?;
        self.bytes -= entry.packet.len();
        Some(entry.packet)
    }

    pub(crate) fn peek_key(&self) -> Option<OrderKey> {
        self.heap.peek().map(|entry| entry.key)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Total payload bytes currently queued.
    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        self.bytes = 0;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CaptureHeader;
    use crate::protocol::ids;

    fn packet(ts: i64, frame: u64, len: usize) -> Packet {
        let mut packet = Packet::new(vec![0u8; len], CaptureHeader::new(ts, len), ids::ETHERNET);
        packet.set_frame(frame);
        packet
    }

    #[test]
    fn test_pops_in_time_then_frame_order() {
        let mut queue = PacketQueue::new();
        queue.push(packet(30, 1, 10));
        queue.push(packet(10, 3, 10));
        queue.push(packet(10, 2, 10));
        queue.push(packet(20, 4, 10));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|p| (p.timestamp_nanos(), p.frame()))
            .collect();
        assert_eq!(order, vec![(10, 2), (10, 3), (20, 4), (30, 1)]);
    }

    #[test]
    fn test_tracks_bytes() {
        let mut queue = PacketQueue::new();
        queue.push(packet(1, 1, 100));
        queue.push(packet(2, 2, 50));
        assert_eq!(queue.bytes(), 150);
        assert_eq!(queue.peek_key(), Some((1, 1)));

        queue.pop();
        assert_eq!(queue.bytes(), 50);
        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.bytes(), 0);
        assert!(queue.is_empty());
    }
}
