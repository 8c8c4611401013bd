//! Deadlines driven by capture time.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A scheduled timeout, routed back to the analyzer that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeoutEntry {
    /// Capture-time deadline in nanoseconds.
    pub deadline: i64,
    seq: u64,
    pub(crate) analyzer: usize,
    /// Analyzer-chosen identifier handed back on expiry.
    pub token: u64,
}

/// Min-heap of deadlines. Entries with equal deadlines fire in scheduling order.
#[derive(Debug, Default)]
pub(crate) struct TimeoutQueue {
    heap: BinaryHeap<Reverse<TimeoutEntry>>,
    next_seq: u64,
}

impl TimeoutQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, deadline: i64, analyzer: usize, token: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimeoutEntry {
            deadline,
            seq,
            analyzer,
            token,
        }));
    }

    /// Next entry whose deadline is at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: i64) -> Option<TimeoutEntry> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.deadline <= now => self.heap.pop().map(|r| r.0),
            _ => None,
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<i64> {
        self.heap.peek().map(|r| r.0.deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
