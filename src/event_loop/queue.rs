//! Deadline-ordered timer queue.
//!
//! Entries are never removed eagerly. Stopping or re-arming a timer leaves its
//! old entry behind, and the owner filters stale entries by `start_id` when
//! they surface.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::TimerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub deadline: u64,
    pub start_id: u64,
    pub timer: TimerId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest deadline, then earliest start.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.start_id.cmp(&self.start_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    /// Drops every entry that is no longer live.
    pub(crate) fn retain(&mut self, is_live: impl Fn(&QueueEntry) -> bool) {
        self.heap.retain(|entry| is_live(entry));
    }

    /// Earliest live deadline. Stale entries found on top are discarded.
    pub(crate) fn next_deadline(&mut self, is_live: impl Fn(&QueueEntry) -> bool) -> Option<u64> {
        while let Some(entry) = self.heap.peek() {
            if is_live(entry) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops every entry due at `now`, in firing order. Liveness is checked by
    /// the caller at dispatch time, since an earlier callback may disarm a
    /// later entry.
    pub(crate) fn pop_expired(&mut self, now: u64) -> Vec<QueueEntry> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry);
            }
        }
        expired
    }
}
