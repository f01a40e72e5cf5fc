//! Deadline ordering for the timer driver.
//!
//! A min-heap of `(deadline, key)` pairs. Keys index the timer driver's
//! callback slab; a generation distinguishes a key that has been reused
//! after its timer was cancelled.

use crate::types::Time;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Identifies one registration: slot in the callback slab plus the
/// generation the slot had when the timer was registered.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TimerKey {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    key: TimerKey,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first, then
        // registration order).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.key.generation.cmp(&self.key.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending deadlines, earliest on top. Cancelled timers stay in the heap
/// until they come due; the driver skips keys whose slot has moved on.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
}

impl TimerHeap {
    /// An empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries still queued, cancelled ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// No deadlines queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queues `key` to fire at `deadline`.
    pub fn insert(&mut self, key: TimerKey, deadline: Time) {
        self.heap.push(TimerEntry { deadline, key });
    }

    /// The next deadline the driver must wake for.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Removes every key due at `now`, earliest first.
    pub fn pop_expired(&mut self, now: Time) -> Vec<TimerKey> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry.key);
            }
        }
        due
    }

    /// Keeps only the entries whose key satisfies `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&TimerKey) -> bool) {
        let mut keep = keep;
        self.heap.retain(|entry| keep(&entry.key));
    }

    /// Forgets every pending deadline. Used at shutdown.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
