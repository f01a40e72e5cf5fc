//! Global injection queue.
//!
//! A thread-safe unbounded queue for fibers scheduled from outside a worker
//! thread, such as timer callbacks, host threads and fibers of another
//! runtime resuming one of ours.

use crossbeam_queue::SegQueue;

/// A global run queue.
#[derive(Debug)]
pub(crate) struct GlobalQueue<T> {
    inner: SegQueue<T>,
}

impl<T> Default for GlobalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GlobalQueue<T> {
    /// Creates a new global queue.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Pushes an item to the global queue.
    pub(crate) fn push(&self, item: T) {
        self.inner.push(item);
    }

    /// Pops an item from the global queue.
    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Returns the number of queued items.
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the queue is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Removes every queued item.
    pub(crate) fn clear(&self) -> usize {
        let mut removed = 0;
        while self.inner.pop().is_some() {
            removed += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = GlobalQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}
