//! Worker thread logic.

use super::stealing::steal_from;
use super::{LOCAL, LocalSlot, Runnable, SchedulerShared};
use crate::tracing_compat::trace;
use crossbeam_deque::Worker as Deque;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Identifier for a scheduler worker.
pub(crate) type WorkerId = usize;

/// A worker thread that runs fibers.
pub(crate) struct Worker<T: Runnable> {
    id: WorkerId,
    shared: Arc<SchedulerShared<T>>,
    next_victim: usize,
}

impl<T: Runnable> Worker<T> {
    pub(crate) fn new(id: WorkerId, shared: Arc<SchedulerShared<T>>) -> Self {
        let next_victim = (id + 1) % shared.stealers.len().max(1);
        Self {
            id,
            shared,
            next_victim,
        }
    }

    /// Runs the scheduling loop until shutdown. The local queue lives in a
    /// thread-local slot so that fibers scheduled from this thread land on
    /// it directly.
    pub(crate) fn run_loop(mut self, local: Deque<Arc<T>>) {
        LOCAL.with(|slot| {
            *slot.borrow_mut() = Some(LocalSlot {
                scheduler: self.shared.id,
                queue: Box::new(local),
            });
        });
        trace!(worker_id = self.id, "worker started");

        while !self.shared.shutdown.load(Ordering::Acquire) {
            match self.find_work() {
                Some(task) => task.run_task(),
                None => self.park(),
            }
        }

        drop(LOCAL.with(|slot| slot.borrow_mut().take()));
        trace!(worker_id = self.id, "worker stopped");
    }

    fn pop_local(&self) -> Option<Arc<T>> {
        LOCAL.with(|slot| {
            slot.borrow()
                .as_ref()
                .filter(|local| local.scheduler == self.shared.id)
                .and_then(|local| local.queue.downcast_ref::<Deque<Arc<T>>>())
                .and_then(Deque::pop)
        })
    }

    fn find_work(&mut self) -> Option<Arc<T>> {
        // 1. Local queue
        if let Some(task) = self.pop_local() {
            return Some(task);
        }

        // 2. Global queue
        if let Some(task) = self.shared.global.pop() {
            return Some(task);
        }

        // 3. Steal, starting from a rotating victim
        let start = self.next_victim;
        self.next_victim = (start + 1) % self.shared.stealers.len().max(1);
        steal_from(&self.shared.stealers, start)
    }

    /// Parks until notified or until the idle timeout passes. The timeout
    /// bounds how long work pushed to a sibling's local queue can sit
    /// unnoticed.
    fn park(&self) {
        let idle = &self.shared.idle;
        let mut guard = idle.lock.lock();
        idle.sleeping.fetch_add(1, Ordering::SeqCst);
        let has_work = !self.shared.global.is_empty()
            || self.shared.stealers.iter().any(|s| !s.is_empty());
        if !has_work && !self.shared.shutdown.load(Ordering::SeqCst) {
            let _ = idle.condvar.wait_for(&mut guard, self.shared.park_timeout);
        }
        idle.sleeping.fetch_sub(1, Ordering::SeqCst);
    }
}
