//! Timer driver for sleep and timeout registration.
//!
//! The driver pairs a time source with a [`TimerHeap`] of deadlines and a
//! slab of pending callbacks. A timer fires at most once, and exactly one of
//! cancel and fire wins: both take the callback out of the slab under the
//! driver lock. Callbacks run outside the lock.

use crate::effect::{Op, Step, Value};
use crate::fiber::ResumeHandle;
use crate::observability::RuntimeMetrics;
use crate::runtime::timer::{TimerHeap, TimerKey};
use crate::tracing_compat::trace;
use crate::types::Time;
use crate::types::id::duration_to_nanos_saturating;
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Time source abstraction for getting the current time.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Wall clock time source.
///
/// Uses `std::time::Instant` internally. The epoch is the time when this
/// source was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(duration_to_nanos_saturating(self.epoch.elapsed()))
    }
}

/// A manually advanced clock.
///
/// # Example
///
/// ```
/// use effectum::time::{TimeSource, VirtualClock};
/// use effectum::Time;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(1_000_000_000); // 1 second
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    /// Current time in nanoseconds.
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by the given number of nanoseconds.
    pub fn advance(&self, nanos: u64) {
        let mut current = self.now.load(Ordering::Acquire);
        loop {
            let target = current.saturating_add(nanos);
            match self
                .now
                .compare_exchange_weak(current, target, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Advances time to the given absolute time. Moving backwards is a
    /// no-op.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}

type Callback = Box<dyn FnOnce() + Send>;

/// Cancelled entries tolerated in the heap before it is compacted.
const COMPACT_THRESHOLD: usize = 64;

struct Slot {
    generation: u64,
    callback: Callback,
}

struct DriverState {
    heap: TimerHeap,
    slots: Slab<Slot>,
    next_generation: u64,
    shutdown: bool,
}

/// Owns pending timers and fires them when their deadline passes.
pub struct TimerDriver {
    clock: Arc<dyn TimeSource>,
    state: Mutex<DriverState>,
    wakeup: Condvar,
    metrics: Arc<RuntimeMetrics>,
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("clock", &self.clock)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl TimerDriver {
    /// Creates a driver reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>, metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            clock,
            state: Mutex::new(DriverState {
                heap: TimerHeap::new(),
                slots: Slab::new(),
                next_generation: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            metrics,
        }
    }

    /// Returns the current time from the underlying clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Registers `callback` to run once `deadline` has passed. A deadline
    /// that has already passed fires immediately, on the calling thread.
    ///
    /// After [`TimerDriver::shutdown`] a future deadline is never reached:
    /// the callback is dropped and the returned key is not registered. A
    /// fiber sleeping on it stays suspended; shutdown has already completed
    /// every root handle as interrupted.
    pub fn register(&self, deadline: Time, callback: impl FnOnce() + Send + 'static) -> TimerKey {
        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;
        let unregistered = TimerKey {
            slot: usize::MAX,
            generation,
        };
        if deadline <= self.clock.now() {
            drop(state);
            self.metrics.timer_fired();
            callback();
            return unregistered;
        }
        if state.shutdown {
            drop(state);
            trace!(deadline = ?deadline, "timer registered after shutdown; dropping callback");
            return unregistered;
        }
        let slot = state.slots.insert(Slot {
            generation,
            callback: Box::new(callback),
        });
        let key = TimerKey { slot, generation };
        let earliest = state.heap.peek_deadline().is_none_or(|d| deadline < d);
        state.heap.insert(key, deadline);
        drop(state);
        if earliest {
            self.wakeup.notify_one();
        }
        key
    }

    /// Cancels a timer. Returns true if the timer was pending and will now
    /// never fire.
    pub fn cancel(&self, key: TimerKey) -> bool {
        let callback = {
            let mut state = self.state.lock();
            let live = state
                .slots
                .get(key.slot)
                .is_some_and(|slot| slot.generation == key.generation);
            let removed = live.then(|| state.slots.remove(key.slot));
            if removed.is_some() {
                Self::compact(&mut state);
            }
            removed
        };
        // Dropped outside the lock: the callback may own a fiber handle.
        let cancelled = callback.is_some();
        drop(callback);
        if cancelled {
            self.metrics.timer_cancelled();
        }
        cancelled
    }

    /// Drops heap entries whose slot was cancelled once they outnumber the
    /// live timers.
    fn compact(state: &mut DriverState) {
        let dead = state.heap.len().saturating_sub(state.slots.len());
        if dead <= COMPACT_THRESHOLD || dead <= state.slots.len() {
            return;
        }
        let slots = &state.slots;
        state.heap.retain(|key| {
            slots
                .get(key.slot)
                .is_some_and(|slot| slot.generation == key.generation)
        });
    }

    /// Returns the earliest registered deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.state.lock().heap.peek_deadline()
    }

    /// Fires every timer whose deadline has passed. Returns the number
    /// fired.
    pub fn process_timers(&self) -> usize {
        let now = self.clock.now();
        let callbacks: Vec<Callback> = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let slots = &mut state.slots;
            state
                .heap
                .pop_expired(now)
                .into_iter()
                .filter_map(|key| {
                    let live = slots
                        .get(key.slot)
                        .is_some_and(|slot| slot.generation == key.generation);
                    live.then(|| slots.remove(key.slot).callback)
                })
                .collect()
        };
        let fired = callbacks.len();
        for callback in callbacks {
            self.metrics.timer_fired();
            callback();
        }
        fired
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Drives timers against a wall clock until [`TimerDriver::shutdown`].
    pub(crate) fn run(&self) {
        trace!("timer driver started");
        loop {
            let mut state = self.state.lock();
            if state.shutdown {
                break;
            }
            let now = self.clock.now();
            match state.heap.peek_deadline() {
                Some(deadline) if deadline <= now => {
                    drop(state);
                    self.process_timers();
                }
                Some(deadline) => {
                    let _ = self.wakeup.wait_for(&mut state, deadline.duration_since(now));
                }
                None => self.wakeup.wait(&mut state),
            }
        }
        trace!("timer driver stopped");
    }

    /// Stops the driver thread and drops all pending callbacks.
    pub(crate) fn shutdown(&self) {
        let pending: Vec<Slot> = {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.heap.clear();
            state.slots.drain().collect()
        };
        self.wakeup.notify_all();
        drop(pending);
    }

    /// An async op that resumes the fiber at `deadline`. Interrupting the
    /// sleeping fiber cancels the timer.
    pub(crate) fn sleep_until_op(self: &Arc<Self>, deadline: Time) -> Arc<Op> {
        let driver = Arc::clone(self);
        Arc::new(Op::Async {
            register: Arc::new(move |resume: ResumeHandle| {
                let key = driver.register(deadline, move || resume.resume(Step::Value(Box::new(()))));
                let driver = Arc::clone(&driver);
                Some(Arc::new(Op::Succeed(Arc::new(move || {
                    driver.cancel(key);
                    Box::new(()) as Value
                }))))
            }),
            blocking_on: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn virtual_driver() -> (Arc<VirtualClock>, TimerDriver) {
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::new(clock.clone(), Arc::new(RuntimeMetrics::new()));
        (clock, driver)
    }

    #[test]
    fn virtual_clock_advances() {
        let clock = VirtualClock::starting_at(Time::from_secs(1));
        clock.advance(500_000_000);
        assert_eq!(clock.now(), Time::from_millis(1500));
        clock.advance_to(Time::from_secs(1));
        assert_eq!(clock.now(), Time::from_millis(1500));
    }

    #[test]
    fn timers_fire_once_when_due() {
        let (clock, driver) = virtual_driver();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        driver.register(Time::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(driver.process_timers(), 0);
        clock.advance_to(Time::from_millis(10));
        assert_eq!(driver.process_timers(), 1);
        assert_eq!(driver.process_timers(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_wins_over_fire() {
        let (clock, driver) = virtual_driver();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let key = driver.register(Time::from_millis(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(driver.cancel(key));
        assert!(!driver.cancel(key));
        clock.advance(10_000_000);
        assert_eq!(driver.process_timers(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reused_slot_does_not_cancel_new_timer() {
        let (clock, driver) = virtual_driver();
        let old = driver.register(Time::from_millis(5), || {});
        assert!(driver.cancel(old));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _new = driver.register(Time::from_millis(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!driver.cancel(old));
        clock.advance_to(Time::from_millis(5));
        driver.process_timers();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_timers_do_not_accumulate() {
        let (_clock, driver) = virtual_driver();
        let keep = driver.register(Time::from_secs(10), || {});
        for _ in 0..10_000 {
            let key = driver.register(Time::from_secs(86_400), || {});
            assert!(driver.cancel(key));
        }
        let heap_len = driver.state.lock().heap.len();
        assert_eq!(driver.pending_count(), 1);
        assert!(heap_len <= COMPACT_THRESHOLD + 2, "heap_len = {heap_len}");
        assert_eq!(driver.next_deadline(), Some(Time::from_secs(10)));
        assert!(driver.cancel(keep));
    }

    #[test]
    fn register_after_shutdown_drops_callback() {
        let (_clock, driver) = virtual_driver();
        driver.shutdown();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let key = driver.register(Time::from_millis(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!driver.cancel(key));
        assert_eq!(driver.pending_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn past_deadline_fires_immediately() {
        let (clock, driver) = virtual_driver();
        clock.advance_to(Time::from_secs(2));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        driver.register(Time::from_secs(1), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(driver.pending_count(), 0);
    }
}
