//! The effect runtime: worker pool, timers and root fibers.
//!
//! A [`Runtime`] owns a work-stealing [`scheduler`], a [`TimerDriver`]
//! and the clock both read. Effects enter through [`Runtime::run_fork`]
//! and its blocking and async variants; each becomes a root fiber with
//! default flags, an empty context and the runtime's initial fiber-local
//! values.
//!
//! # Example
//!
//! ```
//! use effectum::{Effect, Exit, Runtime};
//!
//! let runtime = Runtime::builder().worker_threads(2).build().unwrap();
//! let exit = runtime.run_exit(Effect::<u32, String>::succeed(20).map(|n| n + 22));
//! assert_eq!(exit, Exit::Success(42));
//! ```

mod builder;
pub mod config;
mod fiber;
pub(crate) mod scheduler;
pub mod timer;

pub use builder::RuntimeBuilder;
pub use config::{ClockKind, RuntimeConfig};
pub use fiber::{FiberFuture, RuntimeFiber};

use crate::context::Context;
use crate::effect::{Effect, FiberExit, Shareable, seal};
use crate::error::RuntimeError;
use crate::fiber::{FiberRuntime, FiberSetup};
use crate::fiber_ref::FiberRefs;
use crate::observability::{LogSink, MIN_LOG_LEVEL, MetricsSnapshot, RuntimeMetrics};
use crate::supervisor::Supervisor;
use crate::time::{TimeSource, TimerDriver, VirtualClock, WallClock};
use crate::tracing_compat::debug;
use crate::types::id::duration_to_nanos_saturating;
use crate::types::{Cause, Exit, FiberId, RuntimeFlags, Time};
use core::fmt;
use fiber::ExitLatch;
use parking_lot::Mutex;
use scheduler::{Scheduler, SchedulerOptions};
use slab::Slab;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared by a runtime and every fiber it runs.
pub(crate) struct RuntimeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) scheduler: Scheduler<FiberRuntime>,
    pub(crate) timer: Arc<TimerDriver>,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) virtual_clock: Option<Arc<VirtualClock>>,
    pub(crate) metrics: Arc<RuntimeMetrics>,
    pub(crate) supervisor: Option<Arc<dyn Supervisor>>,
    pub(crate) log_sink: Option<Arc<dyn LogSink>>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
    roots: Mutex<Roots>,
}

#[derive(Default)]
struct Roots {
    shutdown: bool,
    pending: Slab<Arc<ExitLatch>>,
}

impl RuntimeShared {
    fn is_shutdown(&self) -> bool {
        self.roots.lock().shutdown
    }

    fn shutdown(&self) {
        let pending: Vec<Arc<ExitLatch>> = {
            let mut roots = self.roots.lock();
            if roots.shutdown {
                return;
            }
            roots.shutdown = true;
            roots.pending.drain().collect()
        };
        self.scheduler.shutdown();
        self.timer.shutdown();
        if let Some(handle) = self.timer_thread.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        let abandoned = pending
            .iter()
            .filter(|latch| latch.complete(Exit::interrupt(FiberId::None)))
            .count();
        debug!(abandoned, "runtime shut down");
    }
}

/// Runs effects on a pool of worker threads.
///
/// Dropping the runtime shuts it down: workers stop, pending timers are
/// discarded and root fibers that have not finished are reported as
/// interrupted.
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.shared.scheduler.worker_count())
            .field("clock", &self.shared.config.clock)
            .field("shutdown", &self.shared.is_shutdown())
            .finish()
    }
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Result<Self, RuntimeError> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Starts building a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from `config`.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::start(config, None, None)
    }

    pub(crate) fn start(
        config: RuntimeConfig,
        supervisor: Option<Arc<dyn Supervisor>>,
        log_sink: Option<Arc<dyn LogSink>>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let metrics = Arc::new(RuntimeMetrics::new());
        let (clock, virtual_clock): (Arc<dyn TimeSource>, _) = match config.clock {
            ClockKind::Wall => (Arc::new(WallClock::new()), None),
            ClockKind::Virtual => {
                let clock = Arc::new(VirtualClock::new());
                (Arc::clone(&clock) as Arc<dyn TimeSource>, Some(clock))
            }
        };
        let timer = Arc::new(TimerDriver::new(Arc::clone(&clock), Arc::clone(&metrics)));
        let scheduler = Scheduler::start(&SchedulerOptions {
            workers: config.worker_threads,
            thread_name_prefix: config.thread_name_prefix.clone(),
            thread_stack_size: config.thread_stack_size,
            park_timeout: config.idle_park_timeout(),
        })?;

        let timer_thread = if virtual_clock.is_none() {
            let driver = Arc::clone(&timer);
            match thread::Builder::new()
                .name("effectum-timer".into())
                .spawn(move || driver.run())
            {
                Ok(handle) => Some(handle),
                Err(err) => {
                    scheduler.shutdown();
                    return Err(RuntimeError::ThreadSpawn(err));
                }
            }
        } else {
            None
        };

        debug!(
            workers = config.worker_threads,
            clock = ?config.clock,
            ops_before_yield = config.ops_before_yield,
            "runtime started"
        );
        Ok(Self {
            shared: Arc::new(RuntimeShared {
                config,
                scheduler,
                timer,
                clock,
                virtual_clock,
                metrics,
                supervisor,
                log_sink,
                timer_thread: Mutex::new(timer_thread),
                roots: Mutex::new(Roots::default()),
            }),
        })
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// The current reading of the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.shared.clock.now()
    }

    /// A snapshot of the runtime counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.shared.timer.pending_count()
    }

    /// The fiber-local values a root fiber starts with.
    #[must_use]
    pub fn initial_fiber_refs(&self) -> FiberRefs {
        FiberRefs::empty().updated(&MIN_LOG_LEVEL, self.shared.config.min_log_level)
    }

    /// Starts `effect` on a new root fiber.
    ///
    /// After shutdown the effect does not run and the handle reports an
    /// interruption.
    pub fn run_fork<A: Shareable, E: Shareable>(&self, effect: Effect<A, E>) -> RuntimeFiber<A, E> {
        self.run_fork_with_refs(effect, self.initial_fiber_refs())
    }

    /// Starts `effect` on a new root fiber that begins with `refs`.
    pub fn run_fork_with_refs<A: Shareable, E: Shareable>(
        &self,
        effect: Effect<A, E>,
        refs: FiberRefs,
    ) -> RuntimeFiber<A, E> {
        let fiber = FiberRuntime::new(
            Arc::clone(&self.shared),
            seal::<A>(effect.op),
            FiberSetup {
                refs,
                context: Context::empty(),
                flags: RuntimeFlags::DEFAULT,
                daemon: false,
                root: true,
            },
        );
        let latch = Arc::new(ExitLatch::new());
        let key = {
            let mut roots = self.shared.roots.lock();
            if roots.shutdown {
                return RuntimeFiber::rejected();
            }
            roots.pending.insert(Arc::clone(&latch))
        };

        let shared = Arc::clone(&self.shared);
        let observer_latch = Arc::clone(&latch);
        let registered = fiber.add_observer(Box::new(move |exit: &FiberExit| {
            observer_latch.complete(exit.clone());
            let mut roots = shared.roots.lock();
            if roots.pending.contains(key) {
                drop(roots.pending.remove(key));
            }
        }));
        if let Err(exit) = registered {
            latch.complete(exit);
        }
        fiber.start(None);
        RuntimeFiber::new(fiber, latch)
    }

    /// Runs `effect` and blocks the calling thread until it finishes.
    ///
    /// Do not call this from inside a fiber.
    pub fn run_exit<A: Shareable, E: Shareable>(&self, effect: Effect<A, E>) -> Exit<A, E> {
        self.run_fork(effect).wait()
    }

    /// Runs `effect`, blocking, and converts its exit to a `Result`.
    pub fn run_sync<A: Shareable, E: Shareable>(&self, effect: Effect<A, E>) -> Result<A, Cause<E>> {
        match self.run_exit(effect) {
            Exit::Success(a) => Ok(a),
            Exit::Failure(cause) => Err(cause),
        }
    }

    /// Starts `effect` and returns a future of its exit.
    pub fn run_future<A: Shareable, E: Shareable>(&self, effect: Effect<A, E>) -> FiberFuture<A, E> {
        self.run_fork(effect).into_future()
    }

    /// Moves a virtual clock forward by `duration` and fires every timer
    /// that became due. Returns how many fired.
    pub fn advance_time(&self, duration: Duration) -> Result<usize, RuntimeError> {
        let clock = self.shared.virtual_clock.as_ref().ok_or_else(|| {
            RuntimeError::InvalidConfig("advance_time requires the virtual clock".into())
        })?;
        clock.advance(duration_to_nanos_saturating(duration));
        Ok(self.shared.timer.process_timers())
    }

    /// Stops the runtime. Fibers still running are abandoned and root
    /// fibers that have not finished report an interruption. Calling this
    /// more than once is harmless.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Returns true once [`Runtime::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn runtime() -> Runtime {
        Runtime::builder().worker_threads(2).build().unwrap()
    }

    #[test]
    fn runs_a_pure_effect() {
        let rt = runtime();
        let exit = rt.run_exit(Effect::<u32, String>::succeed(1).map(|n| n + 1));
        assert_eq!(exit, Exit::Success(2));
    }

    #[test]
    fn run_sync_reports_failure_cause() {
        let rt = runtime();
        let result = rt.run_sync(Effect::<u32, String>::fail("boom".into()));
        assert_eq!(result, Err(Cause::Fail("boom".to_string())));
    }

    #[test]
    fn run_after_shutdown_is_interrupted() {
        let rt = runtime();
        rt.shutdown();
        assert!(rt.is_shutdown());
        let exit = rt.run_exit(Effect::<u32, Infallible>::succeed(1));
        assert!(exit.is_interrupted());
    }

    #[test]
    fn shutdown_releases_waiting_roots() {
        let rt = runtime();
        let fiber = rt.run_fork(Effect::<(), Infallible>::never());
        rt.shutdown();
        assert!(fiber.wait().is_interrupted());
    }

    #[test]
    fn advance_time_needs_virtual_clock() {
        let rt = runtime();
        let err = rt.advance_time(Duration::from_secs(1)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn virtual_clock_moves_only_when_advanced() {
        let rt = Runtime::builder()
            .worker_threads(1)
            .clock(ClockKind::Virtual)
            .build()
            .unwrap();
        assert_eq!(rt.now(), Time::ZERO);
        assert_eq!(rt.advance_time(Duration::from_millis(5)).unwrap(), 0);
        assert_eq!(rt.now(), Time::from_millis(5));
    }

    #[test]
    fn metrics_count_root_fibers() {
        let rt = runtime();
        let _ = rt.run_exit(Effect::<u32, String>::succeed(1));
        let _ = rt.run_exit(Effect::<u32, String>::fail("x".into()));
        let snapshot = rt.metrics();
        assert!(snapshot.fibers_started >= 2);
        assert!(snapshot.fibers_failed >= 1);
    }
}
