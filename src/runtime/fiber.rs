//! Host-side handles to root fibers.
//!
//! A [`RuntimeFiber`] lets plain threads wait on or interrupt a fiber
//! started with [`Runtime::run_fork`](super::Runtime::run_fork). A
//! [`FiberFuture`] exposes the same exit to async code.

use crate::effect::{FiberExit, Shareable, unseal_exit};
use crate::error::RuntimeError;
use crate::fiber::{FiberMessage, FiberRuntime};
use crate::types::{Exit, FiberId};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

#[derive(Default)]
struct LatchState {
    exit: Option<FiberExit>,
    wakers: Vec<Waker>,
}

/// A one-shot cell holding a root fiber's exit.
#[derive(Default)]
pub(crate) struct ExitLatch {
    state: Mutex<LatchState>,
    ready: Condvar,
}

impl ExitLatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores the exit unless one is already stored. Returns true if this
    /// call completed the latch.
    pub(crate) fn complete(&self, exit: FiberExit) -> bool {
        let wakers = {
            let mut state = self.state.lock();
            if state.exit.is_some() {
                return false;
            }
            state.exit = Some(exit);
            std::mem::take(&mut state.wakers)
        };
        self.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn peek(&self) -> Option<FiberExit> {
        self.state.lock().exit.clone()
    }

    fn wait(&self) -> FiberExit {
        let mut state = self.state.lock();
        loop {
            if let Some(exit) = &state.exit {
                return exit.clone();
            }
            self.ready.wait(&mut state);
        }
    }

    fn wait_until(&self, deadline: Instant) -> Option<FiberExit> {
        let mut state = self.state.lock();
        loop {
            if let Some(exit) = &state.exit {
                return Some(exit.clone());
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return state.exit.clone();
            }
        }
    }

    fn poll_exit(&self, waker: &Waker) -> Option<FiberExit> {
        let mut state = self.state.lock();
        if let Some(exit) = &state.exit {
            return Some(exit.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        None
    }
}

/// A handle to a root fiber, usable from any thread.
///
/// Blocking methods park the calling thread. Calling them from inside a
/// fiber blocks a worker thread and can deadlock a runtime with few
/// workers.
pub struct RuntimeFiber<A, E = Infallible> {
    id: FiberId,
    fiber: Option<Arc<FiberRuntime>>,
    latch: Arc<ExitLatch>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for RuntimeFiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            fiber: self.fiber.clone(),
            latch: Arc::clone(&self.latch),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for RuntimeFiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFiber")
            .field("id", &self.id)
            .field("done", &self.latch.peek().is_some())
            .finish()
    }
}

impl<A: Shareable, E: Shareable> RuntimeFiber<A, E> {
    pub(crate) fn new(fiber: Arc<FiberRuntime>, latch: Arc<ExitLatch>) -> Self {
        Self {
            id: fiber.id().clone(),
            fiber: Some(fiber),
            latch,
            _marker: PhantomData,
        }
    }

    /// A handle for a fiber that never started because the runtime was
    /// already shut down.
    pub(crate) fn rejected() -> Self {
        let latch = Arc::new(ExitLatch::new());
        latch.complete(Exit::interrupt(FiberId::None));
        Self {
            id: FiberId::None,
            fiber: None,
            latch,
            _marker: PhantomData,
        }
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        &self.id
    }

    /// Returns true once the exit is available.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.latch.peek().is_some()
    }

    /// The exit, if the fiber has finished.
    #[must_use]
    pub fn try_exit(&self) -> Option<Exit<A, E>> {
        self.latch.peek().map(|exit| unseal_exit(&exit))
    }

    /// Blocks until the fiber finishes.
    #[must_use]
    pub fn wait(&self) -> Exit<A, E> {
        unseal_exit(&self.latch.wait())
    }

    /// Blocks until the fiber finishes or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Exit<A, E>, RuntimeError> {
        let deadline = Instant::now() + timeout;
        self.latch
            .wait_until(deadline)
            .map(|exit| unseal_exit(&exit))
            .ok_or_else(|| RuntimeError::WaitTimeout {
                fiber: self.id.clone(),
                timeout,
            })
    }

    /// Interrupts the fiber from outside any fiber and blocks until it
    /// finishes.
    #[must_use]
    pub fn interrupt(&self) -> Exit<A, E> {
        self.interrupt_as(FiberId::None)
    }

    /// Interrupts the fiber on behalf of `by` and blocks until it finishes.
    #[must_use]
    pub fn interrupt_as(&self, by: FiberId) -> Exit<A, E> {
        self.interrupt_fork_as(by);
        self.wait()
    }

    /// Sends an interruption without waiting.
    pub fn interrupt_fork(&self) {
        self.interrupt_fork_as(FiberId::None);
    }

    fn interrupt_fork_as(&self, by: FiberId) {
        if let Some(fiber) = &self.fiber {
            fiber.tell(FiberMessage::Interrupt(by));
        }
    }

    /// A future resolving to the fiber's exit.
    #[must_use]
    pub fn into_future(self) -> FiberFuture<A, E> {
        FiberFuture {
            latch: self.latch,
            _marker: PhantomData,
        }
    }
}

/// A future that resolves to a root fiber's exit. Dropping it does not
/// interrupt the fiber.
pub struct FiberFuture<A, E = Infallible> {
    latch: Arc<ExitLatch>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> fmt::Debug for FiberFuture<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberFuture").finish_non_exhaustive()
    }
}

impl<A: Shareable, E: Shareable> Future for FiberFuture<A, E> {
    type Output = Exit<A, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.latch
            .poll_exit(cx.waker())
            .map_or(Poll::Pending, |exit| Poll::Ready(unseal_exit(&exit)))
    }
}
