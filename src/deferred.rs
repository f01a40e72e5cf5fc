//! One-shot synchronization between fibers.
//!
//! A [`Deferred`] starts empty and is completed at most once with an
//! [`Exit`]. Fibers awaiting it suspend until then; every waiter receives
//! its own copy of the exit. Awaiting is interruptible and an interrupted
//! waiter is removed from the waiter list.
//!
//! # Example
//!
//! ```
//! use effectum::{Deferred, Effect, Exit, Runtime};
//!
//! let runtime = Runtime::builder().worker_threads(2).build().unwrap();
//! let program = Deferred::<u32, String>::make().widen().flat_map(|deferred| {
//!     let waiter = deferred.await_value();
//!     deferred
//!         .succeed(7)
//!         .widen()
//!         .zip_right(waiter)
//! });
//! assert_eq!(runtime.run_exit(program), Exit::Success(7));
//! ```

use crate::effect::{Effect, Resume, Shareable, UIO};
use crate::types::{Cause, Exit};
use core::fmt;
use parking_lot::Mutex;
use slab::Slab;
use std::convert::Infallible;
use std::sync::Arc;

struct DeferredState<A, E> {
    exit: Option<Exit<A, E>>,
    waiters: Slab<Resume<A, E>>,
}

/// A value that some fiber will provide later.
pub struct Deferred<A, E = Infallible> {
    state: Arc<Mutex<DeferredState<A, E>>>,
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A, E> fmt::Debug for Deferred<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Deferred")
            .field("done", &state.exit.is_some())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl<A: Shareable, E: Shareable> Default for Deferred<A, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Shareable, E: Shareable> Deferred<A, E> {
    /// Creates an empty deferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeferredState {
                exit: None,
                waiters: Slab::new(),
            })),
        }
    }

    /// An effect that creates an empty deferred.
    #[must_use]
    pub fn make() -> UIO<Self> {
        UIO::sync(Self::new)
    }

    /// Completes with a value. Produces false if already completed.
    #[must_use]
    pub fn succeed(&self, value: A) -> UIO<bool> {
        self.complete(Exit::Success(value))
    }

    /// Completes with a typed failure. Produces false if already completed.
    #[must_use]
    pub fn fail(&self, error: E) -> UIO<bool> {
        self.complete(Exit::fail(error))
    }

    /// Completes with a failure cause. Produces false if already completed.
    #[must_use]
    pub fn fail_cause(&self, cause: Cause<E>) -> UIO<bool> {
        self.complete(Exit::Failure(cause))
    }

    /// Completes with `exit` and wakes every waiter. Produces false if
    /// already completed, in which case nothing changes.
    #[must_use]
    pub fn complete(&self, exit: Exit<A, E>) -> UIO<bool> {
        let this = self.clone();
        UIO::sync(move || this.complete_now(exit.clone()))
    }

    /// Completes immediately, outside any fiber.
    pub fn complete_now(&self, exit: Exit<A, E>) -> bool {
        let waiters: Vec<Resume<A, E>> = {
            let mut state = self.state.lock();
            if state.exit.is_some() {
                return false;
            }
            state.exit = Some(exit.clone());
            state.waiters.drain().collect()
        };
        for waiter in waiters {
            waiter.exit(exit.clone());
        }
        true
    }

    /// Waits for completion and produces the value or re-raises the
    /// failure.
    #[must_use]
    pub fn await_value(&self) -> Effect<A, E> {
        let state = Arc::clone(&self.state);
        Effect::async_effect(move |resume: Resume<A, E>| {
            let mut guard = state.lock();
            if let Some(exit) = &guard.exit {
                let exit = exit.clone();
                drop(guard);
                resume.exit(exit);
                return None;
            }
            let key = guard.waiters.insert(resume);
            drop(guard);
            let state = Arc::clone(&state);
            Some(UIO::sync(move || {
                let mut guard = state.lock();
                if guard.waiters.contains(key) {
                    drop(guard.waiters.remove(key));
                }
            }))
        })
    }

    /// The exit, if completed.
    #[must_use]
    pub fn poll(&self) -> UIO<Option<Exit<A, E>>> {
        let state = Arc::clone(&self.state);
        UIO::sync(move || state.lock().exit.clone())
    }

    /// Returns true once completed.
    #[must_use]
    pub fn is_done(&self) -> UIO<bool> {
        let state = Arc::clone(&self.state);
        UIO::sync(move || state.lock().exit.is_some())
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}
