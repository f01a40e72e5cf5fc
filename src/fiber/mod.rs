//! Fibers: lightweight threads of effect execution.
//!
//! A [`Fiber<A, E>`] is a typed handle to a running fiber. The fiber itself
//! lives in the interpreter ([`runtime`]), which other fibers reach only by
//! messages and exit observers.

mod context;
mod resume;
pub(crate) mod runtime;

pub use context::FiberContext;
pub(crate) use resume::ResumeHandle;
pub(crate) use runtime::{FiberMessage, FiberRuntime, FiberSetup, observe};

use crate::effect::{Effect, Op, Resume, Shareable, Step, UIO, unseal_exit};
use crate::fiber_ref::FiberRefs;
use crate::types::{Exit, FiberId};
use core::fmt;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

/// A snapshot of what a fiber is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberStatus {
    /// Evaluating, or waiting in a run queue.
    Running {
        /// Whether the fiber is interruptible.
        interruptible: bool,
    },
    /// Waiting for an async callback.
    Suspended {
        /// Whether the fiber is interruptible.
        interruptible: bool,
        /// The fiber it is waiting on, if known.
        blocking_on: Option<FiberId>,
    },
    /// Finished.
    Done,
}

impl FiberStatus {
    /// Returns true once the fiber has finished.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true while the fiber is suspended.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// A handle to a forked fiber producing `A` or failing with `E`.
pub struct Fiber<A, E = Infallible> {
    runtime: Arc<FiberRuntime>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").field("id", self.runtime.id()).finish()
    }
}

impl<A, E> PartialEq for Fiber<A, E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.runtime, &other.runtime)
    }
}

impl<A, E> Eq for Fiber<A, E> {}

impl<A: Shareable, E: Shareable> Fiber<A, E> {
    pub(crate) fn new(runtime: Arc<FiberRuntime>) -> Self {
        Self {
            runtime,
            _marker: PhantomData,
        }
    }

    pub(crate) fn runtime(&self) -> &Arc<FiberRuntime> {
        &self.runtime
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        self.runtime.id()
    }

    /// Waits for the fiber to finish and produces its exit. Interrupting
    /// the waiter does not interrupt the fiber.
    #[must_use]
    pub fn await_exit(&self) -> UIO<Exit<A, E>> {
        observe(Arc::clone(&self.runtime), unseal_exit::<A, E>)
    }

    /// Waits for the fiber, merges its fiber-local values into the caller
    /// on success, and re-raises its failure otherwise.
    #[must_use]
    pub fn join(&self) -> Effect<A, E> {
        let fiber = self.clone();
        self.await_exit().widen::<E>().flat_map(move |exit| match exit {
            Exit::Success(a) => fiber.inherit_all().widen::<E>().as_value(a),
            Exit::Failure(cause) => Effect::fail_cause(cause),
        })
    }

    /// Merges the finished fiber's changed fiber-local values into the
    /// caller. Does nothing while the fiber is still running.
    #[must_use]
    pub fn inherit_all(&self) -> UIO<()> {
        let runtime = Arc::clone(&self.runtime);
        Effect::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            if let Some(final_refs) = runtime.final_refs() {
                let joined = ctx
                    .fiber_refs()
                    .join(runtime.initial_refs(), &final_refs);
                *ctx.fiber_refs_mut() = joined;
            }
            Step::Value(Box::new(()))
        }))))
    }

    /// Interrupts the fiber on behalf of the caller and waits for it to
    /// finish. Interrupting the calling fiber itself behaves like
    /// [`Effect::interrupt`].
    #[must_use]
    pub fn interrupt(&self) -> UIO<Exit<A, E>> {
        let fiber = self.clone();
        Effect::with_fiber(move |ctx| {
            if ctx.id() == fiber.id() {
                Effect::interrupt()
            } else {
                fiber.interrupt_as(ctx.id().clone())
            }
        })
    }

    /// Interrupts the fiber on behalf of `by` and waits for it to finish.
    #[must_use]
    pub fn interrupt_as(&self, by: FiberId) -> UIO<Exit<A, E>> {
        let fiber = self.clone();
        Effect::with_fiber(move |ctx| {
            if ctx.id() == fiber.id() {
                return Effect::interrupt_as(by.clone());
            }
            let runtime = Arc::clone(&fiber.runtime);
            let by = by.clone();
            UIO::sync(move || runtime.tell(FiberMessage::Interrupt(by.clone())))
                .zip_right(fiber.await_exit())
        })
    }

    /// Sends an interruption without waiting for the fiber to finish.
    #[must_use]
    pub fn interrupt_fork(&self) -> UIO<()> {
        let runtime = Arc::clone(&self.runtime);
        Effect::with_fiber(move |ctx| {
            let runtime = Arc::clone(&runtime);
            let by = ctx.id().clone();
            UIO::sync(move || runtime.tell(FiberMessage::Interrupt(by.clone())))
        })
    }

    /// The exit if the fiber has finished, without waiting.
    #[must_use]
    pub fn poll(&self) -> UIO<Option<Exit<A, E>>> {
        let runtime = Arc::clone(&self.runtime);
        UIO::sync(move || runtime.poll().map(|exit| unseal_exit::<A, E>(&exit)))
    }

    /// A snapshot of the fiber's status.
    #[must_use]
    pub fn status(&self) -> UIO<FiberStatus> {
        let runtime = Arc::clone(&self.runtime);
        UIO::sync(move || runtime.status())
    }

    /// Ids of the fiber's live non-daemon children.
    #[must_use]
    pub fn children(&self) -> UIO<Vec<FiberId>> {
        let runtime = Arc::clone(&self.runtime);
        UIO::sync(move || runtime.children_ids())
    }

    /// The fiber's current fiber-local values, read by the fiber itself
    /// between steps.
    #[must_use]
    pub fn fiber_refs(&self) -> UIO<FiberRefs> {
        let runtime = Arc::clone(&self.runtime);
        Effect::with_fiber(move |ctx| {
            if Arc::ptr_eq(ctx.fiber(), &runtime) {
                return UIO::succeed(ctx.fiber_refs().clone());
            }
            let runtime = Arc::clone(&runtime);
            UIO::<FiberRefs>::async_effect(move |resume: Resume<FiberRefs, Infallible>| {
                match runtime.final_refs() {
                    Some(refs) => resume.succeed(refs),
                    None => runtime.tell(FiberMessage::Stateful(Box::new(move |target: &mut FiberContext<'_>| {
                        resume.succeed(target.fiber_refs().clone());
                    }))),
                }
                None
            })
        })
    }
}
