//! Effect descriptions.
//!
//! An [`Effect<A, E>`] is an immutable description of a computation that
//! either produces an `A`, fails with a [`Cause<E>`], or is interrupted. It
//! does nothing until a [`Runtime`](crate::Runtime) runs it on a fiber, and
//! the same value can be run any number of times.
//!
//! The combinators are spread over submodules by concern:
//!
//! - this module: constructors and sequencing
//! - [`recovery`]: catching and folding failures
//! - [`interrupt`]: interruptibility regions and masks
//! - [`resource`]: finalizers, brackets and scopes
//! - [`concurrent`]: forking, racing and parallel collection
//! - [`environment`]: service provision and lookup
//! - [`schedule`](crate::schedule): repetition and retries

pub mod concurrent;
pub mod environment;
pub mod interrupt;
mod op;
pub mod recovery;
pub mod resource;

pub use interrupt::Restore;
pub use op::Erased;
pub(crate) use op::{
    Cont, ErasedCause, ExitHook, ExitRef, FiberExit, Handler, Op, Register, Settled, Step, Value,
    guard,
};

use crate::fiber::{FiberContext, ResumeHandle};
use crate::types::{Cause, Defect, Exit, FiberId, Time};
use core::fmt;
use parking_lot::Mutex;
use std::any::type_name;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Values that may cross fiber boundaries: errors, fiber results and
/// fiber-local values.
pub trait Shareable: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Shareable for T {}

/// A description of a computation producing `A` or failing with `E`.
pub struct Effect<A, E = Infallible> {
    pub(crate) op: Arc<Op>,
    _marker: PhantomData<fn() -> (A, E)>,
}

/// An effect that cannot fail with a typed error.
pub type UIO<A> = Effect<A, Infallible>;

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect<{}, {}>", type_name::<A>(), type_name::<E>())
    }
}

impl<A, E> Effect<A, E> {
    pub(crate) const fn from_op(op: Arc<Op>) -> Self {
        Self {
            op,
            _marker: PhantomData,
        }
    }
}

// ---------------------------------------------------------------------------
// Erasure helpers
// ---------------------------------------------------------------------------

pub(crate) fn type_mismatch<A>() -> ErasedCause {
    Cause::Die(Defect::new(format!(
        "effect value was not a {}",
        type_name::<A>()
    )))
}

pub(crate) fn unbox<A: 'static>(value: Value) -> Result<A, ErasedCause> {
    value
        .downcast::<A>()
        .map(|b| *b)
        .map_err(|_| type_mismatch::<A>())
}

pub(crate) fn erase_cause<E: Shareable>(cause: Cause<E>) -> ErasedCause {
    cause.map(|e| Arc::new(e) as Erased)
}

pub(crate) fn unerase_cause<E: Shareable>(cause: ErasedCause) -> Cause<E> {
    match cause {
        Cause::Empty => Cause::Empty,
        Cause::Fail(erased) => match erased.downcast::<E>() {
            Ok(e) => Cause::Fail(Arc::try_unwrap(e).unwrap_or_else(|shared| (*shared).clone())),
            Err(_) => Cause::Die(Defect::new(format!(
                "failure was not a {}",
                type_name::<E>()
            ))),
        },
        Cause::Die(d) => Cause::Die(d),
        Cause::Interrupt(id) => Cause::Interrupt(id),
        Cause::Then(l, r) => unerase_cause(*l).then(unerase_cause(*r)),
        Cause::Both(l, r) => unerase_cause(*l).both(unerase_cause(*r)),
    }
}

/// Converts an in-flight `A` into the shareable form stored in a fiber exit.
pub(crate) fn seal<A: Shareable>(op: Arc<Op>) -> Arc<Op> {
    Arc::new(Op::FlatMap(
        op,
        Arc::new(|value| match unbox::<A>(value) {
            Ok(a) => Step::Value(Box::new(Arc::new(a) as Erased)),
            Err(c) => Step::Failure(c),
        }),
    ))
}

pub(crate) fn unseal_exit<A: Shareable, E: Shareable>(exit: &FiberExit) -> Exit<A, E> {
    match exit {
        Exit::Success(erased) => match erased.downcast_ref::<A>() {
            Some(a) => Exit::Success(a.clone()),
            None => Exit::Failure(unerase_cause(type_mismatch::<A>())),
        },
        Exit::Failure(cause) => Exit::Failure(unerase_cause(cause.clone())),
    }
}

pub(crate) fn typed_exit<A: Clone + 'static, E: Shareable>(exit: &ExitRef<'_>) -> Exit<A, E> {
    match exit {
        ExitRef::Success(value) => match value.downcast_ref::<A>() {
            Some(a) => Exit::Success(a.clone()),
            None => Exit::Failure(unerase_cause(type_mismatch::<A>())),
        },
        ExitRef::Failure(cause) => Exit::Failure(unerase_cause((*cause).clone())),
    }
}

/// A continuation that delivers `value` exactly once.
pub(crate) fn once_value<A: Send + 'static>(value: A) -> Cont {
    let slot = Mutex::new(Some(value));
    Arc::new(move |_| match slot.lock().take() {
        Some(a) => Step::Value(Box::new(a)),
        None => Step::Failure(Cause::Die(Defect::new("one-shot continuation resumed twice"))),
    })
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    /// An effect that succeeds with `value`.
    #[must_use]
    pub fn succeed(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_op(Arc::new(Op::Succeed(Arc::new(move || {
            Box::new(value.clone()) as Value
        }))))
    }

    /// An effect that runs `f` each time it is evaluated. A panic in `f`
    /// becomes a defect.
    #[must_use]
    pub fn sync(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::Succeed(Arc::new(move || Box::new(f()) as Value))))
    }

    /// An effect built lazily by `f` each time it is evaluated.
    #[must_use]
    pub fn suspend(f: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        Self::from_op(Op::suspend(move || f().op))
    }

    /// An effect that fails with `error`.
    #[must_use]
    pub fn fail(error: E) -> Self {
        let erased: Erased = Arc::new(error);
        Self::from_op(Arc::new(Op::Fail(Arc::new(move || {
            Cause::Fail(Arc::clone(&erased))
        }))))
    }

    /// An effect that fails with the error computed by `f`.
    #[must_use]
    pub fn fail_with(f: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::Fail(Arc::new(move || {
            Cause::Fail(Arc::new(f()) as Erased)
        }))))
    }

    /// An effect that fails with `cause`.
    #[must_use]
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_op(Op::fail_cause(erase_cause(cause)))
    }

    /// An effect that dies with `defect`.
    #[must_use]
    pub fn die(defect: Defect) -> Self {
        Self::from_op(Op::die(defect))
    }

    /// An effect that dies with a defect carrying `message`.
    #[must_use]
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::new(message))
    }

    /// Interrupts the current fiber.
    ///
    /// In an interruptible region this behaves like an interruption sent by
    /// another fiber. In an uninterruptible region the effect fails with the
    /// interruption immediately and the request stays latched until the
    /// region ends.
    #[must_use]
    pub fn interrupt() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            let id = ctx.id().clone();
            ctx.latch_interrupt(id.clone());
            Step::Failure(Cause::Interrupt(id))
        }))))
    }

    /// Interrupts the current fiber on behalf of `fiber`.
    #[must_use]
    pub fn interrupt_as(fiber: FiberId) -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            ctx.latch_interrupt(fiber.clone());
            Step::Failure(Cause::Interrupt(fiber.clone()))
        }))))
    }

    /// An effect that never completes. It can still be interrupted.
    #[must_use]
    pub fn never() -> Self {
        Self::from_op(Arc::new(Op::Async {
            register: Arc::new(|_| None),
            blocking_on: None,
        }))
    }

    /// An effect that replays `exit`.
    #[must_use]
    pub fn from_exit(exit: Exit<A, E>) -> Self
    where
        A: Clone + Sync,
    {
        match exit {
            Exit::Success(a) => Self::succeed(a),
            Exit::Failure(cause) => Self::fail_cause(cause),
        }
    }

    /// An effect that replays `result`.
    #[must_use]
    pub fn from_result(result: Result<A, E>) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_exit(result.into())
    }

    /// Suspends the fiber until the callback handed to `register` is
    /// resumed.
    ///
    /// `register` may return a canceler; it runs, uninterruptibly, if the
    /// fiber is interrupted while suspended. Only the first resume of a
    /// given suspension has any effect, and a resume delivered before
    /// `register` returns continues the fiber without a trip through the
    /// scheduler.
    #[must_use]
    pub fn async_effect(
        register: impl Fn(Resume<A, E>) -> Option<UIO<()>> + Send + Sync + 'static,
    ) -> Self {
        Self::async_inner(register, None)
    }

    /// Like [`Effect::async_effect`], recording that the fiber is blocked on
    /// `fiber` for diagnostics.
    #[must_use]
    pub fn async_blocking_on(
        fiber: FiberId,
        register: impl Fn(Resume<A, E>) -> Option<UIO<()>> + Send + Sync + 'static,
    ) -> Self {
        Self::async_inner(register, Some(fiber))
    }

    fn async_inner(
        register: impl Fn(Resume<A, E>) -> Option<UIO<()>> + Send + Sync + 'static,
        blocking_on: Option<FiberId>,
    ) -> Self {
        Self::from_op(Arc::new(Op::Async {
            register: Arc::new(move |handle| register(Resume::new(handle)).map(|c| c.op)),
            blocking_on,
        }))
    }

    /// Builds an effect from the running fiber's state.
    #[must_use]
    pub fn with_fiber(f: impl Fn(&FiberContext<'_>) -> Self + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            Step::Op(f(ctx).op)
        }))))
    }

    // -----------------------------------------------------------------------
    // Sequencing
    // -----------------------------------------------------------------------

    /// Transforms the success value.
    #[must_use]
    pub fn map<B: Send + 'static>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B, E> {
        Effect::from_op(Arc::new(Op::FlatMap(
            self.op,
            Arc::new(move |value| match unbox::<A>(value) {
                Ok(a) => Step::Value(Box::new(f(a))),
                Err(c) => Step::Failure(c),
            }),
        )))
    }

    /// Feeds the success value into `f` and runs the resulting effect.
    #[must_use]
    pub fn flat_map<B: Send + 'static>(
        self,
        f: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    ) -> Effect<B, E> {
        Effect::from_op(Arc::new(Op::FlatMap(
            self.op,
            Arc::new(move |value| match unbox::<A>(value) {
                Ok(a) => Step::Op(f(a).op),
                Err(c) => Step::Failure(c),
            }),
        )))
    }

    /// Runs `self`, then `that`, combining both values with `f`.
    #[must_use]
    pub fn zip_with<B: Send + 'static, C: Send + 'static>(
        self,
        that: Effect<B, E>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Effect<C, E> {
        let f = Arc::new(f);
        let that = that.op;
        Effect::from_op(Arc::new(Op::FlatMap(
            self.op,
            Arc::new(move |value| {
                let a = match unbox::<A>(value) {
                    Ok(a) => a,
                    Err(c) => return Step::Failure(c),
                };
                let slot = Mutex::new(Some(a));
                let f = Arc::clone(&f);
                Step::Op(Arc::new(Op::FlatMap(
                    Arc::clone(&that),
                    Arc::new(move |value| {
                        let b = match unbox::<B>(value) {
                            Ok(b) => b,
                            Err(c) => return Step::Failure(c),
                        };
                        match slot.lock().take() {
                            Some(a) => Step::Value(Box::new(f(a, b))),
                            None => Step::Failure(Cause::Die(Defect::new(
                                "one-shot continuation resumed twice",
                            ))),
                        }
                    }),
                )))
            }),
        )))
    }

    /// Runs `self`, then `that`, keeping both values.
    #[must_use]
    pub fn zip<B: Send + 'static>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Runs `self`, then `that`, keeping the value of `self`.
    #[must_use]
    pub fn zip_left<B: Send + 'static>(self, that: Effect<B, E>) -> Self {
        self.zip_with(that, |a, _| a)
    }

    /// Runs `self`, then `that`, keeping the value of `that`.
    #[must_use]
    pub fn zip_right<B: Send + 'static>(self, that: Effect<B, E>) -> Effect<B, E> {
        let that = that.op;
        Effect::from_op(Arc::new(Op::FlatMap(
            self.op,
            Arc::new(move |_| Step::Op(Arc::clone(&that))),
        )))
    }

    /// Alias of [`Effect::zip_right`].
    #[must_use]
    pub fn and_then<B: Send + 'static>(self, that: Effect<B, E>) -> Effect<B, E> {
        self.zip_right(that)
    }

    /// Replaces the success value.
    #[must_use]
    pub fn as_value<B: Clone + Send + Sync + 'static>(self, value: B) -> Effect<B, E> {
        self.map(move |_| value.clone())
    }

    /// Discards the success value.
    #[must_use]
    pub fn as_unit(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    /// Runs `f` on the success value for its effect, keeping the value.
    #[must_use]
    pub fn tap<B: Send + 'static>(self, f: impl Fn(&A) -> Effect<B, E> + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::FlatMap(
            self.op,
            Arc::new(move |value| match unbox::<A>(value) {
                Ok(a) => {
                    let side = f(&a).op;
                    Step::Op(Arc::new(Op::FlatMap(side, once_value(a))))
                }
                Err(c) => Step::Failure(c),
            }),
        )))
    }

    /// Runs `f` for every item in order, collecting the results.
    #[must_use]
    pub fn for_each<T, I>(items: I, f: impl Fn(T) -> Self + Send + Sync + 'static) -> Effect<Vec<A>, E>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        let f = Arc::new(f);
        let effects = items.into_iter().map(|item| {
            let f = Arc::clone(&f);
            Self::suspend(move || f(item.clone()))
        });
        Self::collect_all(effects)
    }

    /// Runs every effect in order, collecting the results.
    #[must_use]
    pub fn collect_all(effects: impl IntoIterator<Item = Self>) -> Effect<Vec<A>, E> {
        effects
            .into_iter()
            .fold(Effect::sync(Vec::new), |acc, effect| {
                acc.zip_with(effect, |mut values, a| {
                    values.push(a);
                    values
                })
            })
    }

    /// Repeatedly runs `body`, starting from `initial`, while `cont` holds
    /// for the current state.
    #[must_use]
    pub fn iterate(
        initial: A,
        cont: impl Fn(&A) -> bool + Send + Sync + 'static,
        body: impl Fn(A) -> Self + Send + Sync + 'static,
    ) -> Self
    where
        A: Clone + Sync,
    {
        Self::iterate_inner(initial, Arc::new(cont), Arc::new(body))
    }

    fn iterate_inner(
        state: A,
        cont: Arc<dyn Fn(&A) -> bool + Send + Sync>,
        body: Arc<dyn Fn(A) -> Self + Send + Sync>,
    ) -> Self
    where
        A: Clone + Sync,
    {
        if !cont(&state) {
            return Self::succeed(state);
        }
        body(state).flat_map(move |next| {
            Self::iterate_inner(next, Arc::clone(&cont), Arc::clone(&body))
        })
    }
}

impl<A: Send + 'static> Effect<A, Infallible> {
    /// Widens the error type of an effect that cannot fail.
    #[must_use]
    pub fn widen<E: Shareable>(self) -> Effect<A, E> {
        Effect::from_op(self.op)
    }
}

impl<A: Send + 'static, E: Shareable> Effect<Effect<A, E>, E> {
    /// Runs the inner effect produced by `self`.
    #[must_use]
    pub fn flatten(self) -> Effect<A, E> {
        self.flat_map(|inner| inner)
    }
}

impl<E: Shareable> Effect<(), E> {
    /// An effect that succeeds with `()`.
    #[must_use]
    pub fn unit() -> Self {
        Self::from_op(Op::unit())
    }

    /// Yields to the scheduler, letting other fibers run.
    #[must_use]
    pub fn yield_now() -> Self {
        Self::from_op(Arc::new(Op::Yield))
    }

    /// Suspends the fiber for `duration` of runtime clock time.
    #[must_use]
    pub fn sleep(duration: Duration) -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            let deadline = ctx.now() + duration;
            Step::Op(ctx.timer().sleep_until_op(deadline))
        }))))
    }
}

impl<E: Shareable> Effect<FiberId, E> {
    /// The id of the running fiber.
    #[must_use]
    pub fn fiber_id() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            Step::Value(Box::new(ctx.id().clone()))
        }))))
    }
}

impl<E: Shareable> Effect<Time, E> {
    /// The current reading of the runtime clock.
    #[must_use]
    pub fn clock_now() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            Step::Value(Box::new(ctx.now()))
        }))))
    }
}

/// The callback handed to [`Effect::async_effect`] registrations.
pub struct Resume<A, E> {
    handle: ResumeHandle,
    _marker: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for Resume<A, E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Resume<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("fiber", self.handle.fiber_id())
            .finish()
    }
}

impl<A: Send + 'static, E: Shareable> Resume<A, E> {
    fn new(handle: ResumeHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    /// Resumes the fiber with a value.
    pub fn succeed(&self, value: A) {
        self.handle.resume(Step::Value(Box::new(value)));
    }

    /// Resumes the fiber with a typed failure.
    pub fn fail(&self, error: E) {
        self.handle
            .resume(Step::Failure(Cause::Fail(Arc::new(error) as Erased)));
    }

    /// Resumes the fiber with a failure cause.
    pub fn fail_cause(&self, cause: Cause<E>) {
        self.handle.resume(Step::Failure(erase_cause(cause)));
    }

    /// Resumes the fiber with a defect.
    pub fn die(&self, defect: Defect) {
        self.handle.resume(Step::Failure(Cause::Die(defect)));
    }

    /// Resumes the fiber by running `effect`.
    pub fn resume(&self, effect: Effect<A, E>) {
        self.handle.resume(Step::Op(effect.op));
    }

    /// Resumes the fiber with an exit.
    pub fn exit(&self, exit: Exit<A, E>) {
        match exit {
            Exit::Success(a) => self.succeed(a),
            Exit::Failure(c) => self.fail_cause(c),
        }
    }

    /// Returns true once this suspension has been resumed.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.handle.is_used()
    }
}
