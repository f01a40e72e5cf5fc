//! Erased effect descriptors.
//!
//! Every [`Effect`](super::Effect) is a typed handle around an `Arc<Op>`.
//! The interpreter only sees this erased form: values travel as
//! `Box<dyn Any + Send>`, typed failures as `Arc<dyn Any + Send + Sync>`
//! inside a [`Cause`]. The typed layer inserts the downcasts, and a failed
//! downcast becomes a defect rather than a panic.

use crate::context::ContextPatch;
use crate::fiber::{FiberContext, ResumeHandle};
use crate::fiber_ref::FiberRefs;
use crate::types::{Cause, Defect, Exit, FiberId, RuntimeFlags, RuntimeFlagsPatch};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

/// An in-flight success value.
pub(crate) type Value = Box<dyn Any + Send>;

/// A shareable, type-erased payload (typed failures, fiber results).
pub type Erased = Arc<dyn Any + Send + Sync>;

/// A cause whose typed failures are erased.
pub(crate) type ErasedCause = Cause<Erased>;

/// The exit of a fiber before it is viewed through a typed handle.
pub(crate) type FiberExit = Exit<Erased, Erased>;

pub(crate) type Thunk = Arc<dyn Fn() -> Value + Send + Sync>;
pub(crate) type CauseThunk = Arc<dyn Fn() -> ErasedCause + Send + Sync>;
pub(crate) type Cont = Arc<dyn Fn(Value) -> Step + Send + Sync>;
pub(crate) type Handler = Arc<dyn Fn(ErasedCause) -> Step + Send + Sync>;
pub(crate) type ExitHook = Arc<dyn Fn(ExitRef<'_>) -> Arc<Op> + Send + Sync>;
pub(crate) type Register = Arc<dyn Fn(ResumeHandle) -> Option<Arc<Op>> + Send + Sync>;
pub(crate) type FlagsBody = Arc<dyn Fn(RuntimeFlags) -> Step + Send + Sync>;
pub(crate) type FiberFn = Arc<dyn Fn(&mut FiberContext<'_>) -> Step + Send + Sync>;

/// The next thing the interpreter should do.
pub(crate) enum Step {
    /// Deliver a value to the top continuation.
    Value(Value),
    /// Unwind with a failure.
    Failure(ErasedCause),
    /// Evaluate another op.
    Op(Arc<Op>),
}

/// A finished outcome held while a finalizer runs.
pub(crate) enum Settled {
    Success(Value),
    Failure(ErasedCause),
}

impl Settled {
    pub(crate) fn into_step(self) -> Step {
        match self {
            Self::Success(v) => Step::Value(v),
            Self::Failure(c) => Step::Failure(c),
        }
    }

    pub(crate) fn as_exit_ref(&self) -> ExitRef<'_> {
        match self {
            Self::Success(v) => ExitRef::Success(v),
            Self::Failure(c) => ExitRef::Failure(c),
        }
    }
}

/// A borrowed view of an outcome, handed to exit hooks.
pub(crate) enum ExitRef<'a> {
    Success(&'a Value),
    Failure(&'a ErasedCause),
}

impl ExitRef<'_> {
    /// The outcome with the success value dropped.
    pub(crate) fn to_unit_exit(&self) -> Exit<(), Erased> {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(c) => Exit::Failure((*c).clone()),
        }
    }
}

/// An erased effect.
pub(crate) enum Op {
    /// Produce a value from a thunk. Panics become defects.
    Succeed(Thunk),
    /// Fail with a cause built by a thunk.
    Fail(CauseThunk),
    /// Run the effect, then feed its value to the continuation.
    FlatMap(Arc<Op>, Cont),
    /// Run the effect and route its outcome to one of two handlers. A
    /// missing success handler passes the value through.
    Fold {
        effect: Arc<Op>,
        on_failure: Handler,
        on_success: Option<Cont>,
    },
    /// Suspend until the registered callback resumes the fiber. The
    /// register function may return a canceler run on interruption.
    Async {
        register: Register,
        blocking_on: Option<FiberId>,
    },
    /// Start a child fiber and produce its handle.
    Fork { effect: Arc<Op>, daemon: bool },
    /// Run the effect, then the hook with its outcome, uninterruptibly.
    OnExit { effect: Arc<Op>, hook: ExitHook },
    /// Patch the runtime flags. With a body, the patch is scoped to it and
    /// the body receives the flags in force before the patch.
    UpdateRuntimeFlags {
        patch: RuntimeFlagsPatch,
        body: Option<FlagsBody>,
    },
    /// Run the effect with a patched service context.
    Provide { patch: ContextPatch, effect: Arc<Op> },
    /// Give other fibers a chance to run.
    Yield,
    /// Read the current fiber's FiberRefs.
    GetFiberRefs,
    /// Replace the current fiber's FiberRefs.
    SetFiberRefs(FiberRefs),
    /// Inspect the running fiber and choose what to do next.
    WithFiber(FiberFn),
}

static UNIT: LazyLock<Arc<Op>> =
    LazyLock::new(|| Arc::new(Op::Succeed(Arc::new(|| Box::new(()) as Value))));

impl Op {
    pub(crate) fn unit() -> Arc<Self> {
        Arc::clone(&UNIT)
    }

    pub(crate) fn fail_cause(cause: ErasedCause) -> Arc<Self> {
        Arc::new(Self::Fail(Arc::new(move || cause.clone())))
    }

    pub(crate) fn die(defect: Defect) -> Arc<Self> {
        Self::fail_cause(Cause::Die(defect))
    }

    pub(crate) fn suspend(f: impl Fn() -> Arc<Self> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self::FlatMap(Self::unit(), Arc::new(move |_| Step::Op(f()))))
    }

    pub(crate) fn uninterruptible(effect: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::UpdateRuntimeFlags {
            patch: RuntimeFlagsPatch::disable(RuntimeFlags::INTERRUPTION),
            body: Some(Arc::new(move |_| Step::Op(Arc::clone(&effect)))),
        })
    }

    /// Runs `effect`, discarding both its value and failure.
    pub(crate) fn ignore(effect: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Fold {
            effect,
            on_failure: Arc::new(|_| Step::Value(Box::new(()))),
            on_success: Some(Arc::new(|_| Step::Value(Box::new(())))),
        })
    }

    fn take_child(&mut self) -> Option<Arc<Self>> {
        match self {
            Self::FlatMap(effect, _)
            | Self::Fold { effect, .. }
            | Self::Fork { effect, .. }
            | Self::OnExit { effect, .. }
            | Self::Provide { effect, .. } => {
                if Arc::ptr_eq(effect, &*UNIT) {
                    None
                } else {
                    Some(std::mem::replace(effect, Self::unit()))
                }
            }
            _ => None,
        }
    }
}

impl Drop for Op {
    // Long left-nested chains would otherwise drop recursively.
    fn drop(&mut self) {
        let mut pending: Vec<Arc<Self>> = Vec::new();
        pending.extend(self.take_child());
        while let Some(child) = pending.pop() {
            if let Some(mut op) = Arc::into_inner(child) {
                pending.extend(op.take_child());
            }
        }
    }
}

/// Runs `f`, converting a panic into a defect.
pub(crate) fn guard(f: impl FnOnce() -> Step) -> Step {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(step) => step,
        Err(payload) => Step::Failure(Cause::Die(Defect::from_panic(payload))),
    }
}
