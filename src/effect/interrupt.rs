//! Interruptibility regions.
//!
//! A fiber can only be interrupted while its `INTERRUPTION` flag is set.
//! Requests that arrive in an uninterruptible region are latched and take
//! effect as soon as the region ends. Masks let a region turn interruption
//! back on for selected sub-effects with [`Restore`].

use super::{Effect, Op, Shareable, Step, erase_cause, unerase_cause};
use crate::types::{Cause, FiberId, RuntimeFlags, RuntimeFlagsPatch};
use std::sync::Arc;

/// Restores the interruptibility that was in force outside a mask.
#[derive(Clone, Copy, Debug)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Runs `effect` with the interruptibility of the enclosing region.
    #[must_use]
    pub fn apply<A: Send + 'static, E: Shareable>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        if self.interruptible {
            effect.interruptible()
        } else {
            effect.uninterruptible()
        }
    }

    /// Returns true if the enclosing region was interruptible.
    #[must_use]
    pub const fn was_interruptible(&self) -> bool {
        self.interruptible
    }
}

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    /// Runs the effect with the runtime flags patched, restoring them after.
    #[must_use]
    pub fn with_runtime_flags(self, patch: RuntimeFlagsPatch) -> Self {
        let op = self.op;
        Self::from_op(Arc::new(Op::UpdateRuntimeFlags {
            patch,
            body: Some(Arc::new(move |_| Step::Op(Arc::clone(&op)))),
        }))
    }

    /// Makes the effect interruptible.
    #[must_use]
    pub fn interruptible(self) -> Self {
        self.with_runtime_flags(RuntimeFlagsPatch::enable(RuntimeFlags::INTERRUPTION))
    }

    /// Makes the effect uninterruptible. Interruption requests that arrive
    /// meanwhile are honored when it finishes.
    #[must_use]
    pub fn uninterruptible(self) -> Self {
        Self::from_op(Op::uninterruptible(self.op))
    }

    /// Runs `f` uninterruptibly, handing it a [`Restore`] that re-enables the
    /// interruptibility of the enclosing region for chosen sub-effects.
    #[must_use]
    pub fn uninterruptible_mask(f: impl Fn(Restore) -> Self + Send + Sync + 'static) -> Self {
        Self::mask(RuntimeFlagsPatch::disable(RuntimeFlags::INTERRUPTION), f)
    }

    /// Runs `f` interruptibly, handing it a [`Restore`] for the enclosing
    /// region's interruptibility.
    #[must_use]
    pub fn interruptible_mask(f: impl Fn(Restore) -> Self + Send + Sync + 'static) -> Self {
        Self::mask(RuntimeFlagsPatch::enable(RuntimeFlags::INTERRUPTION), f)
    }

    fn mask(patch: RuntimeFlagsPatch, f: impl Fn(Restore) -> Self + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::UpdateRuntimeFlags {
            patch,
            body: Some(Arc::new(move |previous: RuntimeFlags| {
                let restore = Restore {
                    interruptible: previous.interruptible(),
                };
                Step::Op(f(restore).op)
            })),
        }))
    }

    /// Runs `cleanup` if the effect is interrupted. The cleanup receives
    /// the ids of the interruptors.
    #[must_use]
    pub fn on_interrupt(
        self,
        cleanup: impl Fn(&[FiberId]) -> Effect<(), std::convert::Infallible> + Send + Sync + 'static,
    ) -> Self {
        self.on_error(move |cause: &Cause<E>| {
            if cause.is_interrupted() {
                cleanup(&cause.interruptors())
            } else {
                Effect::unit()
            }
        })
    }

    /// Recovers from an interruption reported by this effect.
    ///
    /// Only interruptions observed by a parent (for example through
    /// [`Fiber::join`](crate::Fiber::join)) can be recovered; the running
    /// fiber's own interruption is never swallowed.
    #[must_use]
    pub fn catch_interrupt(self, on_interrupt: impl Fn(Vec<FiberId>) -> Self + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::Fold {
            effect: self.op,
            on_failure: Arc::new(move |erased| {
                let cause: Cause<E> = unerase_cause(erased);
                if cause.is_interrupted_only() {
                    Step::Op(on_interrupt(cause.interruptors()).op)
                } else {
                    Step::Failure(erase_cause(cause))
                }
            }),
            on_success: None,
        }))
    }
}
