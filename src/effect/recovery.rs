//! Catching, folding and reshaping failures.
//!
//! All recovery combinators are built on one primitive, a fold frame with a
//! failure handler and an optional success handler. While the running fiber
//! is being interrupted, failure handlers are skipped, so none of these
//! combinators can swallow the fiber's own interruption.

use super::{Effect, ErasedCause, Op, Shareable, Step, UIO, erase_cause, unbox, unerase_cause};
use crate::types::{Cause, Defect, Exit};
use std::fmt;
use std::sync::Arc;

/// Splits an erased cause into its first typed failure, or the remainder
/// with typed failures stripped.
fn split_failure<E: Shareable>(erased: ErasedCause) -> Result<E, ErasedCause> {
    if erased.is_interrupted() {
        return Err(erased.strip_failures());
    }
    match unerase_cause::<E>(erased).failure_or_cause() {
        Ok(e) => Ok(e),
        Err(rest) => Err(rest.strip_failures()),
    }
}

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    fn fold_raw<B: Send + 'static, E2: Shareable>(
        self,
        on_failure: impl Fn(ErasedCause) -> Step + Send + Sync + 'static,
        on_success: Option<Arc<dyn Fn(A) -> Effect<B, E2> + Send + Sync>>,
    ) -> Effect<B, E2> {
        Effect::from_op(Arc::new(Op::Fold {
            effect: self.op,
            on_failure: Arc::new(on_failure),
            on_success: on_success.map(|f| {
                Arc::new(move |value| match unbox::<A>(value) {
                    Ok(a) => Step::Op(f(a).op),
                    Err(c) => Step::Failure(c),
                }) as super::Cont
            }),
        }))
    }

    /// Recovers from any failure, handing the handler the full cause.
    #[must_use]
    pub fn catch_all_cause<E2: Shareable>(
        self,
        handler: impl Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.fold_raw::<A, E2>(
            move |erased| Step::Op(handler(unerase_cause(erased)).op),
            None,
        )
    }

    /// Recovers from typed failures. Defects and interruptions propagate.
    #[must_use]
    pub fn catch_all<E2: Shareable>(
        self,
        handler: impl Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.fold_raw::<A, E2>(
            move |erased| match split_failure::<E>(erased) {
                Ok(e) => Step::Op(handler(e).op),
                Err(rest) => Step::Failure(rest),
            },
            None,
        )
    }

    /// Recovers from the typed failures for which `handler` returns an
    /// effect; all others propagate unchanged.
    #[must_use]
    pub fn catch_some(
        self,
        handler: impl Fn(&E) -> Option<Self> + Send + Sync + 'static,
    ) -> Self {
        self.fold_raw::<A, E>(
            move |erased| {
                if erased.is_interrupted() {
                    return Step::Failure(erased);
                }
                let cause: Cause<E> = unerase_cause(erased);
                match cause.failure_option().and_then(|e| handler(e)) {
                    Some(recovery) => Step::Op(recovery.op),
                    None => Step::Failure(erase_cause(cause)),
                }
            },
            None,
        )
    }

    /// Recovers from defects. Typed failures and interruptions propagate.
    #[must_use]
    pub fn catch_all_defect(
        self,
        handler: impl Fn(Defect) -> Self + Send + Sync + 'static,
    ) -> Self {
        self.fold_raw::<A, E>(
            move |erased| {
                if erased.is_interrupted() || erased.is_failure() {
                    return Step::Failure(erased);
                }
                match erased.defects().first() {
                    Some(defect) => Step::Op(handler((*defect).clone()).op),
                    None => Step::Failure(erased),
                }
            },
            None,
        )
    }

    /// Handles both outcomes with pure functions.
    #[must_use]
    pub fn fold<B: Send + 'static>(
        self,
        on_failure: impl Fn(E) -> B + Send + Sync + 'static,
        on_success: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> UIO<B> {
        Effect::from_op(Arc::new(Op::Fold {
            effect: self.op,
            on_failure: Arc::new(move |erased| match split_failure::<E>(erased) {
                Ok(e) => Step::Value(Box::new(on_failure(e))),
                Err(rest) => Step::Failure(rest),
            }),
            on_success: Some(Arc::new(move |value| match unbox::<A>(value) {
                Ok(a) => Step::Value(Box::new(on_success(a))),
                Err(c) => Step::Failure(c),
            })),
        }))
    }

    /// Handles both outcomes with effects.
    #[must_use]
    pub fn fold_effect<B: Send + 'static, E2: Shareable>(
        self,
        on_failure: impl Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        self.fold_raw(
            move |erased| match split_failure::<E>(erased) {
                Ok(e) => Step::Op(on_failure(e).op),
                Err(rest) => Step::Failure(rest),
            },
            Some(Arc::new(on_success)),
        )
    }

    /// Handles both outcomes with effects, seeing the full failure cause.
    #[must_use]
    pub fn fold_cause_effect<B: Send + 'static, E2: Shareable>(
        self,
        on_failure: impl Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    ) -> Effect<B, E2> {
        self.fold_raw(
            move |erased| Step::Op(on_failure(unerase_cause(erased)).op),
            Some(Arc::new(on_success)),
        )
    }

    /// Surfaces typed failures as an `Err` value.
    #[must_use]
    pub fn either(self) -> UIO<Result<A, E>> {
        Effect::from_op(Arc::new(Op::Fold {
            effect: self.op,
            on_failure: Arc::new(|erased| match split_failure::<E>(erased) {
                Ok(e) => Step::Value(Box::new(Err::<A, E>(e))),
                Err(rest) => Step::Failure(rest),
            }),
            on_success: Some(Arc::new(|value| match unbox::<A>(value) {
                Ok(a) => Step::Value(Box::new(Ok::<A, E>(a))),
                Err(c) => Step::Failure(c),
            })),
        }))
    }

    /// Surfaces the outcome as an [`Exit`] value. Only fails if the running
    /// fiber itself is interrupted.
    #[must_use]
    pub fn exit(self) -> UIO<Exit<A, E>> {
        Effect::from_op(Arc::new(Op::Fold {
            effect: self.op,
            on_failure: Arc::new(|erased| {
                Step::Value(Box::new(Exit::<A, E>::Failure(unerase_cause(erased))))
            }),
            on_success: Some(Arc::new(|value| match unbox::<A>(value) {
                Ok(a) => Step::Value(Box::new(Exit::<A, E>::Success(a))),
                Err(c) => Step::Failure(c),
            })),
        }))
    }

    /// Runs `that` if this effect fails with a typed error.
    #[must_use]
    pub fn or_else<E2: Shareable>(self, that: Effect<A, E2>) -> Effect<A, E2> {
        self.catch_all(move |_| that.clone())
    }

    /// Converts typed failures into defects described by `describe`.
    #[must_use]
    pub fn or_die_with(self, describe: impl Fn(E) -> Defect + Send + Sync + 'static) -> UIO<A> {
        self.fold_raw::<A, std::convert::Infallible>(
            move |erased| Step::Failure(unerase_cause::<E>(erased).fail_to_die(&describe)),
            None,
        )
    }

    /// Converts typed failures into defects.
    #[must_use]
    pub fn or_die(self) -> UIO<A>
    where
        E: fmt::Debug,
    {
        self.or_die_with(|e| Defect::new(format!("unexpected failure: {e:?}")))
    }

    /// Exposes the full cause as the typed error.
    #[must_use]
    pub fn sandbox(self) -> Effect<A, Cause<E>> {
        self.fold_raw::<A, Cause<E>>(
            |erased| {
                let cause: Cause<E> = unerase_cause(erased);
                Step::Failure(Cause::Fail(Arc::new(cause) as super::Erased))
            },
            None,
        )
    }

    /// Transforms the typed error.
    #[must_use]
    pub fn map_error<E2: Shareable>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Effect<A, E2> {
        self.fold_raw::<A, E2>(
            move |erased| Step::Failure(erase_cause(unerase_cause::<E>(erased).map(&f))),
            None,
        )
    }

    /// Transforms the whole failure cause.
    #[must_use]
    pub fn map_error_cause<E2: Shareable>(
        self,
        f: impl Fn(Cause<E>) -> Cause<E2> + Send + Sync + 'static,
    ) -> Effect<A, E2> {
        self.fold_raw::<A, E2>(
            move |erased| Step::Failure(erase_cause(f(unerase_cause(erased)))),
            None,
        )
    }

    /// Runs `f` on a typed failure for its effect, then fails as before.
    #[must_use]
    pub fn tap_error<B: Send + 'static>(
        self,
        f: impl Fn(&E) -> Effect<B, E> + Send + Sync + 'static,
    ) -> Self {
        self.fold_raw::<A, E>(
            move |erased| {
                if erased.is_interrupted() {
                    return Step::Failure(erased);
                }
                let cause: Cause<E> = unerase_cause(erased);
                match cause.failure_option().map(|e| f(e)) {
                    Some(side) => Step::Op(side.zip_right(Self::fail_cause(cause.clone())).op),
                    None => Step::Failure(erase_cause(cause)),
                }
            },
            None,
        )
    }

    /// Discards the value and any typed failure.
    #[must_use]
    pub fn ignore(self) -> UIO<()> {
        self.fold(|_| (), |_| ())
    }
}

impl<A: Send + 'static, E: Shareable> Effect<A, Cause<E>> {
    /// Inverse of [`Effect::sandbox`].
    #[must_use]
    pub fn unsandbox(self) -> Effect<A, E> {
        self.fold_raw::<A, E>(
            |erased| {
                let outer: Cause<Cause<E>> = unerase_cause(erased);
                let inner = outer
                    .failures()
                    .into_iter()
                    .fold(Cause::Empty, |acc: Cause<E>, c| acc.then(c.clone()));
                Step::Failure(erase_cause(inner.then(outer.strip_failures())))
            },
            None,
        )
    }
}
