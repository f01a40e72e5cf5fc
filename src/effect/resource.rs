//! Finalizers, brackets and scopes.
//!
//! Finalizers always run uninterruptibly and exactly once. When a finalizer
//! fails, its cause is sequenced after the cause of the effect it guards; a
//! finalizer failure after a success replaces the success.

use super::{Effect, Op, Shareable, UIO, typed_exit, unerase_cause};
use super::op::ExitRef;
use crate::context::ContextPatch;
use crate::scope::{ExecutionStrategy, Scope, ScopeExit};
use crate::types::{Cause, Exit};
use std::sync::Arc;

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    fn on_exit_raw(self, hook: impl Fn(ExitRef<'_>) -> Arc<Op> + Send + Sync + 'static) -> Self {
        Self::from_op(Arc::new(Op::OnExit {
            effect: self.op,
            hook: Arc::new(hook),
        }))
    }

    /// Runs `finalizer` with the exit of this effect, however it ends.
    #[must_use]
    pub fn on_exit(self, finalizer: impl Fn(&Exit<A, E>) -> UIO<()> + Send + Sync + 'static) -> Self
    where
        A: Clone,
    {
        self.on_exit_raw(move |exit| finalizer(&typed_exit::<A, E>(&exit)).op)
    }

    pub(crate) fn on_exit_erased(self, finalizer: impl Fn(ScopeExit) -> UIO<()> + Send + Sync + 'static) -> Self {
        self.on_exit_raw(move |exit| finalizer(exit.to_unit_exit()).op)
    }

    /// Runs `finalizer` after this effect, however it ends.
    #[must_use]
    pub fn ensuring(self, finalizer: UIO<()>) -> Self {
        let op = finalizer.op;
        self.on_exit_raw(move |_| Arc::clone(&op))
    }

    /// Runs `cleanup` if this effect fails, dies or is interrupted.
    #[must_use]
    pub fn on_error(self, cleanup: impl Fn(&Cause<E>) -> UIO<()> + Send + Sync + 'static) -> Self {
        self.on_exit_raw(move |exit| match exit {
            ExitRef::Success(_) => Op::unit(),
            ExitRef::Failure(cause) => cleanup(&unerase_cause::<E>(cause.clone())).op,
        })
    }

    /// Acquires a resource with this effect, uninterruptibly, uses it, and
    /// releases it with the exit of `use_`. `release` runs exactly once if
    /// the acquisition succeeded.
    #[must_use]
    pub fn acquire_use_release<B>(
        self,
        use_: impl Fn(A) -> Effect<B, E> + Send + Sync + 'static,
        release: impl Fn(A, &Exit<B, E>) -> UIO<()> + Send + Sync + 'static,
    ) -> Effect<B, E>
    where
        A: Shareable,
        B: Clone + Send + 'static,
    {
        let acquire = self;
        let use_ = Arc::new(use_);
        let release = Arc::new(release);
        Effect::uninterruptible_mask(move |restore| {
            let use_ = Arc::clone(&use_);
            let release = Arc::clone(&release);
            acquire.clone().flat_map(move |resource| {
                let kept = resource.clone();
                let release = Arc::clone(&release);
                restore
                    .apply(use_(resource))
                    .on_exit(move |exit| release(kept.clone(), exit))
            })
        })
    }

    /// Acquires a resource uninterruptibly and registers its release in the
    /// ambient scope.
    #[must_use]
    pub fn acquire_release(self, release: impl Fn(A) -> UIO<()> + Send + Sync + 'static) -> Self
    where
        A: Shareable,
    {
        self.acquire_release_exit(move |a, _| release(a))
    }

    /// Like [`Effect::acquire_release`], handing the release the exit the
    /// scope closed with.
    #[must_use]
    pub fn acquire_release_exit(
        self,
        release: impl Fn(A, &ScopeExit) -> UIO<()> + Send + Sync + 'static,
    ) -> Self
    where
        A: Shareable,
    {
        let release = Arc::new(release);
        let acquire = self;
        Effect::<Scope, E>::scope_or_fiber()
            .flat_map(move |scope| {
                let release = Arc::clone(&release);
                acquire.clone().tap(move |resource| {
                    let resource = resource.clone();
                    let release = Arc::clone(&release);
                    scope
                        .add_finalizer(move |exit| release(resource.clone(), exit))
                        .widen()
                })
            })
            .uninterruptible()
    }

    /// Registers `release` in the ambient scope, then runs the acquisition
    /// interruptibly. The release runs even if the acquisition is cut short.
    #[must_use]
    pub fn acquire_release_interruptible(
        self,
        release: impl Fn(&ScopeExit) -> UIO<()> + Send + Sync + 'static,
    ) -> Self {
        Effect::<(), E>::add_finalizer(release)
            .zip_right(self.interruptible())
    }

    /// Runs this effect in a fresh scope that closes when the effect ends.
    #[must_use]
    pub fn scoped(self) -> Self {
        Scope::make()
            .widen()
            .flat_map(move |scope: Scope| scope.use_scope(self.clone()))
    }

    /// Runs this effect with `scope` as its ambient scope.
    #[must_use]
    pub fn provide_scope(self, scope: Scope) -> Self {
        self.provide(ContextPatch::add(scope))
    }
}

impl<E: Shareable> Effect<(), E> {
    /// Adds a finalizer to the ambient scope.
    #[must_use]
    pub fn add_finalizer(finalizer: impl Fn(&ScopeExit) -> UIO<()> + Send + Sync + 'static) -> Self {
        let finalizer = Arc::new(finalizer);
        Effect::<Scope, E>::scope_or_fiber().flat_map(move |scope| {
            let finalizer = Arc::clone(&finalizer);
            scope.add_finalizer(move |exit| finalizer(exit)).widen()
        })
    }
}

impl<E: Shareable> Effect<Scope, E> {
    /// The ambient scope. Falls back to the running fiber's own scope when
    /// none has been provided.
    #[must_use]
    pub fn scope() -> Self {
        Self::scope_or_fiber()
    }

    /// The running fiber's own scope, which closes when the fiber ends.
    #[must_use]
    pub fn fiber_scope() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            super::Step::Value(Box::new(ctx.scope().clone()))
        }))))
    }

    /// A child of the ambient scope.
    #[must_use]
    pub fn scope_fork(strategy: ExecutionStrategy) -> Self {
        Self::scope_or_fiber().flat_map(move |scope| scope.fork(strategy).widen())
    }

    fn scope_or_fiber() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            let scope = ctx
                .context()
                .get::<Scope>()
                .unwrap_or_else(|| ctx.scope().clone());
            super::Step::Value(Box::new(scope))
        }))))
    }
}
