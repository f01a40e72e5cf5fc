//! Forking, racing and parallel composition.
//!
//! Every combinator here is built on [`Effect::fork`] and
//! [`Effect::race_with`]. Forked fibers are children of the forking fiber:
//! when the parent finishes, children it has not joined are interrupted and
//! awaited before the parent's exit is published.

use super::{Effect, FiberExit, Op, Resume, Shareable, UIO, seal};
use crate::fiber::{Fiber, FiberRuntime};
use crate::scope::{Finalizer, Scope, ScopeExit};
use crate::types::{Exit, FiberId};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Waits for whichever of two fibers finishes first. Produces true if the
/// left one did.
fn first_done(left: Arc<FiberRuntime>, right: Arc<FiberRuntime>) -> UIO<bool> {
    UIO::<bool>::async_effect(move |resume: Resume<bool, Infallible>| {
        let mut registered: Vec<(Arc<FiberRuntime>, usize)> = Vec::with_capacity(2);
        for (fiber, is_left) in [(&left, true), (&right, false)] {
            let on_done = resume.clone();
            match fiber.add_observer(Box::new(move |_: &FiberExit| on_done.succeed(is_left))) {
                Ok(key) => registered.push((Arc::clone(fiber), key)),
                Err(_) => {
                    resume.succeed(is_left);
                    break;
                }
            }
        }
        Some(UIO::sync(move || {
            for (fiber, key) in &registered {
                fiber.remove_observer(*key);
            }
        }))
    })
}

impl<A: Shareable, E: Shareable> Effect<A, E> {
    fn fork_inner(self, daemon: bool) -> UIO<Fiber<A, E>> {
        let op = Arc::new(Op::Fork {
            effect: seal::<A>(self.op),
            daemon,
        });
        Effect::<Arc<FiberRuntime>, Infallible>::from_op(op).map(Fiber::<A, E>::new)
    }

    /// Runs the effect on a new child fiber. The child inherits the
    /// caller's flags, context and (forked) fiber-local values, and is
    /// interrupted when the caller finishes without joining it.
    #[must_use]
    pub fn fork(self) -> UIO<Fiber<A, E>> {
        self.fork_inner(false)
    }

    /// Runs the effect on a new fiber that is not supervised by the caller
    /// and may outlive it.
    #[must_use]
    pub fn fork_daemon(self) -> UIO<Fiber<A, E>> {
        self.fork_inner(true)
    }

    /// Runs the effect on a new fiber whose lifetime is bound to `scope`:
    /// closing the scope interrupts the fiber. Forking into a closed scope
    /// interrupts the fiber right away.
    #[must_use]
    pub fn fork_in(self, scope: Scope) -> UIO<Fiber<A, E>> {
        Effect::uninterruptible_mask(move |restore| {
            let scope = scope.clone();
            restore
                .apply(self.clone())
                .fork_daemon()
                .flat_map(move |fiber| {
                    let interrupter = fiber.clone();
                    let finalizer: Finalizer =
                        Arc::new(move |_: &ScopeExit| interrupter.interrupt().as_unit());
                    match scope.release_map().add(finalizer) {
                        Ok(key) => {
                            let map_owner = scope.clone();
                            let detach = Box::new(move |_: &FiberExit| {
                                drop(map_owner.release_map().remove(key));
                            });
                            if fiber.runtime().add_observer(detach).is_err() {
                                drop(scope.release_map().remove(key));
                            }
                            UIO::succeed(fiber)
                        }
                        Err(_) => fiber.interrupt().as_value(fiber.clone()),
                    }
                })
        })
    }

    /// Runs the effect on a new fiber bound to the ambient scope.
    #[must_use]
    pub fn fork_scoped(self) -> UIO<Fiber<A, E>> {
        Effect::<Scope, Infallible>::scope().flat_map(move |scope| self.clone().fork_in(scope))
    }

    /// Races two effects on child fibers. Whichever finishes first decides
    /// the outcome: its handler receives its exit and the other fiber.
    ///
    /// The handlers run with the caller's interruptibility. If the caller is
    /// interrupted while waiting, both fibers are interrupted and awaited.
    #[must_use]
    pub fn race_with<B, E2, C, E3>(
        self,
        that: Effect<B, E2>,
        left_done: impl Fn(Exit<A, E>, Fiber<B, E2>) -> Effect<C, E3> + Send + Sync + 'static,
        right_done: impl Fn(Exit<B, E2>, Fiber<A, E>) -> Effect<C, E3> + Send + Sync + 'static,
    ) -> Effect<C, E3>
    where
        B: Shareable,
        E2: Shareable,
        C: Send + 'static,
        E3: Shareable,
    {
        let left_done = Arc::new(left_done);
        let right_done = Arc::new(right_done);
        Effect::uninterruptible_mask(move |restore| {
            let left_done = Arc::clone(&left_done);
            let right_done = Arc::clone(&right_done);
            restore
                .apply(self.clone())
                .fork()
                .zip(restore.apply(that.clone()).fork())
                .widen::<E3>()
                .flat_map(move |(left, right)| {
                    let (on_left, on_right) = (left.clone(), right.clone());
                    let wait = restore
                        .apply(first_done(Arc::clone(left.runtime()), Arc::clone(right.runtime())))
                        .on_interrupt(move |_| {
                            on_left
                                .interrupt_fork()
                                .zip_right(on_right.interrupt_fork())
                                .zip_right(on_left.await_exit())
                                .zip_right(on_right.await_exit())
                                .as_unit()
                        });
                    let left_done = Arc::clone(&left_done);
                    let right_done = Arc::clone(&right_done);
                    wait.widen::<E3>().flat_map(move |left_won| {
                        let (left, right) = (left.clone(), right.clone());
                        if left_won {
                            let handler = Arc::clone(&left_done);
                            left.await_exit()
                                .widen::<E3>()
                                .flat_map(move |exit| restore.apply(handler(exit, right.clone())))
                        } else {
                            let handler = Arc::clone(&right_done);
                            right
                                .await_exit()
                                .widen::<E3>()
                                .flat_map(move |exit| restore.apply(handler(exit, left.clone())))
                        }
                    })
                })
        })
    }

    /// Races two effects and keeps the first success. The loser is
    /// interrupted. If the first to finish fails, the other one's outcome
    /// decides; if both fail, both causes are kept.
    #[must_use]
    pub fn race(self, that: Self) -> Self {
        self.race_with(that, settle_race::<A, E>, settle_race::<A, E>)
    }

    /// Races two effects and keeps whichever finishes first, success or
    /// failure. The loser is interrupted.
    #[must_use]
    pub fn race_first(self, that: Self) -> Self {
        let first = |exit: Exit<A, E>, loser: Fiber<A, E>| {
            loser.interrupt().widen::<E>().zip_right(Effect::from_exit(exit))
        };
        self.race_with(that, first, first)
    }

    /// Runs the effect with a time limit. Produces `None` if the limit
    /// passes first, in which case the effect is interrupted.
    #[must_use]
    pub fn timeout(self, duration: Duration) -> Effect<Option<A>, E> {
        self.map(Some)
            .race_first(Effect::<(), E>::sleep(duration).as_value(None))
    }

    /// Runs the effect with a time limit, failing with `error` if the
    /// limit passes first.
    #[must_use]
    pub fn timeout_fail(self, error: E, duration: Duration) -> Self {
        self.timeout(duration).flat_map(move |outcome| match outcome {
            Some(a) => Effect::succeed(a),
            None => Effect::fail(error.clone()),
        })
    }

    /// Runs two effects in parallel and keeps both values. If either fails,
    /// the other is interrupted and the failure is reported.
    #[must_use]
    pub fn zip_par<B: Shareable>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.race_with(
            that,
            |exit: Exit<A, E>, right: Fiber<B, E>| match exit {
                Exit::Success(a) => right.join().map(move |b| (a.clone(), b)),
                Exit::Failure(cause) => right
                    .interrupt()
                    .widen::<E>()
                    .zip_right(Effect::fail_cause(cause)),
            },
            |exit: Exit<B, E>, left: Fiber<A, E>| match exit {
                Exit::Success(b) => left.join().map(move |a| (a, b.clone())),
                Exit::Failure(cause) => left
                    .interrupt()
                    .widen::<E>()
                    .zip_right(Effect::fail_cause(cause)),
            },
        )
    }

    /// Runs every effect in parallel, collecting the results in order. The
    /// first failure interrupts the rest.
    #[must_use]
    pub fn collect_all_par(effects: impl IntoIterator<Item = Self>) -> Effect<Vec<A>, E> {
        Self::collect_par(effects.into_iter().collect())
    }

    fn collect_par(mut effects: Vec<Self>) -> Effect<Vec<A>, E> {
        match effects.len() {
            0 => Effect::succeed(Vec::new()),
            1 => match effects.pop() {
                Some(effect) => effect.map(|a| vec![a]),
                None => Effect::succeed(Vec::new()),
            },
            n => {
                let right = effects.split_off(n / 2);
                Self::collect_par(effects)
                    .zip_par(Self::collect_par(right))
                    .map(|(mut left, right)| {
                        left.extend(right);
                        left
                    })
            }
        }
    }

    /// Runs `f` for every item in parallel, collecting the results in order.
    #[must_use]
    pub fn for_each_par<T, I>(items: I, f: impl Fn(T) -> Self + Send + Sync + 'static) -> Effect<Vec<A>, E>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        let f = Arc::new(f);
        Self::collect_all_par(items.into_iter().map(|item| {
            let f = Arc::clone(&f);
            Self::suspend(move || f(item.clone()))
        }))
    }
}

fn settle_race<A: Shareable, E: Shareable>(exit: Exit<A, E>, loser: Fiber<A, E>) -> Effect<A, E> {
    match exit {
        Exit::Success(a) => loser.interrupt().widen::<E>().as_value(a),
        Exit::Failure(first) => loser
            .join()
            .catch_all_cause(move |second| Effect::fail_cause(first.clone().both(second))),
    }
}

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    /// Runs the effect after waiting for `duration`.
    #[must_use]
    pub fn delay(self, duration: Duration) -> Self {
        Effect::<(), E>::sleep(duration).zip_right(self)
    }
}

impl<E: Shareable> Effect<Vec<FiberId>, E> {
    /// Ids of the running fiber's live non-daemon children.
    #[must_use]
    pub fn children() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            super::Step::Value(Box::new(ctx.children()))
        }))))
    }
}
