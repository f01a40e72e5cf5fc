//! Resource scopes.
//!
//! A [`Scope`] owns a [`ReleaseMap`]: an ordered set of finalizers that run
//! exactly once, in reverse order of registration, when the scope closes.
//! Every fiber owns a scope that closes with the fiber's exit; user code can
//! create further scopes, nest them with [`Scope::fork`] and make one the
//! ambient scope of an effect with [`Effect::provide_scope`].
//!
//! Registering a finalizer on a scope that has already closed runs the
//! finalizer immediately with the exit the scope closed with.

use crate::effect::{Effect, Erased, UIO};
use crate::types::{Cause, Exit};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// The exit a scope closes with. Typed failures are erased.
pub type ScopeExit = Exit<(), Erased>;

/// A finalizer: an effect built from the exit of the scope that runs it.
pub type Finalizer = Arc<dyn Fn(&ScopeExit) -> UIO<()> + Send + Sync>;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// How the finalizers of a closing scope are run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One after another, most recently added first.
    #[default]
    Sequential,
    /// All at once, each on its own fiber.
    Parallel,
}

/// Identifies one registered finalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseKey(u64);

enum State {
    Running {
        next_key: u64,
        finalizers: BTreeMap<u64, Finalizer>,
    },
    Exited(ScopeExit),
}

/// An ordered, close-once set of finalizers.
pub struct ReleaseMap {
    state: Mutex<State>,
}

impl Default for ReleaseMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseMap {
    /// An open, empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Running {
                next_key: 0,
                finalizers: BTreeMap::new(),
            }),
        }
    }

    /// Registers `finalizer`. If the map has already closed, returns the
    /// exit it closed with and does not keep the finalizer.
    pub fn add(&self, finalizer: Finalizer) -> Result<ReleaseKey, ScopeExit> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Running {
                next_key,
                finalizers,
            } => {
                let key = *next_key;
                *next_key += 1;
                finalizers.insert(key, finalizer);
                Ok(ReleaseKey(key))
            }
            State::Exited(exit) => Err(exit.clone()),
        }
    }

    /// Unregisters a finalizer without running it.
    pub fn remove(&self, key: ReleaseKey) -> Option<Finalizer> {
        match &mut *self.state.lock() {
            State::Running { finalizers, .. } => finalizers.remove(&key.0),
            State::Exited(_) => None,
        }
    }

    /// Unregisters a finalizer and runs it with `exit`.
    #[must_use]
    pub fn release(&self, key: ReleaseKey, exit: ScopeExit) -> UIO<()> {
        match self.remove(key) {
            Some(finalizer) => finalizer(&exit),
            None => Effect::unit(),
        }
    }

    /// Returns true once the map has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), State::Exited(_))
    }

    /// Number of registered finalizers.
    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.state.lock() {
            State::Running { finalizers, .. } => finalizers.len(),
            State::Exited(_) => 0,
        }
    }

    /// Returns true if no finalizer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the map closed and hands back its finalizers, most recent
    /// first. Returns `None` if it was already closed.
    fn close_state(&self, exit: ScopeExit) -> Option<Vec<Finalizer>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Exited(exit)) {
            State::Running { finalizers, .. } => Some(finalizers.into_values().rev().collect()),
            previous @ State::Exited(_) => {
                *state = previous;
                None
            }
        }
    }

    /// Closes the map if it holds no finalizers.
    fn try_close_empty(&self, exit: &ScopeExit) -> bool {
        let mut state = self.state.lock();
        match &*state {
            State::Running { finalizers, .. } if finalizers.is_empty() => {
                *state = State::Exited(exit.clone());
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ReleaseMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            State::Running { finalizers, .. } => f
                .debug_struct("ReleaseMap")
                .field("finalizers", &finalizers.len())
                .finish(),
            State::Exited(exit) => f
                .debug_struct("ReleaseMap")
                .field("exited", &exit.is_success())
                .finish(),
        }
    }
}

struct ScopeInner {
    id: u64,
    strategy: ExecutionStrategy,
    map: ReleaseMap,
    // Set when this scope was forked from another: the parent and the key
    // of the finalizer that closes this scope.
    parent: Mutex<Option<(Weak<ScopeInner>, ReleaseKey)>>,
}

/// A resource scope. Clones share the same finalizers.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// An open scope.
    #[must_use]
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE.fetch_add(1, Ordering::Relaxed),
                strategy,
                map: ReleaseMap::new(),
                parent: Mutex::new(None),
            }),
        }
    }

    /// An effect that creates a sequential scope.
    #[must_use]
    pub fn make() -> UIO<Self> {
        Effect::sync(|| Self::new(ExecutionStrategy::Sequential))
    }

    /// A process-unique id, for diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The strategy used when the scope closes.
    #[must_use]
    pub fn strategy(&self) -> ExecutionStrategy {
        self.inner.strategy
    }

    /// The underlying finalizer set.
    #[must_use]
    pub fn release_map(&self) -> &ReleaseMap {
        &self.inner.map
    }

    /// Returns true once the scope has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.map.is_closed()
    }

    /// Registers a finalizer. On a closed scope it runs right away.
    #[must_use]
    pub fn add_finalizer(
        &self,
        finalizer: impl Fn(&ScopeExit) -> UIO<()> + Send + Sync + 'static,
    ) -> UIO<()> {
        let finalizer: Finalizer = Arc::new(finalizer);
        let scope = self.clone();
        Effect::suspend(move || match scope.inner.map.add(Arc::clone(&finalizer)) {
            Ok(_) => Effect::unit(),
            Err(exit) => finalizer(&exit),
        })
    }

    /// Closes the scope, running its finalizers with `exit`. Closing an
    /// already closed scope does nothing. Any finalizer failure is reported
    /// after every finalizer has run.
    #[must_use]
    pub fn close(&self, exit: ScopeExit) -> UIO<()> {
        let scope = self.clone();
        Effect::suspend(move || {
            scope.detach();
            match scope.inner.map.close_state(exit.clone()) {
                Some(finalizers) => run_finalizers(finalizers, &exit, scope.inner.strategy),
                None => Effect::unit(),
            }
        })
        .uninterruptible()
    }

    /// Creates a child scope that closes when this one does, and may also
    /// be closed on its own.
    #[must_use]
    pub fn fork(&self, strategy: ExecutionStrategy) -> UIO<Self> {
        let parent = self.clone();
        Effect::suspend(move || {
            let child = Self::new(strategy);
            let closer = child.clone();
            let added = parent
                .inner
                .map
                .add(Arc::new(move |exit: &ScopeExit| closer.close(exit.clone())));
            match added {
                Ok(key) => {
                    *child.inner.parent.lock() = Some((Arc::downgrade(&parent.inner), key));
                    Effect::succeed(child)
                }
                Err(exit) => child.close(exit).as_value(child),
            }
        })
        .uninterruptible()
    }

    /// Runs `effect` with this scope as its ambient scope, leaving the scope
    /// open afterwards.
    #[must_use]
    pub fn extend<A: Send + 'static, E: crate::Shareable>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        effect.provide_scope(self.clone())
    }

    /// Runs `effect` with this scope as its ambient scope, then closes the
    /// scope with the effect's exit.
    #[must_use]
    pub fn use_scope<A: Send + 'static, E: crate::Shareable>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        let scope = self.clone();
        effect
            .provide_scope(self.clone())
            .on_exit_erased(move |exit| scope.close(exit))
    }

    /// Closes the scope on the spot if it holds no finalizers.
    pub(crate) fn try_close_empty(&self, exit: &ScopeExit) -> bool {
        if self.inner.map.try_close_empty(exit) {
            self.detach();
            true
        } else {
            false
        }
    }

    fn detach(&self) {
        let link = self.inner.parent.lock().take();
        if let Some((parent, key)) = link {
            if let Some(parent) = parent.upgrade() {
                parent.map.remove(key);
            }
        }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("strategy", &self.inner.strategy)
            .field("map", &self.inner.map)
            .finish()
    }
}

fn run_finalizers(finalizers: Vec<Finalizer>, exit: &ScopeExit, strategy: ExecutionStrategy) -> UIO<()> {
    if finalizers.is_empty() {
        return Effect::unit();
    }
    // Each finalizer is built lazily so a panicking constructor only fails
    // its own finalizer.
    let exits = finalizers.into_iter().map(|finalizer| {
        let exit = exit.clone();
        Effect::suspend(move || finalizer(&exit)).exit()
    });
    let combine: fn(Cause<Infallible>, Cause<Infallible>) -> Cause<Infallible> = match strategy {
        ExecutionStrategy::Sequential => Cause::then,
        ExecutionStrategy::Parallel => Cause::both,
    };
    let collected = match strategy {
        ExecutionStrategy::Sequential => Effect::collect_all(exits),
        ExecutionStrategy::Parallel => Effect::collect_all_par(exits),
    };
    collected.flat_map(move |exits| {
        let cause = exits
            .into_iter()
            .filter_map(|e| e.cause().cloned())
            .fold(Cause::Empty, combine);
        if cause.is_empty() {
            Effect::unit()
        } else {
            Effect::fail_cause(cause)
        }
    })
}
