//! Fiber-local state.
//!
//! A [`FiberRef`] is a key with an initial value plus two policies: `fork`
//! derives a child's value from the parent's when a fiber is forked, and
//! `join` merges a child's value back into the parent when the child is
//! joined. Each fiber owns a [`FiberRefs`] map; forking copies it, which is
//! O(1) when no ref has a custom fork policy.

use crate::effect::{Effect, Erased, Op, Shareable, Step};
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FIBER_REF: AtomicU64 = AtomicU64::new(1);

type ForkFn = Arc<dyn Fn(&Erased) -> Erased + Send + Sync>;
type JoinFn = Arc<dyn Fn(&Erased, &Erased) -> Erased + Send + Sync>;

pub(crate) struct FiberRefDef {
    key: u64,
    initial: Erased,
    fork: Option<ForkFn>,
    join: Option<JoinFn>,
}

/// A typed handle to a fiber-local value.
pub struct FiberRef<A> {
    def: Arc<FiberRefDef>,
    initial: Arc<A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            initial: Arc::clone(&self.initial),
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberRef(#{})", self.def.key)
    }
}

impl<A: Shareable> FiberRef<A> {
    /// Creates a ref whose children inherit the parent's value and whose
    /// joins take the child's value.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self::build(initial, None, None)
    }

    /// Creates a ref with custom fork and join policies.
    #[must_use]
    pub fn with_fork_join(
        initial: A,
        fork: impl Fn(&A) -> A + Send + Sync + 'static,
        join: impl Fn(&A, &A) -> A + Send + Sync + 'static,
    ) -> Self {
        let fork: ForkFn = Arc::new(move |value: &Erased| match value.downcast_ref::<A>() {
            Some(a) => Arc::new(fork(a)) as Erased,
            None => Arc::clone(value),
        });
        let join: JoinFn = Arc::new(move |parent: &Erased, child: &Erased| {
            match (parent.downcast_ref::<A>(), child.downcast_ref::<A>()) {
                (Some(p), Some(c)) => Arc::new(join(p, c)) as Erased,
                _ => Arc::clone(child),
            }
        });
        Self::build(initial, Some(fork), Some(join))
    }

    fn build(initial: A, fork: Option<ForkFn>, join: Option<JoinFn>) -> Self {
        let initial = Arc::new(initial);
        Self {
            def: Arc::new(FiberRefDef {
                key: NEXT_FIBER_REF.fetch_add(1, Ordering::Relaxed),
                initial: Arc::clone(&initial) as Erased,
                fork,
                join,
            }),
            initial,
        }
    }

    /// The initial value.
    #[must_use]
    pub fn initial(&self) -> A {
        (*self.initial).clone()
    }

    /// Reads the current fiber's value.
    #[must_use]
    pub fn get<E: Shareable>(&self) -> Effect<A, E> {
        let this = self.clone();
        Effect::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            Step::Value(Box::new(ctx.fiber_refs().get(&this)))
        }))))
    }

    /// Sets the current fiber's value.
    #[must_use]
    pub fn set<E: Shareable>(&self, value: A) -> Effect<(), E> {
        self.update(move |_| value.clone())
    }

    /// Updates the current fiber's value.
    #[must_use]
    pub fn update<E: Shareable>(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> Effect<(), E> {
        self.modify(move |a| ((), f(a)))
    }

    /// Updates the value and returns a result computed from the old one.
    #[must_use]
    pub fn modify<B: Send + 'static, E: Shareable>(
        &self,
        f: impl Fn(A) -> (B, A) + Send + Sync + 'static,
    ) -> Effect<B, E> {
        let this = self.clone();
        Effect::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            let (out, next) = f(ctx.fiber_refs().get(&this));
            ctx.fiber_refs_mut().set(&this, next);
            Step::Value(Box::new(out))
        }))))
    }

    /// Resets the current fiber's value to the initial value.
    #[must_use]
    pub fn reset<E: Shareable>(&self) -> Effect<(), E> {
        let initial = self.initial();
        self.set(initial)
    }

    /// Runs `effect` with the ref set to `value`, restoring the previous
    /// value afterwards however `effect` exits.
    #[must_use]
    pub fn locally<B: Send + 'static, E: Shareable>(&self, value: A, effect: Effect<B, E>) -> Effect<B, E> {
        let this = self.clone();
        self.get::<E>().flat_map(move |previous| {
            let restore = this.set::<std::convert::Infallible>(previous);
            this.set::<E>(value.clone())
                .zip_right(effect.clone())
                .ensuring(restore)
        })
    }
}

#[derive(Clone)]
struct Entry {
    value: Erased,
    def: Arc<FiberRefDef>,
}

/// The set of fiber-local values owned by one fiber.
#[derive(Clone, Default)]
pub struct FiberRefs {
    entries: Arc<HashMap<u64, Entry>>,
}

impl FiberRefs {
    /// An empty map where every ref reads as its initial value.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads a ref, falling back to its initial value.
    #[must_use]
    pub fn get<A: Shareable>(&self, fiber_ref: &FiberRef<A>) -> A {
        let erased = self.get_erased(&fiber_ref.def);
        erased
            .downcast_ref::<A>()
            .cloned()
            .unwrap_or_else(|| fiber_ref.initial())
    }

    /// Returns a copy with `fiber_ref` set to `value`.
    #[must_use]
    pub fn updated<A: Shareable>(&self, fiber_ref: &FiberRef<A>, value: A) -> Self {
        let mut next = self.clone();
        next.set(fiber_ref, value);
        next
    }

    /// Sets a ref in place.
    pub fn set<A: Shareable>(&mut self, fiber_ref: &FiberRef<A>, value: A) {
        self.set_erased(&fiber_ref.def, Arc::new(value));
    }

    /// Removes a ref so it reads as its initial value again.
    pub fn delete<A: Shareable>(&mut self, fiber_ref: &FiberRef<A>) {
        if self.entries.contains_key(&fiber_ref.def.key) {
            Arc::make_mut(&mut self.entries).remove(&fiber_ref.def.key);
        }
    }

    /// Number of refs with an explicit value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no ref has an explicit value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_erased(&self, def: &Arc<FiberRefDef>) -> Erased {
        self.entries
            .get(&def.key)
            .map_or_else(|| Arc::clone(&def.initial), |e| Arc::clone(&e.value))
    }

    fn set_erased(&mut self, def: &Arc<FiberRefDef>, value: Erased) {
        Arc::make_mut(&mut self.entries).insert(
            def.key,
            Entry {
                value,
                def: Arc::clone(def),
            },
        );
    }

    /// The map a forked child starts with.
    #[must_use]
    pub fn fork(&self) -> Self {
        if self.entries.values().all(|e| e.def.fork.is_none()) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        for entry in entries.values_mut() {
            if let Some(fork) = &entry.def.fork {
                entry.value = fork(&entry.value);
            }
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Merges a joined child's values into `self` (the parent).
    ///
    /// Only refs whose value the child changed after `child_initial` (its
    /// map at fork time) are merged, using each ref's join policy.
    #[must_use]
    pub fn join(&self, child_initial: &Self, child_final: &Self) -> Self {
        let mut merged = self.clone();
        for (key, entry) in child_final.entries.iter() {
            let unchanged = child_initial
                .entries
                .get(key)
                .is_some_and(|e| Arc::ptr_eq(&e.value, &entry.value));
            if unchanged {
                continue;
            }
            let value = match &entry.def.join {
                Some(join) => join(&self.get_erased(&entry.def), &entry.value),
                None => Arc::clone(&entry.value),
            };
            merged.set_erased(&entry.def, value);
        }
        merged
    }
}

impl<E: Shareable> Effect<FiberRefs, E> {
    /// Snapshots the running fiber's fiber-local values.
    #[must_use]
    pub fn get_fiber_refs() -> Self {
        Self::from_op(Arc::new(Op::GetFiberRefs))
    }
}

impl<E: Shareable> Effect<(), E> {
    /// Replaces the running fiber's fiber-local values wholesale.
    #[must_use]
    pub fn set_fiber_refs(refs: FiberRefs) -> Self {
        Self::from_op(Arc::new(Op::SetFiberRefs(refs)))
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<u64> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        f.debug_struct("FiberRefs").field("refs", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_ref_reads_initial() {
        let r = FiberRef::new(5_u32);
        assert_eq!(FiberRefs::empty().get(&r), 5);
    }

    #[test]
    fn updated_is_persistent() {
        let r = FiberRef::new(String::from("a"));
        let base = FiberRefs::empty();
        let next = base.updated(&r, "b".into());
        assert_eq!(base.get(&r), "a");
        assert_eq!(next.get(&r), "b");
    }

    #[test]
    fn fork_applies_policy() {
        let depth = FiberRef::with_fork_join(0_u32, |d| d + 1, |parent, _| *parent);
        let refs = FiberRefs::empty().updated(&depth, 3);
        assert_eq!(refs.fork().get(&depth), 4);
    }

    #[test]
    fn join_merges_only_changed_refs() {
        let sum = FiberRef::with_fork_join(0_i64, |v| *v, |p, c| p + c);
        let plain = FiberRef::new("parent");

        let parent = FiberRefs::empty().updated(&sum, 10).updated(&plain, "parent");
        let child_initial = parent.fork();

        // Child leaves `sum` alone: nothing to merge.
        let joined = parent.join(&child_initial, &child_initial);
        assert_eq!(joined.get(&sum), 10);

        let child_final = child_initial.updated(&sum, 5).updated(&plain, "child");
        let joined = parent.join(&child_initial, &child_final);
        assert_eq!(joined.get(&sum), 15);
        assert_eq!(joined.get(&plain), "child");
    }

    #[test]
    fn delete_restores_initial() {
        let r = FiberRef::new(1_u8);
        let mut refs = FiberRefs::empty().updated(&r, 9);
        refs.delete(&r);
        assert_eq!(refs.get(&r), 1);
        assert!(refs.is_empty());
    }
}
