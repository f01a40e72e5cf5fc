//! Failure causes.
//!
//! A [`Cause`] is the full story of why a computation did not produce a
//! value: an expected failure, a defect, an interruption, or a combination
//! of several of those that happened one after another ([`Cause::Then`]) or
//! side by side ([`Cause::Both`]).
//!
//! The combinators [`Cause::then`] and [`Cause::both`] keep the tree in a
//! canonical right-nested form with [`Cause::Empty`] removed, so structural
//! equality is also equality up to associativity and identity.

use super::id::FiberId;
use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// An unexpected failure, usually a panic inside user code.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: Arc<str>,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Converts a panic payload into a defect.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(message)
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Defect({:?})", self.message)
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why a computation failed.
#[derive(Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// Nothing went wrong.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected failure.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Combine {
    Then,
    Both,
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// An interruption by `fiber`.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Interrupt(fiber)
    }

    /// Sequential composition: `self` happened, then `other`.
    #[must_use]
    pub fn then(self, other: Self) -> Self {
        Self::combine(Combine::Then, self, other)
    }

    /// Parallel composition: `self` and `other` happened concurrently.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        Self::combine(Combine::Both, self, other)
    }

    fn combine(kind: Combine, left: Self, right: Self) -> Self {
        if left.is_empty() {
            return right;
        }
        if right.is_empty() {
            return left;
        }
        // Walk the left spine so the result stays right-nested.
        let mut spine = Vec::new();
        let mut cursor = left;
        loop {
            match (kind, cursor) {
                (Combine::Then, Self::Then(l, r)) | (Combine::Both, Self::Both(l, r)) => {
                    spine.push(*l);
                    cursor = *r;
                }
                (_, other) => {
                    spine.push(other);
                    break;
                }
            }
        }
        let mut acc = right;
        while let Some(item) = spine.pop() {
            acc = match kind {
                Combine::Then => Self::Then(Box::new(item), Box::new(acc)),
                Combine::Both => Self::Both(Box::new(item), Box::new(acc)),
            };
        }
        acc
    }

    /// Returns true if this cause is (structurally) empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Then(l, r) | Self::Both(l, r) => l.is_empty() && r.is_empty(),
            _ => false,
        }
    }

    fn leaves(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut pending = vec![self];
        while let Some(cause) = pending.pop() {
            match cause {
                Self::Then(l, r) | Self::Both(l, r) => {
                    pending.push(r);
                    pending.push(l);
                }
                Self::Empty => {}
                leaf => out.push(leaf),
            }
        }
        out
    }

    /// Returns true if the cause contains a typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.leaves().iter().any(|c| matches!(c, Self::Fail(_)))
    }

    /// Returns true if the cause contains a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.leaves().iter().any(|c| matches!(c, Self::Die(_)))
    }

    /// Returns true if the cause contains an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.leaves().iter().any(|c| matches!(c, Self::Interrupt(_)))
    }

    /// Returns true if the cause is non-empty and made only of interruptions.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        let leaves = self.leaves();
        !leaves.is_empty() && leaves.iter().all(|c| matches!(c, Self::Interrupt(_)))
    }

    /// All typed failures, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .into_iter()
            .filter_map(|c| match c {
                Self::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// All defects, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .into_iter()
            .filter_map(|c| match c {
                Self::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Ids of every fiber that contributed an interruption.
    #[must_use]
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out: Vec<FiberId> = Vec::new();
        for leaf in self.leaves() {
            if let Self::Interrupt(id) = leaf {
                if !out.contains(id) {
                    out.push(id.clone());
                }
            }
        }
        out
    }

    /// The first typed failure, if any.
    #[must_use]
    pub fn failure_option(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// Transforms typed failures, keeping the shape of the cause.
    #[must_use]
    pub fn map<F>(self, mut f: impl FnMut(E) -> F) -> Cause<F> {
        self.map_inner(&mut f)
    }

    fn map_inner<F>(self, f: &mut impl FnMut(E) -> F) -> Cause<F> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(l, r) => {
                let l = l.map_inner(f);
                Cause::Then(Box::new(l), Box::new(r.map_inner(f)))
            }
            Self::Both(l, r) => {
                let l = l.map_inner(f);
                Cause::Both(Box::new(l), Box::new(r.map_inner(f)))
            }
        }
    }

    /// Removes typed failures, keeping defects and interruptions.
    #[must_use]
    pub fn strip_failures<F>(self) -> Cause<F> {
        match self {
            Self::Empty | Self::Fail(_) => Cause::Empty,
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(l, r) => l.strip_failures().then(r.strip_failures()),
            Self::Both(l, r) => l.strip_failures().both(r.strip_failures()),
        }
    }

    /// Returns the first typed failure, or the cause with all typed failures
    /// removed when there is none.
    pub fn failure_or_cause(self) -> Result<E, Self> {
        if !self.is_failure() {
            return Err(self);
        }
        let mut pending = vec![self];
        while let Some(cause) = pending.pop() {
            match cause {
                Self::Fail(e) => return Ok(e),
                Self::Then(l, r) | Self::Both(l, r) => {
                    pending.push(*r);
                    pending.push(*l);
                }
                _ => {}
            }
        }
        Err(Self::Empty)
    }

    /// Converts every typed failure into a defect.
    #[must_use]
    pub fn fail_to_die<F>(self, mut describe: impl FnMut(E) -> Defect) -> Cause<F> {
        self.map_to_die(&mut describe)
    }

    fn map_to_die<F>(self, describe: &mut impl FnMut(E) -> Defect) -> Cause<F> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Die(describe(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(l, r) => {
                let l = l.map_to_die(describe);
                l.then(r.map_to_die(describe))
            }
            Self::Both(l, r) => {
                let l = l.map_to_die(describe);
                l.both(r.map_to_die(describe))
            }
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Fail(e) => write!(f, "Fail({e:?})"),
            Self::Die(d) => write!(f, "Die({:?})", d.message()),
            Self::Interrupt(id) => write!(f, "Interrupt({id})"),
            Self::Then(l, r) => write!(f, "Then({l:?}, {r:?})"),
            Self::Both(l, r) => write!(f, "Both({l:?}, {r:?})"),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let leaves = self.leaves();
        if leaves.is_empty() {
            return f.write_str("<empty cause>");
        }
        for (i, leaf) in leaves.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match leaf {
                Self::Fail(e) => write!(f, "failure: {e:?}")?,
                Self::Die(d) => write!(f, "defect: {d}")?,
                Self::Interrupt(id) => write!(f, "interrupted by {id}")?,
                _ => {}
            }
        }
        Ok(())
    }
}
