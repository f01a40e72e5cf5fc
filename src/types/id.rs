//! Identifier and timestamp types for fibers.
//!
//! A [`FiberId`] names the fiber that performed an operation. Interruption
//! causes record the id of the interruptor, so ids are cheap to clone and
//! compare, and two ids can be combined when several fibers act together.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a fiber.
///
/// `None` is used for interruptions that originate outside any fiber (for
/// example the runtime handle interrupting a root fiber). `Composite` is the
/// combination of two ids and is produced by [`FiberId::combine`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum FiberId {
    /// No fiber.
    None,
    /// A fiber started by the runtime.
    Runtime {
        /// Process-unique sequence number.
        id: u64,
        /// Clock reading when the fiber was created.
        started_at: Time,
    },
    /// Two ids acting together.
    Composite(Arc<FiberId>, Arc<FiberId>),
}

impl FiberId {
    /// Allocates a fresh runtime fiber id.
    #[must_use]
    pub fn new(started_at: Time) -> Self {
        let id = NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed);
        Self::Runtime { id, started_at }
    }

    /// Creates an id with a fixed sequence number (tests and diagnostics).
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(id: u64) -> Self {
        Self::Runtime {
            id,
            started_at: Time::ZERO,
        }
    }

    /// Combines two ids. `None` is the identity element.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, other) => other,
            (this, Self::None) => this,
            (this, other) => Self::Composite(Arc::new(this), Arc::new(other)),
        }
    }

    /// Returns the sequence number of a runtime id.
    #[must_use]
    pub const fn seq(&self) -> Option<u64> {
        match self {
            Self::Runtime { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Returns the creation timestamp of a runtime id.
    #[must_use]
    pub const fn started_at(&self) -> Option<Time> {
        match self {
            Self::Runtime { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    /// Returns every runtime sequence number contained in this id.
    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut pending = vec![self];
        while let Some(id) = pending.pop() {
            match id {
                Self::None => {}
                Self::Runtime { id, .. } => out.push(*id),
                Self::Composite(left, right) => {
                    pending.push(right);
                    pending.push(left);
                }
            }
        }
        out
    }

    /// Returns true for [`FiberId::None`].
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("FiberId(None)"),
            Self::Runtime { id, started_at } => write!(f, "FiberId(#{id} @ {started_at})"),
            Self::Composite(left, right) => write!(f, "FiberId({left:?} + {right:?})"),
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("#none"),
            Self::Runtime { id, .. } => write!(f, "#{id}"),
            Self::Composite(left, right) => write!(f, "{left}+{right}"),
        }
    }
}

/// A logical timestamp for the runtime.
///
/// With the wall clock this is the time elapsed since the runtime started.
/// With the virtual clock it only moves when the test advances it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a new time from seconds since epoch.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds since epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns the elapsed time between `earlier` and `self`.
    ///
    /// Saturates to zero if `self` is before `earlier`.
    #[inline]
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

pub(crate) fn duration_to_nanos_saturating(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Add<Duration> for Time {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(duration_to_nanos_saturating(rhs)))
    }
}

impl fmt::Debug for Time {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        let a = FiberId::new(Time::ZERO);
        let b = FiberId::new(Time::ZERO);
        assert_ne!(a, b);
        assert!(a.seq().unwrap() < b.seq().unwrap());
    }

    #[test]
    fn combine_with_none_is_identity() {
        let a = FiberId::new_for_test(7);
        assert_eq!(a.clone().combine(FiberId::None), a);
        assert_eq!(FiberId::None.combine(a.clone()), a);
    }

    #[test]
    fn composite_lists_all_ids() {
        let id = FiberId::new_for_test(1)
            .combine(FiberId::new_for_test(2))
            .combine(FiberId::new_for_test(3));
        assert_eq!(id.ids(), vec![1, 2, 3]);
        assert_eq!(id.to_string(), "#1+#2+#3");
    }

    #[test]
    fn time_arithmetic_saturates() {
        let t = Time::from_millis(5) + Duration::from_millis(10);
        assert_eq!(t.as_millis(), 15);
        assert_eq!(Time::MAX + Duration::from_secs(1), Time::MAX);
        assert_eq!(Time::ZERO.duration_since(t), Duration::ZERO);
        assert_eq!(t.duration_since(Time::from_millis(5)), Duration::from_millis(10));
    }

    #[test]
    fn time_display_picks_unit() {
        assert_eq!(Time::from_nanos(12).to_string(), "12ns");
        assert_eq!(Time::from_millis(12).to_string(), "12ms");
        assert_eq!(Time::from_millis(1500).to_string(), "1.500s");
    }
}
