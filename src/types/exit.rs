//! Fiber and effect outcomes.

use super::cause::{Cause, Defect};
use super::id::FiberId;
use core::fmt;

/// The outcome of running an effect: a value, or the cause of failure.
#[derive(Clone, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// The effect produced a value.
    Success(A),
    /// The effect failed.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// A failure with an arbitrary cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// A defect.
    #[must_use]
    pub fn die(defect: Defect) -> Self {
        Self::Failure(Cause::Die(defect))
    }

    /// An interruption by `fiber`.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(fiber))
    }

    /// Returns true for a successful exit.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for a failed exit.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the exit failed because of an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(c) if c.is_interrupted())
    }

    /// The success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Maps the success value.
    #[must_use]
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Maps the typed failures.
    #[must_use]
    pub fn map_error<F>(self, f: impl FnMut(E) -> F) -> Exit<A, F> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Drops the success value.
    #[must_use]
    pub fn as_unit(&self) -> Exit<(), E>
    where
        E: Clone,
    {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(c) => Exit::Failure(c.clone()),
        }
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(c) => Err(c),
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(value: Result<A, E>) -> Self {
        match value {
            Ok(a) => Self::Success(a),
            Err(e) => Self::fail(e),
        }
    }
}

impl<A: fmt::Debug, E: fmt::Debug> fmt::Debug for Exit<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(a) => write!(f, "Success({a:?})"),
            Self::Failure(c) => write!(f, "Failure({c:?})"),
        }
    }
}
