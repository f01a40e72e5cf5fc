//! Runtime metrics for observability.
//!
//! Counters are plain atomics updated on the hot path with relaxed
//! ordering. [`RuntimeMetrics::snapshot`] reads them into a serializable
//! [`MetricsSnapshot`].

use crate::types::{Cause, Exit};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one runtime.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    fibers_started: AtomicU64,
    fibers_succeeded: AtomicU64,
    fibers_failed: AtomicU64,
    fibers_died: AtomicU64,
    fibers_interrupted: AtomicU64,
    yields: AtomicU64,
    suspensions: AtomicU64,
    interrupt_requests: AtomicU64,
    timers_fired: AtomicU64,
    timers_cancelled: AtomicU64,
}

impl RuntimeMetrics {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fiber_started(&self) {
        self.fibers_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fiber_finished<A, E>(&self, exit: &Exit<A, E>) {
        let counter = match exit {
            Exit::Success(_) => &self.fibers_succeeded,
            Exit::Failure(cause) => match classify(cause) {
                ExitKind::Died => &self.fibers_died,
                ExitKind::Interrupted => &self.fibers_interrupted,
                _ => &self.fibers_failed,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn yielded(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn suspended(&self) {
        self.suspensions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn interrupt_requested(&self) {
        self.interrupt_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timer_fired(&self) {
        self.timers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timer_cancelled(&self) {
        self.timers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let started = load(&self.fibers_started);
        let succeeded = load(&self.fibers_succeeded);
        let failed = load(&self.fibers_failed);
        let died = load(&self.fibers_died);
        let interrupted = load(&self.fibers_interrupted);
        MetricsSnapshot {
            fibers_started: started,
            fibers_succeeded: succeeded,
            fibers_failed: failed,
            fibers_died: died,
            fibers_interrupted: interrupted,
            fibers_live: started.saturating_sub(succeeded + failed + died + interrupted),
            yields: load(&self.yields),
            suspensions: load(&self.suspensions),
            interrupt_requests: load(&self.interrupt_requests),
            timers_fired: load(&self.timers_fired),
            timers_cancelled: load(&self.timers_cancelled),
        }
    }
}

/// How a fiber ended, as far as metrics and supervisors care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Completed with a value.
    Succeeded,
    /// Failed with a typed error.
    Failed,
    /// Died with a defect.
    Died,
    /// Interrupted and nothing worse.
    Interrupted,
}

impl ExitKind {
    /// Classifies an exit.
    #[must_use]
    pub fn of<A, E>(exit: &Exit<A, E>) -> Self {
        match exit {
            Exit::Success(_) => Self::Succeeded,
            Exit::Failure(cause) => classify(cause),
        }
    }
}

// Defects dominate, then typed failures, then interruption.
fn classify<E>(cause: &Cause<E>) -> ExitKind {
    if cause.is_die() {
        ExitKind::Died
    } else if cause.is_failure() {
        ExitKind::Failed
    } else if cause.is_interrupted() {
        ExitKind::Interrupted
    } else {
        ExitKind::Failed
    }
}

/// A point-in-time copy of [`RuntimeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Fibers started.
    pub fibers_started: u64,
    /// Fibers that completed with a value.
    pub fibers_succeeded: u64,
    /// Fibers that failed with a typed error.
    pub fibers_failed: u64,
    /// Fibers that died with a defect.
    pub fibers_died: u64,
    /// Fibers that were interrupted.
    pub fibers_interrupted: u64,
    /// Fibers started but not yet finished.
    pub fibers_live: u64,
    /// Cooperative yields.
    pub yields: u64,
    /// Async suspensions.
    pub suspensions: u64,
    /// Interruption requests delivered to fibers.
    pub interrupt_requests: u64,
    /// Timers fired.
    pub timers_fired: u64,
    /// Timers cancelled before firing.
    pub timers_cancelled: u64,
}

impl MetricsSnapshot {
    /// Renders the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Fibers that have finished, whatever the outcome.
    #[must_use]
    pub const fn fibers_finished(&self) -> u64 {
        self.fibers_succeeded + self.fibers_failed + self.fibers_died + self.fibers_interrupted
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fibers_started={}", self.fibers_started)?;
        writeln!(f, "fibers_succeeded={}", self.fibers_succeeded)?;
        writeln!(f, "fibers_failed={}", self.fibers_failed)?;
        writeln!(f, "fibers_died={}", self.fibers_died)?;
        writeln!(f, "fibers_interrupted={}", self.fibers_interrupted)?;
        writeln!(f, "fibers_live={}", self.fibers_live)?;
        writeln!(f, "yields={}", self.yields)?;
        writeln!(f, "suspensions={}", self.suspensions)?;
        writeln!(f, "interrupt_requests={}", self.interrupt_requests)?;
        writeln!(f, "timers_fired={}", self.timers_fired)?;
        write!(f, "timers_cancelled={}", self.timers_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Defect, FiberId};

    #[test]
    fn exits_are_counted_by_kind() {
        let metrics = RuntimeMetrics::new();
        for _ in 0..4 {
            metrics.fiber_started();
        }
        metrics.fiber_finished(&Exit::<(), u8>::Success(()));
        metrics.fiber_finished(&Exit::<(), u8>::fail(1));
        metrics.fiber_finished(&Exit::<(), u8>::interrupt(FiberId::None));

        let snap = metrics.snapshot();
        assert_eq!(snap.fibers_succeeded, 1);
        assert_eq!(snap.fibers_failed, 1);
        assert_eq!(snap.fibers_interrupted, 1);
        assert_eq!(snap.fibers_live, 1);
        assert_eq!(snap.fibers_finished(), 3);
    }

    #[test]
    fn defects_dominate_classification() {
        let cause = Cause::fail(1_u8)
            .both(Cause::interrupt(FiberId::None))
            .then(Cause::die(Defect::new("boom")));
        assert_eq!(ExitKind::of(&Exit::<(), u8>::Failure(cause)), ExitKind::Died);
        let interrupted: Cause<u8> = Cause::interrupt(FiberId::None);
        assert_eq!(
            ExitKind::of(&Exit::<(), u8>::Failure(interrupted)),
            ExitKind::Interrupted
        );
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let metrics = RuntimeMetrics::new();
        metrics.yielded();
        metrics.timer_fired();
        let json = metrics.snapshot().to_json().unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.yields, 1);
        assert_eq!(back.timers_fired, 1);
        assert!(metrics.snapshot().to_string().contains("yields=1"));
    }
}
