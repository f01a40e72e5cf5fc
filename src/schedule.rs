//! Repetition and retry policies.
//!
//! A [`Schedule`] is a pure state machine: given the current time, the
//! latest input and its state, it returns its next state, an output and a
//! [`Decision`]. The runtime only supplies the clock and the loop, through
//! [`Effect::repeat`] and [`Effect::retry`].
//!
//! # Example
//!
//! ```
//! use effectum::schedule::{both, recurs, spaced};
//! use effectum::{Effect, Runtime};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! let runtime = Runtime::builder().worker_threads(1).build().unwrap();
//! let attempts = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&attempts);
//! let flaky = Effect::<u32, String>::suspend(move || {
//!     if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!         Effect::fail("not yet".into())
//!     } else {
//!         Effect::succeed(7)
//!     }
//! });
//! let value = runtime
//!     .run_sync(flaky.retry(both(recurs(5), spaced(Duration::from_millis(1)))))
//!     .unwrap();
//! assert_eq!(value, 7);
//! assert_eq!(attempts.load(Ordering::SeqCst), 3);
//! ```

use crate::effect::{Effect, Shareable};
use crate::types::Time;
use std::sync::Arc;
use std::time::Duration;

/// What a schedule wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run again after the given delay.
    Continue(Duration),
    /// Stop.
    Done,
}

impl Decision {
    /// Returns true for [`Decision::Continue`].
    #[must_use]
    pub const fn is_continue(self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// A repetition policy driven by inputs of type `In`.
pub trait Schedule<In>: Send + Sync + 'static {
    /// Per-run state.
    type State: Clone + Send + Sync + 'static;
    /// What the schedule reports when it stops.
    type Output: Clone + Send + Sync + 'static;

    /// The state before the first step.
    fn initial(&self) -> Self::State;

    /// Advances the schedule by one input.
    fn step(&self, now: Time, input: &In, state: Self::State) -> (Self::State, Self::Output, Decision);
}

/// Recurs a fixed number of times with no delay. Output: repetitions so far.
#[derive(Debug, Clone, Copy)]
pub struct Recurs {
    times: u64,
}

/// Recurs `times` times.
#[must_use]
pub const fn recurs(times: u64) -> Recurs {
    Recurs { times }
}

impl<In> Schedule<In> for Recurs {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _now: Time, _input: &In, count: u64) -> (u64, u64, Decision) {
        if count < self.times {
            (count + 1, count + 1, Decision::Continue(Duration::ZERO))
        } else {
            (count, count, Decision::Done)
        }
    }
}

/// Recurs forever with no delay. Output: repetitions so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forever;

/// Recurs forever.
#[must_use]
pub const fn forever() -> Forever {
    Forever
}

impl<In> Schedule<In> for Forever {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _now: Time, _input: &In, count: u64) -> (u64, u64, Decision) {
        let next = count.saturating_add(1);
        (next, next, Decision::Continue(Duration::ZERO))
    }
}

/// Recurs forever, waiting a fixed interval. Output: repetitions so far.
#[derive(Debug, Clone, Copy)]
pub struct Spaced {
    interval: Duration,
}

/// Recurs forever, `interval` apart.
#[must_use]
pub const fn spaced(interval: Duration) -> Spaced {
    Spaced { interval }
}

impl<In> Schedule<In> for Spaced {
    type State = u64;
    type Output = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _now: Time, _input: &In, count: u64) -> (u64, u64, Decision) {
        let next = count.saturating_add(1);
        (next, next, Decision::Continue(self.interval))
    }
}

/// Recurs forever with exponentially growing delays. Output: the delay
/// chosen at this step.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    base: Duration,
    factor: f64,
    max: Duration,
}

/// Recurs forever, waiting `base`, then `base * factor`, and so on. The
/// factor is clamped to at least 1.
#[must_use]
pub fn exponential(base: Duration, factor: f64) -> Exponential {
    Exponential {
        base,
        factor: factor.max(1.0),
        max: Duration::MAX,
    }
}

impl Exponential {
    /// Caps every delay at `max`.
    #[must_use]
    pub const fn with_max_delay(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// The delay before repetition `attempt` (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u64) -> Duration {
        let exponent = attempt.min(i32::MAX as u64) as i32;
        let nanos = self.base.as_nanos() as f64 * self.factor.powi(exponent);
        let delay = if nanos >= u64::MAX as f64 {
            Duration::MAX
        } else {
            Duration::from_nanos(nanos as u64)
        };
        delay.min(self.max)
    }
}

impl<In> Schedule<In> for Exponential {
    type State = u64;
    type Output = Duration;

    fn initial(&self) -> u64 {
        0
    }

    fn step(&self, _now: Time, _input: &In, attempt: u64) -> (u64, Duration, Decision) {
        let delay = self.delay_for(attempt);
        (attempt.saturating_add(1), delay, Decision::Continue(delay))
    }
}

/// Two schedules run side by side. See [`both`].
#[derive(Debug, Clone, Copy)]
pub struct Both<L, R> {
    left: L,
    right: R,
}

/// Continues only while both schedules continue, waiting for the longer
/// of their delays.
#[must_use]
pub const fn both<L, R>(left: L, right: R) -> Both<L, R> {
    Both { left, right }
}

impl<In, L: Schedule<In>, R: Schedule<In>> Schedule<In> for Both<L, R> {
    type State = (L::State, R::State);
    type Output = (L::Output, R::Output);

    fn initial(&self) -> Self::State {
        (self.left.initial(), self.right.initial())
    }

    fn step(&self, now: Time, input: &In, state: Self::State) -> (Self::State, Self::Output, Decision) {
        let (ls, lo, ld) = self.left.step(now, input, state.0);
        let (rs, ro, rd) = self.right.step(now, input, state.1);
        let decision = match (ld, rd) {
            (Decision::Continue(a), Decision::Continue(b)) => Decision::Continue(a.max(b)),
            _ => Decision::Done,
        };
        ((ls, rs), (lo, ro), decision)
    }
}

fn repeat_loop<A, E, S>(effect: Effect<A, E>, schedule: Arc<S>, state: S::State) -> Effect<S::Output, E>
where
    A: Shareable,
    E: Shareable,
    S: Schedule<A>,
{
    effect.clone().flat_map(move |value| {
        let (effect, schedule, state) = (effect.clone(), Arc::clone(&schedule), state.clone());
        Effect::<Time, E>::clock_now().flat_map(move |now| {
            let (next, output, decision) = schedule.step(now, &value, state.clone());
            match decision {
                Decision::Done => Effect::succeed(output),
                Decision::Continue(delay) => Effect::<(), E>::sleep(delay)
                    .zip_right(repeat_loop(effect.clone(), Arc::clone(&schedule), next)),
            }
        })
    })
}

fn retry_loop<A, E, S>(effect: Effect<A, E>, schedule: Arc<S>, state: S::State) -> Effect<A, E>
where
    A: Shareable,
    E: Shareable,
    S: Schedule<E>,
{
    effect.clone().catch_all(move |error| {
        let (effect, schedule, state) = (effect.clone(), Arc::clone(&schedule), state.clone());
        Effect::<Time, E>::clock_now().flat_map(move |now| {
            let (next, _, decision) = schedule.step(now, &error, state.clone());
            match decision {
                Decision::Done => Effect::fail(error.clone()),
                Decision::Continue(delay) => Effect::<(), E>::sleep(delay)
                    .zip_right(retry_loop(effect.clone(), Arc::clone(&schedule), next)),
            }
        })
    })
}

impl<A: Shareable, E: Shareable> Effect<A, E> {
    /// Runs the effect, then again for as long as `schedule` continues,
    /// feeding it each success. Stops at the first failure. Produces the
    /// schedule's final output.
    #[must_use]
    pub fn repeat<S: Schedule<A>>(self, schedule: S) -> Effect<S::Output, E> {
        let state = schedule.initial();
        repeat_loop(self, Arc::new(schedule), state)
    }

    /// Runs the effect and, on a typed failure, runs it again for as long
    /// as `schedule` continues, feeding it each error. Defects and
    /// interruptions are not retried.
    #[must_use]
    pub fn retry<S: Schedule<E>>(self, schedule: S) -> Self {
        let state = schedule.initial();
        retry_loop(self, Arc::new(schedule), state)
    }
}
