//! Clocks and timers.
//!
//! The runtime reads time through a [`TimeSource`]. [`WallClock`] follows
//! the monotonic OS clock; [`VirtualClock`] only moves when told to, which
//! makes timing-dependent tests deterministic.

mod driver;

pub use driver::{TimeSource, TimerDriver, VirtualClock, WallClock};
