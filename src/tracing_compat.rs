//! Optional tracing integration.
//!
//! With the `tracing-integration` feature the macros below are the ones from
//! the `tracing` crate. Without it they expand to nothing, so call sites do
//! not need their own `cfg` guards.

#[cfg(feature = "tracing-integration")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
pub(crate) use {debug, error, info, trace, warn};
