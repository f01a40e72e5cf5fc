//! Test utilities for effectum.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Runtime constructors with small worker pools
//!
//! # Example
//! ```
//! use effectum::test_utils::{init_test_logging, test_runtime};
//! use effectum::{Effect, Exit};
//!
//! init_test_logging();
//! let runtime = test_runtime();
//! assert_eq!(runtime.run_exit(Effect::<u8, String>::succeed(1)), Exit::Success(1));
//! ```

use crate::runtime::{Runtime, RuntimeBuilder};
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Worker threads used by [`test_runtime`].
pub const TEST_WORKERS: usize = 2;

/// Initialize test logging. `RUST_LOG` picks the filter; the default is
/// `effectum=trace`.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_filter("effectum=trace");
}

/// Initialize test logging with a default filter used when `RUST_LOG` is
/// unset. The first call wins; later calls are no-ops.
pub fn init_test_logging_with_filter(default_filter: &str) {
    INIT_LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Builder preset for tests: a small worker pool with short idle parks.
#[must_use]
pub fn test_runtime_builder() -> RuntimeBuilder {
    Runtime::builder()
        .worker_threads(TEST_WORKERS)
        .thread_name_prefix("effectum-test")
        .idle_park_timeout(Duration::from_millis(5))
}

/// Create a runtime for tests with a wall clock.
///
/// # Panics
///
/// Panics if the worker threads cannot be spawned.
#[must_use]
pub fn test_runtime() -> Runtime {
    test_runtime_builder()
        .build()
        .expect("failed to build test runtime")
}

/// Create a runtime for tests whose clock only moves through
/// [`Runtime::advance_time`].
///
/// # Panics
///
/// Panics if the worker threads cannot be spawned.
#[must_use]
pub fn test_virtual_runtime() -> Runtime {
    test_runtime_builder()
        .virtual_time()
        .build()
        .expect("failed to build virtual-time test runtime")
}

/// Polls `condition` until it holds or `timeout` passes. Returns whether
/// it held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::Exit::Success(v) => assert_eq!(v, $expected),
            other => unreachable!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit failed because of an interruption.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match $exit {
            ref exit if exit.is_interrupted() => {}
            other => unreachable!("expected an interrupted exit, got {:?}", other),
        }
    };
}
