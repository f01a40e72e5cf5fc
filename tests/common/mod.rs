//! Shared helpers for effectum integration tests.

#![allow(dead_code)]

pub use effectum::test_utils::{
    TEST_WORKERS, init_test_logging, test_runtime, test_runtime_builder, test_virtual_runtime,
    wait_until,
};
pub use effectum::{
    assert_exit_interrupted, assert_exit_success, assert_with_log, test_complete, test_phase,
};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Long enough for a fiber to be scheduled on a loaded CI box.
pub const SETTLE: Duration = Duration::from_secs(5);

/// An append-only event log shared between fibers and the test body.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// An effect that records `event` when it runs.
    pub fn record(&self, event: &str) -> effectum::UIO<()> {
        let log = self.clone();
        let event = event.to_string();
        effectum::UIO::sync(move || log.push(event.clone()))
    }
}

const PROPTEST_SEED_ENV: &str = "EFFECTUM_PROPTEST_SEED";

/// Seed used on CI when no explicit seed is set.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x00EF_FEC7;

/// Property-test configuration with an optional fixed seed.
///
/// `EFFECTUM_PROPTEST_SEED` pins the seed; on CI a fixed default is used.
pub fn test_proptest_config(cases: u32) -> proptest::prelude::ProptestConfig {
    use proptest::test_runner::RngSeed;

    let mut config = proptest::prelude::ProptestConfig::with_cases(cases);
    let seed = std::env::var(PROPTEST_SEED_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .or_else(|| std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED));
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = seed {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}
