//! Runtime builder.

use super::Runtime;
use super::config::{ClockKind, RuntimeConfig};
use crate::error::RuntimeError;
use crate::observability::{LogLevel, LogSink};
use crate::supervisor::Supervisor;
use core::fmt;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding [`RuntimeConfig::worker_threads`].
pub const ENV_WORKER_THREADS: &str = "EFFECTUM_WORKER_THREADS";
/// Environment variable overriding [`RuntimeConfig::ops_before_yield`].
pub const ENV_OPS_BEFORE_YIELD: &str = "EFFECTUM_OPS_BEFORE_YIELD";
/// Environment variable overriding [`RuntimeConfig::clock`].
pub const ENV_CLOCK: &str = "EFFECTUM_CLOCK";

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    supervisor: Option<Arc<dyn Supervisor>>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("supervisor", &self.supervisor.is_some())
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set how many ops a fiber runs before yielding.
    #[must_use]
    pub fn ops_before_yield(mut self, ops: usize) -> Self {
        self.config.ops_before_yield = ops;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Choose the clock.
    #[must_use]
    pub fn clock(mut self, clock: ClockKind) -> Self {
        self.config.clock = clock;
        self
    }

    /// Use a virtual clock that only moves through
    /// [`Runtime::advance_time`].
    #[must_use]
    pub fn virtual_time(self) -> Self {
        self.clock(ClockKind::Virtual)
    }

    /// Set how long idle workers park between checks for work.
    #[must_use]
    pub fn idle_park_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_park_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the minimum level for [`Effect::log`](crate::Effect::log).
    #[must_use]
    pub fn min_log_level(mut self, level: LogLevel) -> Self {
        self.config.min_log_level = level;
        self
    }

    /// Install a supervisor that hears about every fiber start and end.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Install a sink for [`Effect::log`](crate::Effect::log) records.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Apply overrides from `EFFECTUM_*` environment variables. Unset
    /// variables leave the current value alone; unparsable ones are an
    /// error.
    pub fn from_env(mut self) -> Result<Self, RuntimeError> {
        if let Some(n) = parse_env::<usize>(ENV_WORKER_THREADS)? {
            self.config.worker_threads = n;
        }
        if let Some(ops) = parse_env::<usize>(ENV_OPS_BEFORE_YIELD)? {
            self.config.ops_before_yield = ops;
        }
        if let Some(clock) = parse_env::<ClockKind>(ENV_CLOCK)? {
            self.config.clock = clock;
        }
        Ok(self)
    }

    /// Replace the configuration with one parsed from TOML. Missing keys
    /// keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(mut self, source: &str) -> Result<Self, RuntimeError> {
        self.config =
            toml::from_str(source).map_err(|err| RuntimeError::ConfigParse(err.to_string()))?;
        Ok(self)
    }

    /// Replace the configuration with one read from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(self, path: impl AsRef<std::path::Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RuntimeError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        self.from_toml_str(&source)
    }

    /// The configuration as currently set.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        Runtime::start(self.config, self.supervisor, self.log_sink)
    }
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, RuntimeError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RuntimeError::InvalidEnv { key, value: raw }),
        Err(_) => Ok(None),
    }
}
