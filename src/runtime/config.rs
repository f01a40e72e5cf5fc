//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `ops_before_yield` | 2048 |
//! | `thread_name_prefix` | `"effectum-worker"` |
//! | `thread_stack_size` | 2 MiB |
//! | `clock` | `wall` |
//! | `idle_park_timeout_ms` | 50 |
//! | `min_log_level` | `info` |

use crate::error::RuntimeError;
use crate::observability::LogLevel;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Which clock a runtime reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Monotonic wall-clock time, with a timer thread.
    #[default]
    Wall,
    /// Virtual time that only moves through
    /// [`Runtime::advance_time`](super::Runtime::advance_time).
    Virtual,
}

impl FromStr for ClockKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wall" => Ok(Self::Wall),
            "virtual" => Ok(Self::Virtual),
            other => Err(RuntimeError::InvalidConfig(format!(
                "unknown clock kind {other:?} (expected \"wall\" or \"virtual\")"
            ))),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Ops a fiber evaluates before yielding to other fibers.
    pub ops_before_yield: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Stack size per worker thread, in bytes.
    pub thread_stack_size: usize,
    /// Clock driving `sleep`, timeouts and fiber timestamps.
    pub clock: ClockKind,
    /// How long an idle worker parks before re-checking for stealable work,
    /// in milliseconds.
    pub idle_park_timeout_ms: u64,
    /// Initial minimum level for [`Effect::log`](crate::Effect::log).
    pub min_log_level: LogLevel,
}

impl RuntimeConfig {
    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.worker_threads == 0 {
            return Err(RuntimeError::InvalidConfig(
                "worker_threads must be >= 1".into(),
            ));
        }
        if self.ops_before_yield == 0 {
            return Err(RuntimeError::InvalidConfig(
                "ops_before_yield must be >= 1".into(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "thread_name_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The idle park timeout as a duration.
    #[must_use]
    pub const fn idle_park_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_park_timeout_ms)
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            ops_before_yield: 2048,
            thread_name_prefix: "effectum-worker".to_string(),
            thread_stack_size: 2 * 1024 * 1024,
            clock: ClockKind::Wall,
            idle_park_timeout_ms: 50,
            min_log_level: LogLevel::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ops_before_yield, 2048);
        assert_eq!(config.clock, ClockKind::Wall);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = RuntimeConfig {
            worker_threads: 0,
            ..RuntimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn zero_budget_rejected() {
        let config = RuntimeConfig {
            ops_before_yield: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn clock_kind_parses_case_insensitively() {
        assert_eq!("Virtual".parse::<ClockKind>().unwrap(), ClockKind::Virtual);
        assert_eq!(" wall ".parse::<ClockKind>().unwrap(), ClockKind::Wall);
        assert!("lunar".parse::<ClockKind>().is_err());
    }

    #[test]
    fn config_deserializes_from_json_with_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"worker_threads": 3, "clock": "virtual"}"#).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.clock, ClockKind::Virtual);
        assert_eq!(config.ops_before_yield, 2048);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<RuntimeConfig>(r#"{"workers": 3}"#);
        assert!(parsed.is_err());
    }
}
