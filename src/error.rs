//! Errors raised by the runtime itself.
//!
//! Failures of effects are not Rust errors: they travel as [`Cause`] values
//! inside [`Exit`]. `RuntimeError` only covers the host-side surface, such as
//! building a runtime or waiting on a fiber from outside.
//!
//! [`Cause`]: crate::Cause
//! [`Exit`]: crate::Exit

use crate::types::FiberId;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by runtime construction and the host-side fiber API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A configuration value was out of range.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),

    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv {
        /// The variable name.
        key: &'static str,
        /// The raw value.
        value: String,
    },

    /// A configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    ConfigIo {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// A worker or timer thread could not be spawned.
    #[error("failed to spawn runtime thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// Waiting for a fiber exceeded the given timeout.
    #[error("fiber {fiber} did not finish within {timeout:?}")]
    WaitTimeout {
        /// The fiber being waited on.
        fiber: FiberId,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The runtime has been shut down.
    #[error("runtime is shut down")]
    Shutdown,
}

impl RuntimeError {
    /// Returns true if this error was caused by invalid configuration.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::InvalidEnv { .. }
                | Self::ConfigIo { .. }
                | Self::ConfigParse(_)
        )
    }
}
