//! Log severity levels.
//!
//! Levels order from least to most severe. The minimum level for a fiber is
//! a fiber-local value, so a region of code can raise or lower it with
//! [`FiberRef::locally`](crate::FiberRef::locally).

use core::fmt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How severe a log entry is. Doubles as the minimum-level filter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    /// Step-by-step interpreter detail.
    Trace = 0,
    /// Diagnostics for developers.
    Debug = 1,
    /// Normal operation.
    #[default]
    Info = 2,
    /// Something unexpected that the program recovered from.
    Warn = 3,
    /// A failure worth reporting.
    Error = 4,
    /// Disables logging when used as a minimum level.
    Off = 5,
}

impl LogLevel {
    /// Upper-case name, as printed in log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Off => "OFF",
        }
    }

    /// Whether an entry at this level passes a `minimum` filter. `Off` is
    /// never emitted and, as a minimum, lets nothing through.
    #[must_use]
    pub const fn enabled_for(self, minimum: Self) -> bool {
        !matches!(self, Self::Off) && (self as u8) >= (minimum as u8)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level {0:?}")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" | "none" => Ok(Self::Off),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_sort_by_severity() {
        let mut levels = vec![LogLevel::Off, LogLevel::Warn, LogLevel::Trace, LogLevel::Error, LogLevel::Info];
        levels.sort();
        let names: Vec<String> = levels.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["TRACE", "INFO", "WARN", "ERROR", "OFF"]);
    }

    #[test]
    fn off_filters_everything() {
        assert!(LogLevel::Error.enabled_for(LogLevel::Warn));
        assert!(!LogLevel::Debug.enabled_for(LogLevel::Info));
        assert!(!LogLevel::Error.enabled_for(LogLevel::Off));
        assert!(!LogLevel::Off.enabled_for(LogLevel::Trace));
    }

    #[test]
    fn parse_names() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!(" debug ".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&LogLevel::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
        let back: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, LogLevel::Error);
    }
}
