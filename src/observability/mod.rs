//! Observability: log levels, fiber log annotations, log emission and
//! runtime metrics.

pub mod context;
pub mod level;
pub mod log;
pub mod metrics;

pub use context::{LOG_ANNOTATIONS, LogAnnotations};
pub use level::{LogLevel, ParseLogLevelError};
pub use log::{LogRecord, LogSink, MIN_LOG_LEVEL, MemorySink};
pub use metrics::{ExitKind, MetricsSnapshot, RuntimeMetrics};
