//! Fiber-aware log emission.
//!
//! [`Effect::log`] writes a [`LogRecord`] tagged with the running fiber's id
//! and annotations. Records go to `tracing` when the `tracing-integration`
//! feature is on, and to the runtime's [`LogSink`] if one is installed.

use super::context::{LOG_ANNOTATIONS, LogAnnotations};
use super::level::LogLevel;
use crate::effect::{Effect, Op, Shareable, Step};
use crate::fiber_ref::FiberRef;
use crate::tracing_compat::{debug, error, info, trace, warn};
use crate::types::FiberId;
use parking_lot::Mutex;
use std::sync::{Arc, LazyLock};

/// The minimum level a fiber logs at. Entries below it are dropped.
pub static MIN_LOG_LEVEL: LazyLock<FiberRef<LogLevel>> =
    LazyLock::new(|| FiberRef::new(LogLevel::Info));

/// One log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,
    /// The fiber that logged.
    pub fiber: FiberId,
    /// The message.
    pub message: String,
    /// The fiber's annotations when it logged.
    pub annotations: LogAnnotations,
}

/// Receives log records from a runtime.
pub trait LogSink: Send + Sync {
    /// Handles one record.
    fn log(&self, record: &LogRecord);
}

/// A sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every record received so far.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn log(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

fn emit(record: &LogRecord, sink: Option<&Arc<dyn LogSink>>) {
    let fiber = &record.fiber;
    let annotations = &record.annotations;
    let message = &record.message;
    match record.level {
        LogLevel::Trace => trace!(%fiber, %annotations, "{message}"),
        LogLevel::Debug => debug!(%fiber, %annotations, "{message}"),
        LogLevel::Info => info!(%fiber, %annotations, "{message}"),
        LogLevel::Warn => warn!(%fiber, %annotations, "{message}"),
        LogLevel::Error => error!(%fiber, %annotations, "{message}"),
        LogLevel::Off => {}
    }
    if let Some(sink) = sink {
        sink.log(record);
    }
}

impl<E: Shareable> Effect<(), E> {
    /// Logs `message` at `level` if the fiber's minimum level allows it.
    #[must_use]
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(move |ctx| {
            let minimum = ctx.fiber_refs().get(&MIN_LOG_LEVEL);
            if level.enabled_for(minimum) {
                let record = LogRecord {
                    level,
                    fiber: ctx.id().clone(),
                    message: message.clone(),
                    annotations: ctx.fiber_refs().get(&LOG_ANNOTATIONS),
                };
                emit(&record, ctx.shared().log_sink.as_ref());
            }
            Step::Value(Box::new(()))
        }))))
    }

    /// Logs at debug level.
    #[must_use]
    pub fn log_debug(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Debug, message)
    }

    /// Logs at info level.
    #[must_use]
    pub fn log_info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    /// Logs at warn level.
    #[must_use]
    pub fn log_warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warn, message)
    }

    /// Logs at error level.
    #[must_use]
    pub fn log_error(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, message)
    }
}

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    /// Runs the effect with a different minimum log level.
    #[must_use]
    pub fn with_min_log_level(self, level: LogLevel) -> Self {
        MIN_LOG_LEVEL.locally(level, self)
    }
}
