//! Effectum: a structured-concurrency effect runtime.
//!
//! # Overview
//!
//! Programs are built as immutable [`Effect`] values and run on lightweight
//! fibers multiplexed onto a small pool of worker threads. Every fiber can be
//! interrupted at any safe point, every acquired resource is released exactly
//! once, and a fiber never finishes before the children it forked.
//!
//! # Core Guarantees
//!
//! - **No orphan fibers**: A finishing fiber interrupts and awaits its live children
//! - **Exactly-once release**: Finalizers run once, uninterruptibly, however the body exits
//! - **Interruption is a cause**: It travels through [`Cause`] and is never swallowed by recovery
//! - **Fairness**: A fiber yields after a bounded number of operations
//! - **Stack safety**: Evaluation is a loop; effect chains of any depth are safe
//! - **Deterministic time in tests**: A virtual clock moves only when told to
//!
//! # Module Structure
//!
//! - [`types`]: Fiber ids, [`Cause`], [`Exit`] and runtime flags
//! - [`effect`]: The [`Effect`] type and its combinators
//! - [`fiber`]: Fiber handles and status
//! - [`fiber_ref`]: Fiber-local values
//! - [`context`]: The service environment
//! - [`scope`]: Finalizer registries and scopes
//! - [`deferred`]: One-shot synchronization between fibers
//! - [`schedule`]: Repetition and retry policies
//! - [`runtime`]: Scheduler, builder and entry points
//! - [`time`]: Clocks and the timer driver
//! - [`supervisor`]: Fiber lifecycle observation
//! - [`observability`]: Fiber-aware logging and metrics
//! - [`error`](mod@error): Host-facing error types
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)
//!
//! # Example
//!
//! ```
//! use effectum::{Effect, Exit, Runtime};
//! use std::time::Duration;
//!
//! let runtime = Runtime::builder().worker_threads(2).build().unwrap();
//! let slow = Effect::<u32, String>::succeed(1).delay(Duration::from_secs(60));
//! let fast = Effect::<u32, String>::succeed(2);
//! assert_eq!(runtime.run_exit(slow.race(fast)), Exit::Success(2));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::type_complexity)]

pub mod context;
pub mod deferred;
pub mod effect;
pub mod error;
pub mod fiber;
pub mod fiber_ref;
pub mod observability;
pub mod runtime;
pub mod schedule;
pub mod scope;
pub mod supervisor;
pub mod time;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use context::{Context, ContextPatch};
pub use deferred::Deferred;
pub use effect::{Effect, Erased, Restore, Resume, Shareable, UIO};
pub use error::RuntimeError;
pub use fiber::{Fiber, FiberContext, FiberStatus};
pub use fiber_ref::{FiberRef, FiberRefs};
pub use observability::{
    ExitKind, LogAnnotations, LogLevel, LogRecord, LogSink, MemorySink, MetricsSnapshot,
};
pub use runtime::{
    ClockKind, FiberFuture, Runtime, RuntimeBuilder, RuntimeConfig, RuntimeFiber,
};
pub use schedule::{Decision, Schedule};
pub use scope::{ExecutionStrategy, Finalizer, ReleaseKey, ReleaseMap, Scope, ScopeExit};
pub use supervisor::{FiberTracker, LifetimeViolation, Supervisor};
pub use types::{Cause, Defect, Exit, FiberId, RuntimeFlags, RuntimeFlagsPatch, Time};
