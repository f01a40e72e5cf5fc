//! Fiber lifecycle supervision.
//!
//! A [`Supervisor`] installed on a runtime hears about every fiber start and
//! end. [`FiberTracker`] is a supervisor that records the fiber tree and
//! completion order and can verify structured lifetimes: a non-daemon child
//! always finishes before its parent.
//!
//! # Usage
//!
//! ```ignore
//! let tracker = Arc::new(FiberTracker::new());
//! let runtime = Runtime::builder().supervisor(tracker.clone()).build()?;
//! runtime.run_exit(program);
//! tracker.check_structured()?;
//! ```

use crate::observability::ExitKind;
use crate::types::FiberId;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::fmt;

/// Observes fiber lifecycles.
pub trait Supervisor: Send + Sync {
    /// A fiber was started. `parent` is the forking fiber, also for daemons.
    fn on_start(&self, fiber: &FiberId, parent: Option<&FiberId>, daemon: bool);

    /// A fiber finished, after its children and finalizers.
    fn on_end(&self, fiber: &FiberId, exit: ExitKind);
}

/// A structured-lifetime violation.
///
/// A fiber finished while one of its non-daemon children was still live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifetimeViolation {
    /// The fiber that finished too early.
    pub parent: FiberId,
    /// Children that were still live when it finished.
    pub live_children: Vec<FiberId>,
}

impl fmt::Display for LifetimeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fiber {} finished with {} live children",
            self.parent,
            self.live_children.len()
        )
    }
}

impl std::error::Error for LifetimeViolation {}

#[derive(Debug, Default)]
struct TrackerState {
    parents: HashMap<FiberId, Option<FiberId>>,
    children: HashMap<FiberId, Vec<FiberId>>,
    daemons: HashSet<FiberId>,
    ended: HashMap<FiberId, ExitKind>,
    order: Vec<FiberId>,
    violations: Vec<LifetimeViolation>,
}

/// Records the fiber tree and checks structured lifetimes.
#[derive(Debug, Default)]
pub struct FiberTracker {
    state: Mutex<TrackerState>,
}

impl FiberTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies that no fiber finished before its non-daemon children.
    /// Returns the first violation found.
    pub fn check_structured(&self) -> Result<(), LifetimeViolation> {
        match self.state.lock().violations.first() {
            Some(violation) => Err(violation.clone()),
            None => Ok(()),
        }
    }

    /// Fibers in the order they finished.
    #[must_use]
    pub fn completion_order(&self) -> Vec<FiberId> {
        self.state.lock().order.clone()
    }

    /// The parent recorded for `fiber`.
    #[must_use]
    pub fn parent_of(&self, fiber: &FiberId) -> Option<FiberId> {
        self.state.lock().parents.get(fiber).cloned().flatten()
    }

    /// How `fiber` ended, if it has.
    #[must_use]
    pub fn exit_of(&self, fiber: &FiberId) -> Option<ExitKind> {
        self.state.lock().ended.get(fiber).copied()
    }

    /// Number of fibers started.
    #[must_use]
    pub fn started_count(&self) -> usize {
        self.state.lock().parents.len()
    }

    /// Number of fibers started but not finished.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let state = self.state.lock();
        state.parents.len() - state.ended.len()
    }

    /// Forgets everything recorded so far.
    pub fn reset(&self) {
        *self.state.lock() = TrackerState::default();
    }
}

impl Supervisor for FiberTracker {
    fn on_start(&self, fiber: &FiberId, parent: Option<&FiberId>, daemon: bool) {
        let mut state = self.state.lock();
        state.parents.insert(fiber.clone(), parent.cloned());
        state.children.entry(fiber.clone()).or_default();
        if daemon {
            state.daemons.insert(fiber.clone());
        } else if let Some(p) = parent {
            state.children.entry(p.clone()).or_default().push(fiber.clone());
        }
    }

    fn on_end(&self, fiber: &FiberId, exit: ExitKind) {
        let mut state = self.state.lock();
        state.ended.insert(fiber.clone(), exit);
        state.order.push(fiber.clone());

        let live_children: Vec<FiberId> = state
            .children
            .get(fiber)
            .map(|children| {
                children
                    .iter()
                    .filter(|c| !state.ended.contains_key(*c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !live_children.is_empty() {
            state.violations.push(LifetimeViolation {
                parent: fiber.clone(),
                live_children,
            });
        }
    }
}
