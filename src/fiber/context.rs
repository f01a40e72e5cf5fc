//! A view of the running fiber, handed to [`Effect::with_fiber`].
//!
//! [`Effect::with_fiber`]: crate::Effect::with_fiber

use super::runtime::{FiberRuntime, FiberState};
use crate::context::Context;
use crate::fiber_ref::FiberRefs;
use crate::runtime::RuntimeShared;
use crate::scope::Scope;
use crate::time::TimerDriver;
use crate::types::{Cause, FiberId, RuntimeFlags, Time};
use std::sync::Arc;

/// The running fiber's state, borrowed for the duration of one step.
pub struct FiberContext<'a> {
    pub(crate) fiber: &'a Arc<FiberRuntime>,
    pub(crate) state: &'a mut FiberState,
}

impl FiberContext<'_> {
    /// The running fiber's id.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        self.fiber.id()
    }

    /// The flags in force.
    #[must_use]
    pub fn runtime_flags(&self) -> RuntimeFlags {
        self.state.flags
    }

    /// The fiber's fiber-local values.
    #[must_use]
    pub fn fiber_refs(&self) -> &FiberRefs {
        &self.state.refs
    }

    /// The fiber's service context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.state.context
    }

    /// The runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.fiber.shared().clock.now()
    }

    /// Ids of the fiber's live non-daemon children.
    #[must_use]
    pub fn children(&self) -> Vec<FiberId> {
        self.fiber.children_ids()
    }

    /// The fiber's own scope, closed when the fiber ends.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.state.scope
    }

    /// Returns true if an interruption is pending.
    #[must_use]
    pub fn is_interrupt_pending(&self) -> bool {
        self.state.pending_interrupt.is_some()
    }

    pub(crate) fn fiber_refs_mut(&mut self) -> &mut FiberRefs {
        &mut self.state.refs
    }

    /// Latches an interruption by `by`; it takes effect at the next
    /// interruptible step.
    pub(crate) fn latch_interrupt(&mut self, by: FiberId) {
        FiberRuntime::add_interruptor(self.state, by);
    }

    pub(crate) fn timer(&self) -> &Arc<TimerDriver> {
        &self.fiber.shared().timer
    }

    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        self.fiber.shared()
    }

    pub(crate) fn fiber(&self) -> &Arc<FiberRuntime> {
        self.fiber
    }

    pub(crate) fn pending_interrupt(&self) -> Option<&Cause<crate::effect::Erased>> {
        self.state.pending_interrupt.as_ref()
    }
}
