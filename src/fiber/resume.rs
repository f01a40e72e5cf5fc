//! One-shot resumption of a suspended fiber.

use super::runtime::{FiberMessage, FiberRuntime};
use crate::effect::Step;
use crate::types::FiberId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Resumes one suspension of one fiber. Clones share the one-shot flag:
/// only the first resume through any clone is delivered.
#[derive(Clone)]
pub(crate) struct ResumeHandle {
    fiber: Arc<FiberRuntime>,
    epoch: u64,
    used: Arc<AtomicBool>,
}

impl ResumeHandle {
    pub(crate) fn new(fiber: Arc<FiberRuntime>, epoch: u64) -> Self {
        Self {
            fiber,
            epoch,
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn resume(&self, step: Step) {
        if !self.used.swap(true, Ordering::AcqRel) {
            self.fiber.tell(FiberMessage::Resume {
                epoch: self.epoch,
                step,
            });
        }
    }

    pub(crate) fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn fiber_id(&self) -> &FiberId {
        self.fiber.id()
    }
}
