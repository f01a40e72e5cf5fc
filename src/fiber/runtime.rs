//! The fiber interpreter.
//!
//! A [`FiberRuntime`] owns one fiber: its continuation stack, flags, refs and
//! context. Other threads talk to it only through its inbox. Whoever flips
//! `running` from false to true gets to schedule the fiber, so at most one
//! worker evaluates it at a time.
//!
//! Evaluation is a loop over [`Step`]s. Values and failures unwind the
//! stack frame by frame; ops push frames and produce the next step. Nothing
//! recurses on the native stack, so effect chains of any depth are safe.
//!
//! Interruption is a latched cause. At every step boundary where the fiber
//! is interruptible, the latched cause replaces whatever the fiber was about
//! to do, and failure handlers are skipped while it unwinds. Exit hooks and
//! the fiber's own completion (interrupting children, closing its scope) run
//! uninterruptibly.

use super::FiberStatus;
use super::context::FiberContext;
use super::resume::ResumeHandle;
use crate::context::Context;
use crate::effect::{
    Cont, Effect, Erased, ErasedCause, ExitHook, FiberExit, Handler, Op, Register, Resume, Settled,
    Step, UIO, Value, guard,
};
use crate::fiber_ref::FiberRefs;
use crate::observability::ExitKind;
use crate::runtime::RuntimeShared;
use crate::runtime::scheduler::Runnable;
use crate::scope::{ExecutionStrategy, Scope};
use crate::tracing_compat::{debug, error, trace};
use crate::types::{Cause, Defect, Exit, FiberId, RuntimeFlags};
use crossbeam_queue::SegQueue;
use hashbrown::HashMap;
use parking_lot::Mutex;
use slab::Slab;
use smallvec::SmallVec;
use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering, fence};
use std::sync::{Arc, Weak};

/// A message for a fiber.
pub(crate) enum FiberMessage {
    /// Resume the suspension numbered `epoch`.
    Resume { epoch: u64, step: Step },
    /// Interrupt on behalf of the given fiber.
    Interrupt(FiberId),
    /// Run a closure against the fiber's state.
    Stateful(Box<dyn FnOnce(&mut FiberContext<'_>) + Send>),
}

enum Frame {
    OnSuccess(Cont),
    OnFailure(Handler),
    Fold { on_failure: Handler, on_success: Cont },
    RevertFlags(RuntimeFlags),
    RestoreContext(Context),
    OnExit(ExitHook),
    ExitAfterFinalizer(Settled),
}

enum Phase {
    Running,
    Finalizing(Settled),
    Done,
}

struct Suspension {
    canceler: Option<Arc<Op>>,
    blocking_on: Option<FiberId>,
}

pub(crate) struct FiberState {
    step: Option<Step>,
    stack: Vec<Frame>,
    pub(crate) refs: FiberRefs,
    pub(crate) context: Context,
    pub(crate) flags: RuntimeFlags,
    pub(crate) pending_interrupt: Option<ErasedCause>,
    epoch: u64,
    suspension: Option<Suspension>,
    phase: Phase,
    pub(crate) scope: Scope,
}

enum Next {
    Step(Step),
    Yield(Step),
    Suspend,
    Done(FiberExit),
}

enum Outcome {
    Yielded,
    Suspended,
    Done(FiberExit, FiberRefs),
}

pub(crate) type Observer = Box<dyn FnOnce(&FiberExit) + Send>;

struct Completion {
    outcome: Option<(FiberExit, FiberRefs)>,
    observers: Slab<Observer>,
}

/// How a new fiber starts out.
pub(crate) struct FiberSetup {
    pub(crate) refs: FiberRefs,
    pub(crate) context: Context,
    pub(crate) flags: RuntimeFlags,
    pub(crate) daemon: bool,
    pub(crate) root: bool,
}

/// One fiber.
pub(crate) struct FiberRuntime {
    id: FiberId,
    seq: u64,
    shared: Arc<RuntimeShared>,
    inbox: SegQueue<FiberMessage>,
    running: AtomicBool,
    done: AtomicBool,
    state: Mutex<FiberState>,
    completion: Mutex<Completion>,
    status: Mutex<FiberStatus>,
    children: Mutex<HashMap<u64, Arc<FiberRuntime>>>,
    parent: Option<Weak<FiberRuntime>>,
    initial_refs: FiberRefs,
    daemon: bool,
    root: bool,
}

impl FiberRuntime {
    pub(crate) fn new(shared: Arc<RuntimeShared>, effect: Arc<Op>, setup: FiberSetup) -> Arc<Self> {
        Self::with_parent(shared, effect, setup, None)
    }

    fn with_parent(
        shared: Arc<RuntimeShared>,
        effect: Arc<Op>,
        setup: FiberSetup,
        parent: Option<Weak<Self>>,
    ) -> Arc<Self> {
        let id = FiberId::new(shared.clock.now());
        let seq = id.seq().unwrap_or_default();
        let state = FiberState {
            step: Some(Step::Op(effect)),
            stack: Vec::new(),
            refs: setup.refs.clone(),
            context: setup.context,
            flags: setup.flags,
            pending_interrupt: None,
            epoch: 0,
            suspension: None,
            phase: Phase::Running,
            scope: Scope::new(ExecutionStrategy::Sequential),
        };
        Arc::new(Self {
            id,
            seq,
            shared,
            inbox: SegQueue::new(),
            running: AtomicBool::new(false),
            done: AtomicBool::new(false),
            state: Mutex::new(state),
            completion: Mutex::new(Completion {
                outcome: None,
                observers: Slab::new(),
            }),
            status: Mutex::new(FiberStatus::Running {
                interruptible: setup.flags.interruptible(),
            }),
            children: Mutex::new(HashMap::new()),
            parent,
            initial_refs: setup.refs,
            daemon: setup.daemon,
            root: setup.root,
        })
    }

    pub(crate) fn id(&self) -> &FiberId {
        &self.id
    }

    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    pub(crate) fn initial_refs(&self) -> &FiberRefs {
        &self.initial_refs
    }

    pub(crate) fn status(&self) -> FiberStatus {
        self.status.lock().clone()
    }

    /// The exit, once the fiber is done.
    pub(crate) fn poll(&self) -> Option<FiberExit> {
        self.completion
            .lock()
            .outcome
            .as_ref()
            .map(|(exit, _)| exit.clone())
    }

    /// The final refs, once the fiber is done.
    pub(crate) fn final_refs(&self) -> Option<FiberRefs> {
        self.completion
            .lock()
            .outcome
            .as_ref()
            .map(|(_, refs)| refs.clone())
    }

    pub(crate) fn children_ids(&self) -> Vec<FiberId> {
        self.live_children()
            .iter()
            .map(|child| child.id.clone())
            .collect()
    }

    fn live_children(&self) -> Vec<Arc<Self>> {
        let children = self.children.lock();
        let mut live: Vec<(u64, Arc<Self>)> = children
            .iter()
            .map(|(seq, child)| (*seq, Arc::clone(child)))
            .collect();
        drop(children);
        live.sort_by_key(|(seq, _)| *seq);
        live.into_iter().map(|(_, child)| child).collect()
    }

    /// Registers a callback for the fiber's exit. If the fiber is already
    /// done the exit is handed back instead.
    pub(crate) fn add_observer(&self, observer: Observer) -> Result<usize, FiberExit> {
        let mut completion = self.completion.lock();
        match &completion.outcome {
            Some((exit, _)) => Err(exit.clone()),
            None => Ok(completion.observers.insert(observer)),
        }
    }

    pub(crate) fn remove_observer(&self, key: usize) {
        let mut completion = self.completion.lock();
        if completion.observers.contains(key) {
            drop(completion.observers.remove(key));
        }
    }

    /// Sends a message and makes sure someone will process it.
    pub(crate) fn tell(self: &Arc<Self>, message: FiberMessage) {
        self.inbox.push(message);
        self.wake();
    }

    fn wake(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.shared.scheduler.schedule(Arc::clone(self));
        }
    }

    /// Registers the fiber with its parent and the supervisor, then
    /// schedules it.
    pub(crate) fn start(self: &Arc<Self>, parent: Option<&Arc<Self>>) {
        if let (false, Some(parent)) = (self.daemon, parent) {
            parent.children.lock().insert(self.seq, Arc::clone(self));
        }
        self.shared.metrics.fiber_started();
        if let Some(supervisor) = &self.shared.supervisor {
            supervisor.on_start(&self.id, parent.map(|p| &p.id), self.daemon);
        }
        trace!(fiber = %self.id, daemon = self.daemon, root = self.root, "fiber started");
        self.wake();
    }

    /// Runs the fiber until it yields, suspends or finishes. Called by a
    /// scheduler worker that won the `running` flag.
    pub(crate) fn run(self: &Arc<Self>) {
        let outcome = {
            let mut state = self.state.lock();
            if self.done.load(Ordering::Acquire) {
                self.drain_after_done(&mut state);
                Outcome::Suspended
            } else {
                self.evaluate(&mut state)
            }
        };
        match outcome {
            Outcome::Yielded => self.shared.scheduler.schedule(Arc::clone(self)),
            Outcome::Suspended => self.release(),
            Outcome::Done(exit, refs) => {
                self.publish(exit, refs);
                self.release();
            }
        }
    }

    fn release(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        // Pairs with the SeqCst CAS in `wake`: either a sender sees
        // `running == false` or we see its message.
        fence(Ordering::SeqCst);
        if !self.inbox.is_empty() {
            self.wake();
        }
    }

    fn evaluate(self: &Arc<Self>, state: &mut FiberState) -> Outcome {
        let mut budget = self.shared.config.ops_before_yield.max(1);
        if !self.inbox.is_empty() {
            self.drain_inbox(state);
        }
        if state.step.is_some() {
            *self.status.lock() = FiberStatus::Running {
                interruptible: state.flags.interruptible(),
            };
        }
        loop {
            if !self.inbox.is_empty() {
                self.drain_inbox(state);
            }
            let Some(step) = state.step.take() else {
                return Outcome::Suspended;
            };
            let next = match Self::inject_interrupt(state, step) {
                Step::Value(value) => self.unwind_value(state, value),
                Step::Failure(cause) => self.unwind_failure(state, cause),
                Step::Op(op) => {
                    budget -= 1;
                    if budget == 0 && state.flags.cooperative_yielding() {
                        state.step = Some(Step::Op(op));
                        self.shared.metrics.yielded();
                        return Outcome::Yielded;
                    }
                    if budget == 0 {
                        budget = self.shared.config.ops_before_yield.max(1);
                    }
                    self.eval_op(state, &op)
                }
            };
            match next {
                Next::Step(step) => state.step = Some(step),
                Next::Yield(step) => {
                    state.step = Some(step);
                    self.shared.metrics.yielded();
                    return Outcome::Yielded;
                }
                Next::Suspend => return Outcome::Suspended,
                Next::Done(exit) => return Outcome::Done(exit, state.refs.clone()),
            }
        }
    }

    fn interrupting(state: &FiberState) -> bool {
        state.flags.interruptible() && state.pending_interrupt.is_some()
    }

    fn inject_interrupt(state: &FiberState, step: Step) -> Step {
        if !state.flags.interruptible() {
            return step;
        }
        let Some(pending) = &state.pending_interrupt else {
            return step;
        };
        match step {
            Step::Failure(cause) if cause.is_interrupted() => Step::Failure(cause),
            Step::Failure(cause) => Step::Failure(cause.then(pending.clone())),
            Step::Value(_) | Step::Op(_) => Step::Failure(pending.clone()),
        }
    }

    fn eval_op(self: &Arc<Self>, state: &mut FiberState, op: &Arc<Op>) -> Next {
        let step = match &**op {
            Op::Succeed(thunk) => guard(|| Step::Value(thunk())),
            Op::Fail(thunk) => guard(|| Step::Failure(thunk())),
            Op::FlatMap(effect, cont) => {
                state.stack.push(Frame::OnSuccess(Arc::clone(cont)));
                Step::Op(Arc::clone(effect))
            }
            Op::Fold {
                effect,
                on_failure,
                on_success,
            } => {
                state.stack.push(match on_success {
                    Some(on_success) => Frame::Fold {
                        on_failure: Arc::clone(on_failure),
                        on_success: Arc::clone(on_success),
                    },
                    None => Frame::OnFailure(Arc::clone(on_failure)),
                });
                Step::Op(Arc::clone(effect))
            }
            Op::Async {
                register,
                blocking_on,
            } => return self.suspend(state, register, blocking_on.clone()),
            Op::Fork { effect, daemon } => {
                let child = self.fork_child(state, Arc::clone(effect), *daemon);
                Step::Value(Box::new(child))
            }
            Op::OnExit { effect, hook } => {
                state.stack.push(Frame::OnExit(Arc::clone(hook)));
                Step::Op(Arc::clone(effect))
            }
            Op::UpdateRuntimeFlags { patch, body } => {
                let previous = state.flags;
                let patched = previous.patch(*patch);
                match body {
                    None => {
                        state.flags = patched;
                        Step::Value(Box::new(()))
                    }
                    Some(body) => {
                        if patched != previous {
                            state.stack.push(Frame::RevertFlags(previous));
                            state.flags = patched;
                        }
                        guard(|| body(previous))
                    }
                }
            }
            Op::Provide { patch, effect } => {
                let previous = state.context.clone();
                state.context = patch.apply(&previous);
                state.stack.push(Frame::RestoreContext(previous));
                Step::Op(Arc::clone(effect))
            }
            Op::Yield => return Next::Yield(Step::Value(Box::new(()))),
            Op::GetFiberRefs => Step::Value(Box::new(state.refs.clone())),
            Op::SetFiberRefs(refs) => {
                state.refs = refs.clone();
                Step::Value(Box::new(()))
            }
            Op::WithFiber(f) => {
                let mut ctx = FiberContext {
                    fiber: self,
                    state: &mut *state,
                };
                guard(|| f(&mut ctx))
            }
        };
        Next::Step(step)
    }

    fn unwind_value(self: &Arc<Self>, state: &mut FiberState, value: Value) -> Next {
        loop {
            match state.stack.pop() {
                None => return self.complete(state, Settled::Success(value)),
                Some(Frame::OnSuccess(cont) | Frame::Fold { on_success: cont, .. }) => {
                    return Next::Step(guard(|| cont(value)));
                }
                Some(Frame::OnFailure(_)) => {}
                Some(Frame::RevertFlags(flags)) => {
                    state.flags = flags;
                    return Next::Step(Step::Value(value));
                }
                Some(Frame::RestoreContext(context)) => state.context = context,
                Some(Frame::OnExit(hook)) => {
                    return Self::run_exit_hook(state, &hook, Settled::Success(value));
                }
                Some(Frame::ExitAfterFinalizer(saved)) => return Next::Step(saved.into_step()),
            }
        }
    }

    fn unwind_failure(self: &Arc<Self>, state: &mut FiberState, cause: ErasedCause) -> Next {
        loop {
            match state.stack.pop() {
                None => return self.complete(state, Settled::Failure(cause)),
                Some(Frame::OnSuccess(_)) => {}
                Some(Frame::OnFailure(handler) | Frame::Fold { on_failure: handler, .. }) => {
                    if !Self::interrupting(state) {
                        return Next::Step(guard(|| handler(cause)));
                    }
                }
                Some(Frame::RevertFlags(flags)) => {
                    state.flags = flags;
                    return Next::Step(Step::Failure(cause));
                }
                Some(Frame::RestoreContext(context)) => state.context = context,
                Some(Frame::OnExit(hook)) => {
                    return Self::run_exit_hook(state, &hook, Settled::Failure(cause));
                }
                Some(Frame::ExitAfterFinalizer(saved)) => {
                    let cause = match saved {
                        Settled::Success(_) => cause,
                        Settled::Failure(first) => first.then(cause),
                    };
                    return Next::Step(Step::Failure(cause));
                }
            }
        }
    }

    fn run_exit_hook(state: &mut FiberState, hook: &ExitHook, settled: Settled) -> Next {
        let flags = state.flags;
        state.stack.push(Frame::RevertFlags(flags));
        state.flags = flags.disable(RuntimeFlags::INTERRUPTION);
        let step = guard(|| Step::Op(hook(settled.as_exit_ref())));
        state.stack.push(Frame::ExitAfterFinalizer(settled));
        Next::Step(step)
    }

    fn suspend(
        self: &Arc<Self>,
        state: &mut FiberState,
        register: &Register,
        blocking_on: Option<FiberId>,
    ) -> Next {
        state.epoch += 1;
        let handle = ResumeHandle::new(Arc::clone(self), state.epoch);
        state.suspension = Some(Suspension {
            canceler: None,
            blocking_on: blocking_on.clone(),
        });
        match catch_unwind(AssertUnwindSafe(|| register(handle))) {
            Ok(canceler) => {
                if let Some(suspension) = &mut state.suspension {
                    suspension.canceler = canceler;
                }
            }
            Err(payload) => {
                state.suspension = None;
                state.epoch += 1;
                return Next::Step(Step::Failure(Cause::Die(Defect::from_panic(payload))));
            }
        }
        if !self.inbox.is_empty() {
            self.drain_inbox(state);
        }
        match state.step.take() {
            Some(step) => Next::Step(step),
            None => {
                self.shared.metrics.suspended();
                *self.status.lock() = FiberStatus::Suspended {
                    interruptible: state.flags.interruptible(),
                    blocking_on,
                };
                Next::Suspend
            }
        }
    }

    fn drain_inbox(self: &Arc<Self>, state: &mut FiberState) {
        while let Some(message) = self.inbox.pop() {
            match message {
                FiberMessage::Resume { epoch, step } => {
                    if epoch == state.epoch && state.suspension.is_some() {
                        state.suspension = None;
                        state.step = Some(step);
                    }
                }
                FiberMessage::Interrupt(by) => self.process_interrupt(state, by),
                FiberMessage::Stateful(f) => f(&mut FiberContext {
                    fiber: self,
                    state: &mut *state,
                }),
            }
        }
    }

    fn drain_after_done(self: &Arc<Self>, state: &mut FiberState) {
        while let Some(message) = self.inbox.pop() {
            if let FiberMessage::Stateful(f) = message {
                f(&mut FiberContext {
                    fiber: self,
                    state: &mut *state,
                });
            }
        }
    }

    /// Latches an interruption by `by`. Repeated requests from the same
    /// interruptor are recorded once.
    pub(crate) fn add_interruptor(state: &mut FiberState, by: FiberId) {
        let cause = Cause::Interrupt(by.clone());
        state.pending_interrupt = Some(match state.pending_interrupt.take() {
            None => cause,
            Some(pending) if pending.interruptors().contains(&by) => pending,
            Some(pending) => pending.both(cause),
        });
    }

    fn process_interrupt(&self, state: &mut FiberState, by: FiberId) {
        self.shared.metrics.interrupt_requested();
        trace!(fiber = %self.id, by = %by, "interrupt requested");
        Self::add_interruptor(state, by);
        if !state.flags.interruptible() {
            return;
        }
        let Some(suspension) = state.suspension.take() else {
            return;
        };
        state.epoch += 1;
        let pending = state.pending_interrupt.clone().unwrap_or(Cause::Empty);
        state.step = Some(match suspension.canceler {
            Some(canceler) => {
                state.stack.push(Frame::RevertFlags(state.flags));
                state.flags = state.flags.disable(RuntimeFlags::INTERRUPTION);
                let on_failure = pending.clone();
                Step::Op(Arc::new(Op::Fold {
                    effect: canceler,
                    on_failure: Arc::new(move |failed| Step::Failure(on_failure.clone().then(failed))),
                    on_success: Some(Arc::new(move |_| Step::Failure(pending.clone()))),
                }))
            }
            None => Step::Failure(pending),
        });
    }

    fn fork_child(self: &Arc<Self>, state: &FiberState, effect: Arc<Op>, daemon: bool) -> Arc<Self> {
        let setup = FiberSetup {
            refs: state.refs.fork(),
            context: state.context.clone(),
            flags: state.flags,
            daemon,
            root: false,
        };
        let parent = (!daemon).then(|| Arc::downgrade(self));
        let child = Self::with_parent(Arc::clone(&self.shared), effect, setup, parent);
        child.start(Some(self));
        child
    }

    fn complete(self: &Arc<Self>, state: &mut FiberState, settled: Settled) -> Next {
        match std::mem::replace(&mut state.phase, Phase::Running) {
            Phase::Running => {
                let exit = settled.as_exit_ref().to_unit_exit();
                let children = self.live_children();
                if children.is_empty() && state.scope.try_close_empty(&exit) {
                    return self.finish(state, settled);
                }
                let finalize = self.completion_effect(children, state.scope.clone(), exit);
                state.phase = Phase::Finalizing(settled);
                state.flags = state.flags.disable(RuntimeFlags::INTERRUPTION);
                Next::Step(Step::Op(finalize.op))
            }
            Phase::Finalizing(saved) => {
                let merged = match (saved, settled) {
                    (saved, Settled::Success(_)) => saved,
                    (Settled::Success(_), Settled::Failure(cause)) => Settled::Failure(cause),
                    (Settled::Failure(first), Settled::Failure(cause)) => {
                        Settled::Failure(first.then(cause))
                    }
                };
                self.finish(state, merged)
            }
            Phase::Done => {
                state.phase = Phase::Done;
                Next::Suspend
            }
        }
    }

    /// Interrupts every live child, waits for all of them, then closes the
    /// fiber's scope.
    fn completion_effect(&self, children: Vec<Arc<Self>>, scope: Scope, exit: Exit<(), Erased>) -> UIO<()> {
        let me = self.id.clone();
        let targets = children.clone();
        let interrupt_all = UIO::sync(move || {
            for child in &targets {
                child.tell(FiberMessage::Interrupt(me.clone()));
            }
        });
        let await_all = UIO::collect_all(children.into_iter().map(|child| observe(child, |_| ())));
        interrupt_all
            .zip_right(await_all)
            .zip_right(scope.close(exit))
    }

    fn finish(&self, state: &mut FiberState, settled: Settled) -> Next {
        state.phase = Phase::Done;
        state.stack.clear();
        let exit = match settled {
            Settled::Success(value) => match value.downcast::<Erased>() {
                Ok(erased) => Exit::Success(*erased),
                Err(_) => Exit::Failure(Cause::Die(Defect::new("fiber result was not sealed"))),
            },
            Settled::Failure(cause) => Exit::Failure(cause),
        };
        self.done.store(true, Ordering::Release);
        Next::Done(exit)
    }

    fn publish(&self, exit: FiberExit, refs: FiberRefs) {
        *self.status.lock() = FiberStatus::Done;
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.children.lock().remove(&self.seq);
        }
        let leftovers: Vec<Arc<Self>> = self.children.lock().drain().map(|(_, child)| child).collect();
        for child in leftovers {
            child.tell(FiberMessage::Interrupt(self.id.clone()));
        }
        self.shared.metrics.fiber_finished(&exit);
        let kind = ExitKind::of(&exit);
        match (&exit, self.root) {
            (Exit::Failure(cause), true) if cause.is_die() => {
                let defects: Vec<&str> = cause.defects().iter().map(|d| d.message()).collect();
                error!(fiber = %self.id, ?defects, "root fiber died");
            }
            _ => debug!(fiber = %self.id, ?kind, "fiber finished"),
        }
        if let Some(supervisor) = &self.shared.supervisor {
            supervisor.on_end(&self.id, kind);
        }
        // Usually a parent joiner and the root latch.
        let observers: SmallVec<[Observer; 2]> = {
            let mut completion = self.completion.lock();
            completion.outcome = Some((exit.clone(), refs));
            completion.observers.drain().collect()
        };
        for observer in observers {
            observer(&exit);
        }
    }
}

impl Runnable for FiberRuntime {
    fn run_task(self: Arc<Self>) {
        self.run();
    }
}

/// Suspends until `fiber` is done, then produces `view` of its exit.
/// Interrupting the waiter only stops the wait.
pub(crate) fn observe<T: Send + 'static>(
    fiber: Arc<FiberRuntime>,
    view: impl Fn(&FiberExit) -> T + Send + Sync + 'static,
) -> UIO<T> {
    let view = Arc::new(view);
    let target = fiber.id().clone();
    Effect::async_blocking_on(target, move |resume: Resume<T, Infallible>| {
        let callback_view = Arc::clone(&view);
        let callback_resume = resume.clone();
        let observer: Observer = Box::new(move |exit: &FiberExit| callback_resume.succeed(callback_view(exit)));
        match fiber.add_observer(observer) {
            Ok(key) => {
                let fiber = Arc::clone(&fiber);
                Some(UIO::sync(move || fiber.remove_observer(key)))
            }
            Err(exit) => {
                resume.succeed(view(&exit));
                None
            }
        }
    })
}
