//! Structured lifetimes: children never outlive their parents.

mod common;
use common::*;

use effectum::{
    Deferred, Effect, ExecutionStrategy, Exit, ExitKind, Fiber, FiberTracker, Scope, UIO,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn tracked_runtime() -> (effectum::Runtime, Arc<FiberTracker>) {
    let tracker = Arc::new(FiberTracker::new());
    let runtime = test_runtime_builder()
        .supervisor(tracker.clone())
        .build()
        .expect("runtime");
    (runtime, tracker)
}

/// A child that signals `ready` from inside its interrupt hook, then blocks.
fn parked_child(log: &EventLog, ready: &Deferred<(), String>) -> Effect<u32, String> {
    let log = log.clone();
    ready
        .succeed(())
        .widen::<String>()
        .zip_right(Effect::never())
        .on_interrupt(move |_| log.record("child interrupted"))
}

#[test]
fn unjoined_children_are_interrupted_when_parent_finishes() {
    init_test_logging();
    test_phase!("unjoined_children_are_interrupted_when_parent_finishes");

    let (runtime, tracker) = tracked_runtime();
    let log = EventLog::new();
    let (ready_a, ready_b) = (Deferred::<(), String>::new(), Deferred::<(), String>::new());
    let program = parked_child(&log, &ready_a)
        .fork()
        .zip(parked_child(&log, &ready_b).fork())
        .widen::<String>()
        .flat_map(move |(a, b)| {
            ready_a
                .await_value()
                .zip_right(ready_b.await_value())
                .as_value((a.id().clone(), b.id().clone()))
        });

    let (a, b) = runtime.run_sync(program).unwrap();
    assert_eq!(log.count("child interrupted"), 2);
    assert_eq!(tracker.exit_of(&a), Some(ExitKind::Interrupted));
    assert_eq!(tracker.exit_of(&b), Some(ExitKind::Interrupted));
    tracker.check_structured().unwrap();

    test_complete!("unjoined_children_are_interrupted_when_parent_finishes");
}

#[test]
fn every_fiber_finishes_before_its_parent() {
    init_test_logging();
    test_phase!("every_fiber_finishes_before_its_parent");

    let (runtime, tracker) = tracked_runtime();
    let leaf = Effect::<u32, String>::succeed(1);
    let middle = leaf
        .clone()
        .fork()
        .zip(leaf.fork())
        .widen::<String>()
        .flat_map(|(a, b)| a.join().zip(b.join()))
        .map(|(a, b)| a + b);
    let program = middle
        .clone()
        .fork()
        .zip(middle.fork())
        .widen::<String>()
        .flat_map(|(a, b)| a.join().zip(b.join()))
        .map(|(a, b)| a + b);

    assert_eq!(runtime.run_exit(program), Exit::Success(4));
    assert_eq!(tracker.started_count(), 7);
    assert_eq!(tracker.live_count(), 0);
    tracker.check_structured().unwrap();

    let order = tracker.completion_order();
    for fiber in &order {
        if let Some(parent) = tracker.parent_of(fiber) {
            let child_at = order.iter().position(|f| f == fiber);
            let parent_at = order.iter().position(|f| *f == parent);
            assert!(child_at < parent_at, "{fiber} finished after {parent}");
        }
    }

    test_complete!("every_fiber_finishes_before_its_parent");
}

#[test]
fn daemon_fiber_outlives_parent() {
    init_test_logging();
    test_phase!("daemon_fiber_outlives_parent");

    let (runtime, tracker) = tracked_runtime();
    let release = Deferred::<u32, String>::new();
    let program = release.await_value().fork_daemon();
    let daemon = runtime.run_sync(program).unwrap();

    assert_eq!(tracker.exit_of(daemon.id()), None);
    assert!(release.complete_now(Exit::Success(8)));
    assert!(wait_until(SETTLE, || tracker.exit_of(daemon.id()).is_some()));
    assert_eq!(tracker.exit_of(daemon.id()), Some(ExitKind::Succeeded));
    tracker.check_structured().unwrap();

    test_complete!("daemon_fiber_outlives_parent");
}

#[test]
fn fork_in_scope_is_interrupted_when_scope_closes() {
    init_test_logging();
    test_phase!("fork_in_scope_is_interrupted_when_scope_closes");

    let runtime = test_runtime();
    let scope = Scope::new(ExecutionStrategy::Sequential);
    let program = Effect::<u32, String>::never()
        .fork_in(scope.clone())
        .flat_map({
            let scope = scope.clone();
            move |fiber| scope.close(Exit::Success(())).zip_right(fiber.await_exit())
        });

    assert_exit_interrupted!(runtime.run_sync(program).unwrap());
    assert!(scope.release_map().is_empty());

    test_complete!("fork_in_scope_is_interrupted_when_scope_closes");
}

#[test]
fn fork_in_detaches_finished_fiber_from_scope() {
    init_test_logging();
    test_phase!("fork_in_detaches_finished_fiber_from_scope");

    let runtime = test_runtime();
    let scope = Scope::new(ExecutionStrategy::Sequential);
    let program = Effect::<u32, String>::succeed(2)
        .fork_in(scope.clone())
        .flat_map(|fiber| fiber.await_exit());

    assert_eq!(runtime.run_sync(program).unwrap(), Exit::Success(2));
    assert!(wait_until(SETTLE, || scope.release_map().is_empty()));

    test_complete!("fork_in_detaches_finished_fiber_from_scope");
}

#[test]
fn fork_in_closed_scope_interrupts_immediately() {
    init_test_logging();
    test_phase!("fork_in_closed_scope_interrupts_immediately");

    let runtime = test_runtime();
    let scope = Scope::new(ExecutionStrategy::Sequential);
    runtime.run_sync(scope.close(Exit::Success(()))).unwrap();

    let program = Effect::<u32, String>::never()
        .fork_in(scope)
        .flat_map(|fiber| fiber.await_exit());
    assert_exit_interrupted!(runtime.run_sync(program).unwrap());

    test_complete!("fork_in_closed_scope_interrupts_immediately");
}

#[test]
fn joined_failure_is_reraised_in_parent() {
    init_test_logging();
    test_phase!("joined_failure_is_reraised_in_parent");

    let runtime = test_runtime();
    let program = Effect::<u32, String>::fail("child".into())
        .fork()
        .widen::<String>()
        .flat_map(|fiber| fiber.join());

    assert_eq!(runtime.run_exit(program), Exit::fail("child".to_string()));

    test_complete!("joined_failure_is_reraised_in_parent");
}

#[test]
fn children_lists_live_children_only() {
    init_test_logging();
    test_phase!("children_lists_live_children_only");

    let runtime = test_runtime();
    let program = Effect::<u32, String>::never()
        .fork()
        .zip(Effect::<u32, String>::succeed(1).fork())
        .flat_map(|(running, done)| {
            let running_id = running.id().clone();
            done.await_exit()
                .zip_right(UIO::<Vec<effectum::FiberId>>::children())
                .map(move |children| (running_id.clone(), children))
        });

    let (running, children) = runtime.run_sync(program).unwrap();
    assert_eq!(children, vec![running]);

    test_complete!("children_lists_live_children_only");
}

#[test]
fn many_forks_all_complete() {
    init_test_logging();
    test_phase!("many_forks_all_complete");

    let runtime = test_runtime();
    let counter = Arc::new(AtomicUsize::new(0));
    let task = {
        let counter = Arc::clone(&counter);
        Effect::<(), String>::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    let program = Effect::for_each(0..500, move |_: i32| task.clone().fork().widen::<String>())
        .flat_map(|fibers| Effect::for_each(fibers, |fiber: Fiber<(), String>| fiber.join()));

    runtime.run_sync(program).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 500);
    assert_eq!(runtime.metrics().fibers_live, 0);

    test_complete!("many_forks_all_complete");
}

/// A random tree of forks: some joined, some blocked forever, some left to
/// finish on their own.
fn random_tree(rng: &mut fastrand::Rng, depth: u32) -> Effect<u32, String> {
    let width = if depth == 0 { 0 } else { rng.usize(0..4) };
    let mut program = Effect::<u32, String>::succeed(1);
    for _ in 0..width {
        let child = random_tree(rng, depth - 1);
        program = match rng.u8(0..3) {
            0 => program.zip_with(
                child.fork().widen::<String>().flat_map(|fiber| fiber.join()),
                |a, b| a + b,
            ),
            1 => program.zip_left(Effect::<u32, String>::never().fork().widen::<String>()),
            _ => program.zip_left(child.fork().widen::<String>()),
        };
    }
    program
}

#[test]
fn random_fork_trees_stay_structured() {
    init_test_logging();
    test_phase!("random_fork_trees_stay_structured");

    let mut rng = fastrand::Rng::with_seed(0x5EED);
    for round in 0..20 {
        let (runtime, tracker) = tracked_runtime();
        let exit = runtime.run_exit(random_tree(&mut rng, 3));
        assert!(exit.is_success(), "round {round}: {exit:?}");
        assert_eq!(tracker.live_count(), 0, "round {round}");
        tracker.check_structured().unwrap();
    }

    test_complete!("random_fork_trees_stay_structured");
}
