//! Deeply nested programs run without growing the native stack.

mod common;
use common::*;

use effectum::{Effect, Exit, UIO};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEPTH: u64 = 100_000;

#[test]
fn long_flat_map_chain() {
    init_test_logging();
    test_phase!("long_flat_map_chain");

    let runtime = test_runtime();
    let mut program = Effect::<u64, String>::succeed(0);
    for _ in 0..DEPTH {
        program = program.flat_map(|n| Effect::succeed(n + 1));
    }
    assert_eq!(runtime.run_exit(program), Exit::Success(DEPTH));

    test_complete!("long_flat_map_chain");
}

#[test]
fn deeply_left_nested_maps() {
    init_test_logging();
    test_phase!("deeply_left_nested_maps");

    let runtime = test_runtime();
    let mut program = UIO::<u64>::succeed(0);
    for _ in 0..DEPTH {
        program = program.map(|n| n + 1);
    }
    assert_eq!(runtime.run_exit(program), Exit::Success(DEPTH));

    test_complete!("deeply_left_nested_maps");
}

#[test]
fn recursive_loop_through_suspend() {
    init_test_logging();
    test_phase!("recursive_loop_through_suspend");

    fn count_down(n: u64) -> Effect<u64, String> {
        if n == 0 {
            Effect::succeed(0)
        } else {
            Effect::suspend(move || count_down(n - 1)).map(|m| m + 1)
        }
    }

    let runtime = test_runtime();
    assert_eq!(runtime.run_exit(count_down(DEPTH)), Exit::Success(DEPTH));

    test_complete!("recursive_loop_through_suspend");
}

#[test]
fn iterate_many_steps() {
    init_test_logging();
    test_phase!("iterate_many_steps");

    let runtime = test_runtime();
    let program = Effect::<u64, String>::iterate(0, |n| *n < DEPTH * 5, |n| Effect::succeed(n + 1));
    assert_eq!(runtime.run_exit(program), Exit::Success(DEPTH * 5));

    test_complete!("iterate_many_steps");
}

#[test]
fn deeply_nested_finalizers_all_run() {
    init_test_logging();
    test_phase!("deeply_nested_finalizers_all_run");

    let runtime = test_runtime();
    let ran = Arc::new(AtomicUsize::new(0));
    let mut program = Effect::<u64, String>::fail("deep".into());
    for _ in 0..10_000 {
        let ran = Arc::clone(&ran);
        program = program.ensuring(UIO::sync(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert_eq!(runtime.run_exit(program), Exit::fail("deep".to_string()));
    assert_eq!(ran.load(Ordering::SeqCst), 10_000);

    test_complete!("deeply_nested_finalizers_all_run");
}

#[test]
fn long_failure_unwinds_through_handlers() {
    init_test_logging();
    test_phase!("long_failure_unwinds_through_handlers");

    let runtime = test_runtime();
    let mut program = Effect::<u64, String>::fail("bottom".into());
    for _ in 0..DEPTH {
        program = program.map(|n| n + 1);
    }
    let recovered = program.catch_all(|e| Effect::<u64, String>::succeed(e.len() as u64));
    assert_eq!(runtime.run_exit(recovered), Exit::Success(6));

    test_complete!("long_failure_unwinds_through_handlers");
}

#[test]
fn collect_all_over_many_effects() {
    init_test_logging();
    test_phase!("collect_all_over_many_effects");

    let runtime = test_runtime();
    let effects = (0..DEPTH).map(Effect::<u64, String>::succeed);
    let exit = runtime.run_exit(Effect::collect_all(effects).map(|v| v.iter().sum::<u64>()));
    assert_eq!(exit, Exit::Success(DEPTH * (DEPTH - 1) / 2));

    test_complete!("collect_all_over_many_effects");
}
