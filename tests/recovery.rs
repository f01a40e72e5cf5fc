//! Error recovery combinators and schedule-driven retry/repeat.

mod common;
use common::*;

use effectum::schedule::{both, exponential, recurs, spaced};
use effectum::{Cause, Defect, Effect, Exit, UIO};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn flaky(failures_before_success: u32, attempts: &Arc<AtomicU32>) -> Effect<u32, String> {
    let attempts = Arc::clone(attempts);
    Effect::suspend(move || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < failures_before_success {
            Effect::fail(format!("attempt {attempt}"))
        } else {
            Effect::succeed(attempt)
        }
    })
}

#[test]
fn catch_all_recovers_typed_failures_only() {
    init_test_logging();
    test_phase!("catch_all_recovers_typed_failures_only");

    let runtime = test_runtime();
    let recovered = Effect::<u32, String>::fail("bad".into())
        .catch_all(|e| Effect::<u32, String>::succeed(u32::try_from(e.len()).unwrap_or(0)));
    assert_eq!(runtime.run_exit(recovered), Exit::Success(3));

    let defect = Effect::<u32, String>::die_message("boom")
        .catch_all(|_| Effect::<u32, String>::succeed(0));
    assert!(runtime.run_exit(defect).cause().is_some_and(Cause::is_die));

    test_complete!("catch_all_recovers_typed_failures_only");
}

#[test]
fn catch_some_leaves_unmatched_failures() {
    init_test_logging();
    test_phase!("catch_some_leaves_unmatched_failures");

    let runtime = test_runtime();
    let handler = |e: &String| (e == "retryable").then(|| Effect::succeed(1));

    let matched = Effect::<u32, String>::fail("retryable".into()).catch_some(handler);
    assert_eq!(runtime.run_exit(matched), Exit::Success(1));

    let unmatched = Effect::<u32, String>::fail("fatal".into()).catch_some(handler);
    assert_eq!(runtime.run_exit(unmatched), Exit::fail("fatal".to_string()));

    test_complete!("catch_some_leaves_unmatched_failures");
}

#[test]
fn catch_all_defect_sees_panics() {
    init_test_logging();
    test_phase!("catch_all_defect_sees_panics");

    let runtime = test_runtime();
    let program = Effect::<u32, String>::sync(|| panic!("exploded"))
        .catch_all_defect(|defect| Effect::succeed(u32::try_from(defect.message().len()).unwrap_or(0)));
    assert_eq!(runtime.run_exit(program), Exit::Success(8));

    let typed = Effect::<u32, String>::fail("typed".into()).catch_all_defect(|_| Effect::succeed(0));
    assert_eq!(runtime.run_exit(typed), Exit::fail("typed".to_string()));

    test_complete!("catch_all_defect_sees_panics");
}

#[test]
fn fold_either_and_exit_observe_outcomes() {
    init_test_logging();
    test_phase!("fold_either_and_exit_observe_outcomes");

    let runtime = test_runtime();
    let folded = Effect::<u32, String>::fail("x".into()).fold(|e| e.len(), |v| v as usize);
    assert_eq!(runtime.run_exit(folded), Exit::Success(1));

    let either = Effect::<u32, String>::succeed(2).either();
    assert_eq!(runtime.run_exit(either), Exit::Success(Ok(2)));

    let exit = Effect::<u32, String>::die(Defect::new("d")).exit();
    let observed = runtime.run_sync(exit).unwrap();
    assert_eq!(observed.cause().map(|c| c.defects().len()), Some(1));

    test_complete!("fold_either_and_exit_observe_outcomes");
}

#[test]
fn sandbox_and_unsandbox_round_the_cause() {
    init_test_logging();
    test_phase!("sandbox_and_unsandbox_round_the_cause");

    let runtime = test_runtime();
    let failing = Effect::<u32, String>::fail("inner".into());

    let sandboxed = failing.clone().sandbox();
    let exit = runtime.run_exit(sandboxed);
    let wrapped = exit.cause().and_then(Cause::failure_option).cloned();
    assert_eq!(wrapped, Some(Cause::fail("inner".to_string())));

    let round = failing.sandbox().unsandbox();
    assert_eq!(runtime.run_exit(round), Exit::fail("inner".to_string()));

    test_complete!("sandbox_and_unsandbox_round_the_cause");
}

#[test]
fn or_die_and_map_error_reshape_failures() {
    init_test_logging();
    test_phase!("or_die_and_map_error_reshape_failures");

    let runtime = test_runtime();
    let died = Effect::<u32, String>::fail("oops".into()).or_die();
    let cause = runtime.run_exit(died).cause().cloned().expect("must die");
    assert!(cause.is_die() && !cause.is_failure());
    assert!(cause.defects()[0].message().contains("oops"));

    let mapped = Effect::<u32, String>::fail("abc".into()).map_error(|e| e.len());
    assert_eq!(runtime.run_exit(mapped), Exit::fail(3));

    test_complete!("or_die_and_map_error_reshape_failures");
}

#[test]
fn tap_error_and_on_error_keep_the_failure() {
    init_test_logging();
    test_phase!("tap_error_and_on_error_keep_the_failure");

    let runtime = test_runtime();
    let log = EventLog::new();
    let program = Effect::<u32, String>::fail("kept".into())
        .tap_error({
            let log = log.clone();
            move |e| log.record(&format!("tap {e}")).widen::<String>()
        })
        .on_error({
            let log = log.clone();
            move |cause| log.record(&format!("cleanup {}", cause.failures().len()))
        });

    assert_eq!(runtime.run_exit(program), Exit::fail("kept".to_string()));
    assert_eq!(log.snapshot(), vec!["tap kept", "cleanup 1"]);

    test_complete!("tap_error_and_on_error_keep_the_failure");
}

#[test]
fn catch_interrupt_recovers_a_joined_interruption() {
    init_test_logging();
    test_phase!("catch_interrupt_recovers_a_joined_interruption");

    let runtime = test_runtime();
    let program = Effect::<u32, String>::never().fork().widen::<String>().flat_map(|fiber| {
        fiber
            .interrupt_fork()
            .widen::<String>()
            .zip_right(fiber.join())
            .catch_interrupt(|ids| Effect::succeed(u32::try_from(ids.len()).unwrap_or(0)))
    });

    assert_eq!(runtime.run_exit(program), Exit::Success(1));

    test_complete!("catch_interrupt_recovers_a_joined_interruption");
}

#[test]
fn retry_stops_once_the_effect_succeeds() {
    init_test_logging();
    test_phase!("retry_stops_once_the_effect_succeeds");

    let runtime = test_runtime();
    let attempts = Arc::new(AtomicU32::new(0));
    let program = flaky(3, &attempts).retry(recurs(5));

    assert_eq!(runtime.run_exit(program), Exit::Success(3));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    test_complete!("retry_stops_once_the_effect_succeeds");
}

#[test]
fn retry_gives_up_with_last_error() {
    init_test_logging();
    test_phase!("retry_gives_up_with_last_error");

    let runtime = test_runtime();
    let attempts = Arc::new(AtomicU32::new(0));
    let program = flaky(10, &attempts).retry(recurs(2));

    assert_eq!(runtime.run_exit(program), Exit::fail("attempt 2".to_string()));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    test_complete!("retry_gives_up_with_last_error");
}

#[test]
fn retry_does_not_retry_defects() {
    init_test_logging();
    test_phase!("retry_does_not_retry_defects");

    let runtime = test_runtime();
    let attempts = Arc::new(AtomicU32::new(0));
    let program = {
        let attempts = Arc::clone(&attempts);
        Effect::<u32, String>::suspend(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Effect::die_message("broken")
        })
        .retry(recurs(5))
    };

    assert!(runtime.run_exit(program).cause().is_some_and(Cause::is_die));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    test_complete!("retry_does_not_retry_defects");
}

#[test]
fn spaced_retry_waits_on_the_virtual_clock() {
    init_test_logging();
    test_phase!("spaced_retry_waits_on_the_virtual_clock");

    let runtime = test_virtual_runtime();
    let attempts = Arc::new(AtomicU32::new(0));
    let program = flaky(2, &attempts).retry(both(recurs(5), spaced(Duration::from_secs(10))));
    let fiber = runtime.run_fork(program);

    for expected in 1..=2 {
        assert!(wait_until(SETTLE, || runtime.pending_timers() == 1));
        assert_eq!(attempts.load(Ordering::SeqCst), expected);
        assert_eq!(runtime.advance_time(Duration::from_secs(10)).unwrap(), 1);
    }
    assert_eq!(fiber.wait(), Exit::Success(2));
    assert_eq!(runtime.now().as_millis(), 20_000);

    test_complete!("spaced_retry_waits_on_the_virtual_clock");
}

#[test]
fn exponential_backoff_doubles_the_delay() {
    init_test_logging();
    test_phase!("exponential_backoff_doubles_the_delay");

    let runtime = test_virtual_runtime();
    let attempts = Arc::new(AtomicU32::new(0));
    let program = flaky(3, &attempts).retry(both(recurs(5), exponential(Duration::from_secs(1), 2.0)));
    let fiber = runtime.run_fork(program);

    for delay in [1, 2, 4] {
        assert!(wait_until(SETTLE, || runtime.pending_timers() == 1));
        assert_eq!(runtime.advance_time(Duration::from_secs(delay - 1)).unwrap(), 0);
        assert_eq!(runtime.advance_time(Duration::from_secs(1)).unwrap(), 1);
    }
    assert_eq!(fiber.wait(), Exit::Success(3));

    test_complete!("exponential_backoff_doubles_the_delay");
}

#[test]
fn repeat_counts_runs() {
    init_test_logging();
    test_phase!("repeat_counts_runs");

    let runtime = test_runtime();
    let runs = Arc::new(AtomicU32::new(0));
    let program = {
        let runs = Arc::clone(&runs);
        UIO::sync(move || runs.fetch_add(1, Ordering::SeqCst)).repeat(recurs(3))
    };

    assert_eq!(runtime.run_exit(program), Exit::Success(3));
    assert_eq!(runs.load(Ordering::SeqCst), 4);

    test_complete!("repeat_counts_runs");
}
