//! Fiber-local values, the service context and fiber-aware logging.

mod common;
use common::*;

use effectum::{Context, Effect, Exit, FiberRef, LogLevel, MemorySink, UIO};
use std::sync::Arc;

#[test]
fn child_inherits_a_copy_and_join_merges_back() {
    init_test_logging();
    test_phase!("child_inherits_a_copy_and_join_merges_back");

    let runtime = test_runtime();
    let counter = FiberRef::new(1_u32);
    let child = {
        let counter = counter.clone();
        counter
            .get::<String>()
            .flat_map(move |seen| counter.set(seen + 10).as_value(seen))
    };
    let program = {
        let counter = counter.clone();
        child
            .fork()
            .widen::<String>()
            .flat_map(|fiber| fiber.join())
            .zip(counter.get())
    };

    assert_eq!(runtime.run_exit(program), Exit::Success((1, 11)));

    test_complete!("child_inherits_a_copy_and_join_merges_back");
}

#[test]
fn unjoined_child_changes_stay_local() {
    init_test_logging();
    test_phase!("unjoined_child_changes_stay_local");

    let runtime = test_runtime();
    let name = FiberRef::new(String::from("parent"));
    let program = {
        let name = name.clone();
        name.set::<String>("child".into())
            .fork()
            .widen::<String>()
            .flat_map(|fiber| fiber.await_exit().widen())
            .zip_right(name.get())
    };

    assert_eq!(runtime.run_exit(program), Exit::Success("parent".to_string()));

    test_complete!("unjoined_child_changes_stay_local");
}

#[test]
fn custom_fork_and_join_policies() {
    init_test_logging();
    test_phase!("custom_fork_and_join_policies");

    let runtime = test_runtime();
    // Children start from zero and their totals are added back on join.
    let total = FiberRef::with_fork_join(0_u32, |_| 0, |parent, child| parent + child);
    let add = |n: u32| {
        let total = total.clone();
        total
            .get::<String>()
            .flat_map(move |seen| total.set(seen + n).as_value(seen))
    };
    let join_child = |child: Effect<u32, String>| {
        child.fork().widen::<String>().flat_map(|fiber| fiber.join())
    };
    let program = total
        .set::<String>(5)
        .zip_right(join_child(add(3)))
        .zip(join_child(add(4)))
        .zip(total.get());

    assert_eq!(runtime.run_exit(program), Exit::Success(((0, 0), 12)));

    test_complete!("custom_fork_and_join_policies");
}

#[test]
fn locally_restores_after_failure() {
    init_test_logging();
    test_phase!("locally_restores_after_failure");

    let runtime = test_runtime();
    let mode = FiberRef::new("normal");
    let failing = mode
        .get::<String>()
        .flat_map(|m| Effect::<(), String>::fail(format!("failed in {m}")));
    let program = mode
        .locally("special", failing)
        .either()
        .widen::<String>()
        .zip(mode.get());

    let (outcome, after) = runtime.run_sync(program).unwrap();
    assert_eq!(outcome, Err("failed in special".to_string()));
    assert_eq!(after, "normal");

    test_complete!("locally_restores_after_failure");
}

#[test]
fn host_supplied_refs_seed_the_root_fiber() {
    init_test_logging();
    test_phase!("host_supplied_refs_seed_the_root_fiber");

    let runtime = test_runtime();
    let tenant = FiberRef::new(0_u64);
    let refs = runtime.initial_fiber_refs().updated(&tenant, 42);
    let fiber = runtime.run_fork_with_refs(tenant.get::<String>(), refs);
    assert_eq!(fiber.wait(), Exit::Success(42));

    test_complete!("host_supplied_refs_seed_the_root_fiber");
}

#[test]
fn get_and_set_fiber_refs_round_the_whole_set() {
    init_test_logging();
    test_phase!("get_and_set_fiber_refs_round_the_whole_set");

    let runtime = test_runtime();
    let a = FiberRef::new(1_i32);
    let program = {
        let a = a.clone();
        UIO::<effectum::FiberRefs>::get_fiber_refs().flat_map(move |saved| {
            let a = a.clone();
            a.set(5)
                .zip_right(UIO::set_fiber_refs(saved))
                .zip_right(a.get())
        })
    };

    assert_eq!(runtime.run_exit(program), Exit::Success(1));

    test_complete!("get_and_set_fiber_refs_round_the_whole_set");
}

#[derive(Clone, Debug, PartialEq)]
struct Config {
    greeting: &'static str,
}

#[test]
fn services_are_provided_and_scoped() {
    init_test_logging();
    test_phase!("services_are_provided_and_scoped");

    let runtime = test_runtime();
    let greet = Effect::<Config, String>::service().map(|c| c.greeting);
    let program = greet
        .clone()
        .provide_service(Config { greeting: "hello" })
        .zip(Effect::<Option<Config>, String>::service_option());

    assert_eq!(runtime.run_exit(program), Exit::Success(("hello", None)));
    assert!(runtime.run_exit(greet).cause().is_some_and(|c| c.is_die()));

    test_complete!("services_are_provided_and_scoped");
}

#[test]
fn forked_fibers_see_the_parent_context() {
    init_test_logging();
    test_phase!("forked_fibers_see_the_parent_context");

    let runtime = test_runtime();
    let context = Context::empty().with(Config { greeting: "hi" }).with(7_u8);
    let program = Effect::<Config, String>::service()
        .zip(Effect::<u8, String>::service())
        .fork()
        .widen::<String>()
        .flat_map(|f| f.join())
        .provide_context(context);

    assert_eq!(
        runtime.run_exit(program),
        Exit::Success((Config { greeting: "hi" }, 7))
    );

    test_complete!("forked_fibers_see_the_parent_context");
}

#[test]
fn logs_carry_fiber_and_annotations() {
    init_test_logging();
    test_phase!("logs_carry_fiber_and_annotations");

    let sink = Arc::new(MemorySink::new());
    let runtime = test_runtime_builder()
        .log_sink(sink.clone())
        .build()
        .expect("runtime");
    let program = Effect::<(), String>::log_info("starting")
        .zip_right(Effect::log_debug("hidden"))
        .zip_right(Effect::log_warn("careful"))
        .annotate_logs("request", "r-1")
        .zip_right(Effect::<(), String>::log_error("plain"));

    runtime.run_sync(program).unwrap();
    let records = sink.records();
    let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["starting", "careful", "plain"]);
    assert_eq!(records[0].annotations.get("request"), Some("r-1"));
    assert_eq!(records[1].level, LogLevel::Warn);
    assert!(records[2].annotations.is_empty());
    assert!(records.iter().all(|r| r.fiber == records[0].fiber));

    test_complete!("logs_carry_fiber_and_annotations");
}

#[test]
fn min_log_level_is_configurable() {
    init_test_logging();
    test_phase!("min_log_level_is_configurable");

    let sink = Arc::new(MemorySink::new());
    let runtime = test_runtime_builder()
        .log_sink(sink.clone())
        .min_log_level(LogLevel::Warn)
        .build()
        .expect("runtime");
    let program = Effect::<(), String>::log_info("dropped")
        .zip_right(Effect::log_debug("kept").with_min_log_level(LogLevel::Debug))
        .zip_right(Effect::log_error("kept too"));

    runtime.run_sync(program).unwrap();
    let messages: Vec<String> = sink.records().into_iter().map(|r| r.message).collect();
    assert_eq!(messages, vec!["kept", "kept too"]);

    test_complete!("min_log_level_is_configurable");
}
