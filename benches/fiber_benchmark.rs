//! Fiber runtime benchmark suite for effectum.
//!
//! Benchmarks the interpreter and scheduler hot paths:
//! - Sequential `flat_map` chains of increasing length
//! - Fork/join fan-out
//! - Finalizer-heavy programs
//! - Virtual-clock timer registration and firing
//!
//! Run:
//!   cargo bench --bench fiber_benchmark

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use effectum::{Effect, Fiber, Runtime, UIO};

// =============================================================================
// HELPERS
// =============================================================================

fn runtime() -> Runtime {
    Runtime::builder()
        .worker_threads(4)
        .thread_name_prefix("effectum-bench")
        .build()
        .expect("bench runtime")
}

fn chain(len: u64) -> Effect<u64, String> {
    let mut program = Effect::succeed(0);
    for _ in 0..len {
        program = program.flat_map(|n| Effect::succeed(n + 1));
    }
    program
}

// =============================================================================
// INTERPRETER BENCHMARKS
// =============================================================================

fn bench_flat_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter/flat_map_chain");
    let rt = runtime();

    for len in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(len));
        let program = chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &program, |b, program| {
            b.iter(|| black_box(rt.run_exit(program.clone())))
        });
    }

    group.finish();
}

fn bench_ensuring_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter/ensuring");
    let rt = runtime();

    for depth in [10_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(depth));
        let mut program = Effect::<u64, String>::succeed(1);
        for _ in 0..depth {
            program = program.ensuring(UIO::unit());
        }
        group.bench_with_input(BenchmarkId::from_parameter(depth), &program, |b, program| {
            b.iter(|| black_box(rt.run_exit(program.clone())))
        });
    }

    group.finish();
}

// =============================================================================
// SCHEDULER BENCHMARKS
// =============================================================================

fn bench_fork_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/fork_join");
    let rt = runtime();

    for fibers in [10_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(fibers));
        let task = Effect::<u64, String>::succeed(1);
        let program = Effect::for_each(0..fibers, move |_: u64| task.clone().fork().widen::<String>())
            .flat_map(|handles| Effect::for_each(handles, |fiber: Fiber<u64, String>| fiber.join()))
            .map(|values| values.into_iter().sum::<u64>());
        group.bench_with_input(BenchmarkId::from_parameter(fibers), &program, |b, program| {
            b.iter(|| black_box(rt.run_exit(program.clone())))
        });
    }

    group.finish();
}

fn bench_collect_all_par(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/collect_all_par");
    let rt = runtime();

    for width in [8_u64, 64, 512] {
        group.throughput(Throughput::Elements(width));
        let program = Effect::collect_all_par((0..width).map(|_| chain(16)));
        group.bench_with_input(BenchmarkId::from_parameter(width), &program, |b, program| {
            b.iter(|| black_box(rt.run_exit(program.clone())))
        });
    }

    group.finish();
}

// =============================================================================
// TIMER BENCHMARKS
// =============================================================================

fn bench_virtual_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer/virtual_sleep");
    let rt = Runtime::builder()
        .worker_threads(2)
        .virtual_time()
        .build()
        .expect("bench runtime");

    for sleepers in [16_usize, 256] {
        group.throughput(Throughput::Elements(sleepers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sleepers), &sleepers, |b, &n| {
            b.iter(|| {
                let program = Effect::collect_all_par(
                    (0..n).map(|_| Effect::<(), String>::sleep(Duration::from_millis(1))),
                );
                let fiber = rt.run_fork(program);
                while !fiber.is_done() {
                    if rt.pending_timers() == n {
                        rt.advance_time(Duration::from_millis(1)).expect("virtual clock");
                    } else {
                        std::thread::yield_now();
                    }
                }
                black_box(fiber.wait())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_flat_map_chain,
    bench_ensuring_stack,
    bench_fork_join,
    bench_collect_all_par,
    bench_virtual_timers
);
criterion_main!(benches);
