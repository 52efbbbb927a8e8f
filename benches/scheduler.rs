//! Scheduler benchmarks
//!
//! Measures visibility tick cost at various observer x observable counts.
//!
//! Run with: cargo bench --bench scheduler

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use aoi_visibility_server::config::{DemoConfig, TierPeriods, VisibilityConfig};
use aoi_visibility_server::demo::{CountingSink, DemoWorld};

fn demo(observers: usize, observables: usize) -> DemoConfig {
    DemoConfig {
        observers,
        observables,
        terrain_shapes: 200,
        world_extent: 500.0,
        step: 0.5,
    }
}

/// Steady-state tick with the default staggered periods
fn bench_amortized_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("amortized_tick");
    group.sample_size(50);

    for (observers, observables) in [(16, 500), (64, 1000), (128, 2000), (256, 4000)] {
        let (world, mut scheduler) =
            DemoWorld::build(demo(observers, observables), VisibilityConfig::default(), 42)
                .expect("demo world");
        let mut sink = CountingSink::default();

        group.throughput(Throughput::Elements((observers * observables) as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{}_observers", observers), observables),
            &observables,
            |b, _| {
                b.iter(|| {
                    black_box(scheduler.tick(world.transforms(), &mut sink).expect("tick"));
                })
            },
        );
    }
    group.finish();
}

/// Every pair due every tick: the cost staggering saves
fn bench_worst_case_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("worst_case_tick");
    group.sample_size(20);

    for (observers, observables) in [(16, 500), (64, 1000), (128, 2000)] {
        let config = VisibilityConfig {
            periods: TierPeriods::uniform(1),
            ..VisibilityConfig::default()
        };
        let (world, mut scheduler) =
            DemoWorld::build(demo(observers, observables), config, 42).expect("demo world");
        let mut sink = CountingSink::default();

        group.throughput(Throughput::Elements((observers * observables) as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{}_observers", observers), observables),
            &observables,
            |b, _| {
                b.iter(|| {
                    black_box(scheduler.tick(world.transforms(), &mut sink).expect("tick"));
                })
            },
        );
    }
    group.finish();
}

/// Moving population, as the server loop runs it
fn bench_moving_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("moving_tick");
    group.sample_size(30);

    for observers in [32, 128] {
        let (mut world, mut scheduler) =
            DemoWorld::build(demo(observers, 2000), VisibilityConfig::default(), 7).expect("demo world");
        let mut sink = CountingSink::default();

        group.bench_with_input(BenchmarkId::new("random_walk", observers), &observers, |b, _| {
            b.iter(|| {
                world.step();
                black_box(scheduler.tick(world.transforms(), &mut sink).expect("tick"));
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_amortized_tick, bench_worst_case_tick, bench_moving_tick);

criterion_main!(benches);
