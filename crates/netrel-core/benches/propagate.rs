use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use netrel_core::propagate;
use netrel_test::{fan_in_join, layered_diamond_chain};

fn bench_layered_diamond_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("layered_diamond_chain");
    for depth in [1usize, 2, 4, 8, 12] {
        let graph = layered_diamond_chain(depth, 0.9);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &graph, |b, graph| {
            b.iter(|| propagate(graph).unwrap());
        });
    }
    group.finish();
}

fn bench_fan_in_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in_join");
    for width in [2usize, 4, 8, 16] {
        let graph = fan_in_join(width, 0.9);
        group.bench_with_input(BenchmarkId::from_parameter(width), &graph, |b, graph| {
            b.iter(|| propagate(graph).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_layered_diamond_chain, bench_fan_in_join);
criterion_main!(benches);
