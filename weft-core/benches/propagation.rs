//! Benchmarks for change propagation through derived states
//!
//! Run with: cargo bench -p weft-core

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use weft_core::{Effect, Expr, Family, Value, derived, effect, state};

/// A source state followed by `depth` derived states, each adding one.
fn make_chain(depth: usize) -> (Family, Family) {
    let source = state(0);
    let mut tail = source.clone();
    for _ in 0..depth {
        let previous = tail.clone();
        tail = derived(move || Ok(Value::from(previous.value()?.as_f64().unwrap_or(0.0) + 1.0)));
    }
    (source, tail)
}

fn bench_chain_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain_write");

    for depth in [1, 10, 50, 200] {
        let (source, tail) = make_chain(depth);
        tail.value().ok();
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::new("set_value", depth), &depth, |b, _| {
            b.iter(|| {
                next += 1;
                source.set_value(next).ok();
                black_box(tail.peek().ok())
            })
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_out");

    for width in [10, 100, 1000] {
        let source = state(0);
        let readers: Vec<Family> = (0..width)
            .map(|_| {
                let source = source.clone();
                derived(move || source.value())
            })
            .collect();
        for reader in &readers {
            reader.value().ok();
        }
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::new("set_value", width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                black_box(source.set_value(next).ok())
            })
        });
    }

    group.finish();
}

fn bench_effect_call(c: &mut Criterion) {
    let count = state(0);
    let add: Effect = effect(Expr::update(&count, |current, _| {
        Ok(Value::from(current.as_f64().unwrap_or(0.0) + 1.0))
    }));

    c.bench_function("propagation/effect_call", |b| {
        b.iter(|| black_box(add.call(()).ok()))
    });
}

criterion_group!(benches, bench_chain_write, bench_fan_out, bench_effect_call);

criterion_main!(benches);
