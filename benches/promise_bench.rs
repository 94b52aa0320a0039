// Futures/promises microbenchmarks: promise construction, satisfaction
// (with and without pending continuations), and `then`-chain throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use concur_toolkit::futures::{make_future, Promise};

fn bench_promise_construction(c: &mut Criterion) {
    c.bench_function("promise_new", |b| {
        b.iter(|| black_box(Promise::<i32>::new()));
    });
}

fn bench_set_value_no_continuations(c: &mut Criterion) {
    c.bench_function("promise_set_value_no_continuations", |b| {
        b.iter_batched(
            Promise::<i32>::new,
            |promise| {
                promise.set_value(42).unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_set_value_with_continuations(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise_set_value_with_continuations");
    for n in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let promise = Promise::<i32>::new();
                    let future = promise.future();
                    let downstream: Vec<_> = (0..n).map(|_| future.then(|f| f.get().unwrap() + 1)).collect();
                    (promise, downstream)
                },
                |(promise, downstream)| {
                    promise.set_value(1).unwrap();
                    black_box(downstream);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_then_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise_then_chain_depth");
    for depth in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut future = make_future(0i32);
                for _ in 0..depth {
                    future = future.then(|f| f.get().unwrap() + 1);
                }
                black_box(future.get().unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_promise_construction,
    bench_set_value_no_continuations,
    bench_set_value_with_continuations,
    bench_then_chain
);
criterion_main!(benches);
