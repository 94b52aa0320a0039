// Hazard-pointer manager microbenchmarks: guard acquisition, the
// publish-fence-validate sequence readers actually pay for on every access,
// and retire-path throughput (which periodically triggers Scan/HelpScan).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use concur_toolkit::concurrent::HazardPointerManager;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

fn bench_guard_acquire(c: &mut Criterion) {
    let manager = HazardPointerManager::new(4);
    c.bench_function("hazard_guard_acquire", |b| {
        b.iter(|| black_box(manager.guard(0).unwrap()));
    });
}

fn bench_publish_and_validate(c: &mut Criterion) {
    let manager = HazardPointerManager::new(4);
    let value = Box::into_raw(Box::new(AtomicI32::new(0)));
    c.bench_function("hazard_publish_and_validate", |b| {
        let guard = manager.guard(0).unwrap();
        b.iter(|| {
            guard.publish(value);
            black_box(unsafe { (*value).load(Ordering::Relaxed) });
        });
    });
    drop(unsafe { Box::from_raw(value) });
}

fn bench_retire_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("hazard_retire");
    group.bench_function("retire_1000_boxes", |b| {
        b.iter_batched(
            || HazardPointerManager::new(4),
            |manager| {
                for _ in 0..1000 {
                    manager.retire(Box::into_raw(Box::new(0i64)));
                }
                black_box(manager.stats());
            },
            criterion::BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_concurrent_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("hazard_concurrent_publish");
    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let manager = Arc::new(HazardPointerManager::new(4));
            let value = Arc::new(std::sync::atomic::AtomicPtr::new(Box::into_raw(Box::new(
                AtomicI32::new(0),
            ))));
            b.iter(|| {
                let mut handles = Vec::with_capacity(threads);
                for _ in 0..threads {
                    let manager = manager.clone();
                    let value = value.clone();
                    handles.push(thread::spawn(move || {
                        for _ in 0..100 {
                            let guard = manager.guard(0).unwrap();
                            let p = value.load(Ordering::Acquire);
                            guard.publish(p);
                            black_box(unsafe { (*p).load(Ordering::Relaxed) });
                        }
                    }));
                }
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_guard_acquire,
    bench_publish_and_validate,
    bench_retire_throughput,
    bench_concurrent_publish
);
criterion_main!(benches);
