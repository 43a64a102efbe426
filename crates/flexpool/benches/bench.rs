use core::{convert::Infallible, hint::black_box};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use flexpool::{CancellationToken, Worker, WorkerPool};
use std::time::Instant;
use tokio::runtime::Builder;

/// Parks on its token until cancelled.
fn parked(_: &()) -> Result<impl Worker + use<>, Infallible> {
    Ok(|token: CancellationToken| async move { token.cancelled().await })
}

/// Grow then shrink by `batch` workers without waiting for them to exit.
fn bench_churn(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread().build().unwrap();
    let pool = WorkerPool::builder(parked)
        .runtime(runtime.handle().clone())
        .build();

    let mut group = c.benchmark_group("churn");
    for batch in [1_usize, 16, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_function(format!("add_reduce/{batch}"), |b| {
            b.iter(|| {
                black_box(pool.add(batch, &()).unwrap());
                black_box(pool.reduce(batch));
            });
        });
    }
    group.finish();

    runtime.block_on(pool.stop());
}

/// Time from `stop()` to every worker having returned.
fn bench_stop(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread().build().unwrap();

    let mut group = c.benchmark_group("stop");
    for workers in [16_usize, 256] {
        group.throughput(Throughput::Elements(workers as u64));
        group.bench_function(format!("drain/{workers}"), |b| {
            b.to_async(&runtime).iter_custom(|iters| async move {
                let mut total = core::time::Duration::ZERO;
                for _ in 0..iters {
                    let pool = WorkerPool::new(parked);
                    pool.add(workers, &()).unwrap();

                    let start = Instant::now();
                    pool.stop().await;
                    total += start.elapsed();
                }
                total
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_churn, bench_stop);
criterion_main!(benches);
