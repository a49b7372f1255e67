//! Worker pool throughput benchmarks.

use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use coordpool::config::WorkerPoolConfig;
use coordpool::core::{TaskContext, WorkerExecutor, WorkerPool};

#[derive(Clone)]
struct MulExecutor;

#[async_trait]
impl WorkerExecutor<u64, u64> for MulExecutor {
    async fn execute(&self, payload: u64, _ctx: TaskContext) -> u64 {
        payload.wrapping_mul(31)
    }
}

fn pool(capacity: usize) -> WorkerPool<u64, u64, MulExecutor> {
    let config = WorkerPoolConfig::new()
        .with_capacity(capacity)
        .with_max_queue_depth(1024);
    WorkerPool::new(config, MulExecutor).expect("pool construction")
}

fn bench_submit_retrieve(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_retrieve");
    for capacity in [1usize, 4] {
        let pool = pool(capacity);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, _| {
                b.iter(|| {
                    let ticket = pool.submit(7).expect("submit");
                    pool.retrieve(&ticket, Duration::from_secs(5)).expect("retrieve")
                });
            },
        );
        pool.close();
        pool.join();
    }
    group.finish();
}

fn bench_map_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_batch");
    for batch in [16u64, 256] {
        let pool = pool(4);
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let inputs: Vec<u64> = (0..batch).collect();
                pool.map(inputs, Duration::from_secs(30)).expect("map")
            });
        });
        pool.close();
        pool.join();
    }
    group.finish();
}

criterion_group!(benches, bench_submit_retrieve, bench_map_batch);
criterion_main!(benches);
