//! 큐 put/take 성능 벤치마크
//!
//! 단건 put+take, 배치 put, 축출 순서 take_lowest 비교

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dbq_core::{
    AccessorConfig, PersistentQueue, PoolConfig, QueueConfig, QueueEntry, SqlitePool, StorageId,
    open_storage,
};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

/// 벤치마크용 큐 생성 (용량 제한 없음)
fn setup_queue(postfix: &str) -> (TempDir, PersistentQueue) {
    let dir = tempdir().unwrap();
    let pool = SqlitePool::open(dir.path().join("bench.db"), PoolConfig::default()).unwrap();
    let storage = open_storage(Arc::new(pool), AccessorConfig::default()).unwrap();
    let config = QueueConfig::new(StorageId::new("bench", "callback", postfix))
        .with_max_entries(-1)
        .with_max_bytes(-1);
    let queue = PersistentQueue::new(storage, config).unwrap();
    (dir, queue)
}

fn payload(i: usize) -> QueueEntry {
    QueueEntry::new((i % 10) as i32, "MSG_RAW", vec![0u8; 256])
}

fn bench_put_take_single(c: &mut Criterion) {
    c.bench_function("put_take_single", |b| {
        let (_dir, queue) = setup_queue("single");
        let mut i = 0;
        b.iter(|| {
            queue.put(&payload(i), false).unwrap();
            black_box(queue.take().unwrap());
            i += 1;
        });
    });
}

fn bench_put_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_batch");
    for size in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (_dir, queue) = setup_queue("batch");
            b.iter(|| {
                let batch: Vec<QueueEntry> = (0..size).map(payload).collect();
                queue.put_all(&batch, false).unwrap();
                black_box(queue.take_n(size as i64, -1).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_take_lowest(c: &mut Criterion) {
    c.bench_function("take_lowest_10_of_1000", |b| {
        let (_dir, queue) = setup_queue("lowest");
        let seed: Vec<QueueEntry> = (0..1000).map(payload).collect();
        queue.put_all(&seed, false).unwrap();
        b.iter(|| {
            let taken = queue.take_lowest(10, -1, None, false).unwrap();
            let refill: Vec<QueueEntry> = (0..taken.len()).map(payload).collect();
            queue.put_all(&refill, false).unwrap();
            black_box(taken);
        });
    });
}

criterion_group!(
    benches,
    bench_put_take_single,
    bench_put_batch,
    bench_take_lowest
);
criterion_main!(benches);
