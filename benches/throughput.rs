use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;

use offqueue::{
    config::QueueConfig,
    core::queue::QueueEngine,
    op::{NewOperation, OperationRecord},
    persist::{memory::MemoryStore, sqlite::SqliteQueueStore},
    runtime::{executor::ExecutorError, handle::OfflineQueue},
    types::OpKind,
};

fn op(i: u64) -> NewOperation {
    NewOperation::new(OpKind::Create, "meal_record", json!({ "n": i, "kcal": 500 }))
}

fn bench_adds(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_add");
    for n in [100u64, 1000u64] {
        group.bench_with_input(BenchmarkId::new("memory", n), &n, |b, &n| {
            b.iter(|| {
                let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
                for i in 0..n {
                    let _ = engine.add(op(i)).expect("add");
                }
            });
        });
    }
    group.finish();

    c.bench_function("engine_add_sqlite_200", |b| {
        b.iter(|| {
            let store = SqliteQueueStore::open_in_memory().expect("open");
            let mut engine = QueueEngine::open(store, QueueConfig::default());
            for i in 0..200u64 {
                let _ = engine.add(op(i)).expect("add");
            }
        });
    });
}

fn bench_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let ok = |_op: OperationRecord| async { Ok::<(), ExecutorError>(()) };

    c.bench_function("drain_500", |b| {
        b.iter(|| {
            let queue = OfflineQueue::open(MemoryStore::new(), QueueConfig::default());
            for i in 0..500u64 {
                let _ = queue.add(op(i)).expect("add");
            }
            rt.block_on(queue.process(&ok)).expect("drain");
        });
    });
}

criterion_group!(benches, bench_adds, bench_drain);
criterion_main!(benches);
