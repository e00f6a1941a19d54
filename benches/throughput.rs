use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::time::Instant;

use blocksync::{
    block::{BlockPatch, CreateData},
    core::queue::{QueueConfig, SyncQueue},
    op::Operation,
    transport::BatchSyncResponse,
    types::BlockId,
};

fn edit(id: &str, i: u64) -> Operation {
    Operation::update(
        BlockId::from(id),
        BlockPatch {
            content: Some(format!("rev {i}")),
            position: Some(i as i64),
            ..BlockPatch::default()
        },
    )
}

fn unbounded() -> QueueConfig {
    QueueConfig {
        max_pending_ops: 0,
        ..QueueConfig::default()
    }
}

fn bench_distinct_enqueues(c: &mut Criterion) {
    c.bench_function("enqueue_distinct_50k", |b| {
        b.iter(|| {
            let mut queue = SyncQueue::new(unbounded());
            for i in 0..50_000u64 {
                let _ = queue.enqueue(edit(&format!("b-{i}"), i)).expect("enqueue");
            }
        });
    });
}

fn bench_coalescing(c: &mut Criterion) {
    c.bench_function("coalesce_keystrokes_10k", |b| {
        b.iter(|| {
            let mut queue = SyncQueue::new(unbounded());
            let id = BlockId::temporary();
            let _ = queue
                .enqueue(Operation::create(
                    id.clone(),
                    CreateData {
                        page_id: "page-1".to_string(),
                        block_type: "text".to_string(),
                        ..CreateData::default()
                    },
                ))
                .expect("create");
            for i in 0..10_000u64 {
                let _ = queue.enqueue(edit(id.as_str(), i)).expect("enqueue");
            }
        });
    });
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_acked_deletes");
    for n in [100usize, 1_000usize, 10_000usize] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut queue = SyncQueue::new(unbounded());
                for i in 0..n {
                    let _ = queue
                        .enqueue(Operation::delete(BlockId::from(format!("b-{i}"))))
                        .expect("enqueue");
                }
                let now = Instant::now();
                while let Some(request) = queue.begin_flush(now).request {
                    let _ = queue.complete_flush(
                        Ok(BatchSyncResponse {
                            deletes: request.deletes,
                            ..BatchSyncResponse::default()
                        }),
                        now,
                    );
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_distinct_enqueues, bench_coalescing, bench_drain);
criterion_main!(benches);
