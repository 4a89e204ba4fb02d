// Benchmarks for contender ranking
// Measures sibling filtering, rank lookup and a full uncontended lock cycle

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use zoolock_client::lock::admission;
use zoolock_client::lock::ranking;
use zoolock_client::{LockDirectory, LockOptions, MemoryStore};

fn listing(size: u64) -> Vec<String> {
    let mut children: Vec<String> = (0..size).map(|i| format!("hello{:010}", i)).collect();
    // Unrelated resources sharing the parent
    children.extend((0..size / 4).map(|i| format!("hello2{:010}", i)));
    children.extend((0..size / 4).map(|i| format!("other{:010}", i)));
    children.reverse();
    children
}

fn bench_contenders(c: &mut Criterion) {
    let mut group = c.benchmark_group("contenders");
    for size in [10u64, 1_000, 10_000] {
        let children = listing(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &children, |b, children| {
            b.iter(|| ranking::contenders(black_box(children), black_box("hello")))
        });
    }
    group.finish();
}

fn bench_rank_and_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_and_admission");
    for size in [10u64, 1_000, 10_000] {
        let siblings = ranking::contenders(&listing(size), "hello");
        let own = size / 2;
        group.bench_with_input(BenchmarkId::from_parameter(size), &siblings, |b, siblings| {
            b.iter(|| {
                let ranking = ranking::rank(black_box(siblings), black_box(own));
                let admission = admission::evaluate(siblings, own, Some(5));
                (ranking, admission)
            })
        });
    }
    group.finish();
}

fn bench_uncontended_lock(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let client = LockDirectory::new(Arc::new(MemoryStore::new()))
        .set_dir("/bench")
        .unwrap();

    c.bench_function("uncontended_lock_release", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = client.lock("/hello", LockOptions::new()).await.unwrap();
            handle.release().await.unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_contenders,
    bench_rank_and_admission,
    bench_uncontended_lock
);
criterion_main!(benches);
