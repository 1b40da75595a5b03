//! Secondary index and collection benchmarks
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench index_rebuild
//! cargo bench --bench index_rebuild -- "index/rebuild"
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use strata_remote::core::{CollectionIdentity, Key, OverwriteCombinator, Value, ValueType};
use strata_remote::index::{FirstCharIndexer, SecondaryIndex};
use strata_remote::server::{RemoteCollection, RemoteServer, ServerConfig};
use strata_remote::storage::{
    CachingPolicy, Collection, KeyValue, MemoryCollection, MemoryCollectionFactory,
    MemoryMetaStore,
};

// =============================================================================
// Constants and Configuration
// =============================================================================

/// Primary collection sizes for rebuild scaling.
const SIZES: &[usize] = &[1_000, 10_000, 100_000];

const NAMES: &[&str] = &["alice", "bob", "carol", "dave", "erin", "frank", "grace"];

// =============================================================================
// Helper Functions
// =============================================================================

fn populated(size: usize) -> Arc<dyn Collection> {
    let primary: Arc<dyn Collection> = Arc::new(MemoryCollection::new(
        CollectionIdentity::new("users", ValueType::String, "overwrite"),
        Arc::new(OverwriteCombinator),
        CachingPolicy::default(),
    ));
    for i in 0..size {
        let name = format!("{}{}", NAMES[i % NAMES.len()], i);
        primary.write(i as Key, Value::from(name)).unwrap();
    }
    primary.flush().unwrap();
    primary
}

fn open_index(primary: &Arc<dyn Collection>) -> SecondaryIndex {
    SecondaryIndex::open(
        "users_by_initial",
        &MemoryCollectionFactory::new(),
        Arc::clone(primary),
        Arc::new(FirstCharIndexer),
        Arc::new(MemoryMetaStore::new()),
    )
    .unwrap()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/rebuild");
    for &size in SIZES {
        let primary = populated(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                // A fresh index is always stale, so the first read rebuilds
                let index = open_index(&primary);
                black_box(index.read_by_index_key(FirstCharIndexer::key_for('a')).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_fresh_lookup(c: &mut Criterion) {
    let primary = populated(10_000);
    let index = open_index(&primary);
    index.read_by_index_key(FirstCharIndexer::key_for('a')).unwrap();

    let mut group = c.benchmark_group("index/lookup");
    group.bench_function("by_index_key", |b| {
        b.iter(|| black_box(index.read_by_index_key(FirstCharIndexer::key_for('g')).unwrap()))
    });
    group.bench_function("by_example", |b| {
        let example = Value::from("george");
        b.iter(|| black_box(index.read_by_example(&example).unwrap()))
    });
    group.finish();
}

fn bench_remote_batch(c: &mut Criterion) {
    let server = RemoteServer::bind(ServerConfig::ephemeral())
        .unwrap()
        .spawn()
        .unwrap();
    let mut counts = RemoteCollection::connect(
        server.local_addr(),
        CollectionIdentity::new("counts", ValueType::Int, "sum"),
    )
    .unwrap();
    let batch: Vec<KeyValue> = (0..1_000).map(|k| (k, Value::Int(1))).collect();

    let mut group = c.benchmark_group("remote");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("write_many_1000", |b| {
        b.iter(|| counts.write_many(black_box(&batch)).unwrap())
    });
    group.bench_function("read_value", |b| {
        b.iter(|| black_box(counts.read(7).unwrap()))
    });
    group.finish();
    server.shutdown();
}

criterion_group!(benches, bench_rebuild, bench_fresh_lookup, bench_remote_batch);
criterion_main!(benches);
