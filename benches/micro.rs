//! Micro-benchmarks for StrataDB core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput,
};

use stratadb::{Engine, EngineConfig, WriteOptions};
use tempfile::TempDir;

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Open a fresh database with a large memtable so flushes never interfere
/// with memtable-focused measurements.
fn open_memtable_only(dir: &std::path::Path) -> Engine {
    let config = EngineConfig {
        memtable_size_threshold: 256 * 1024 * 1024,
        sstable_count_threshold: 1_000_000,
        ..EngineConfig::default()
    };
    Engine::open(dir, config).expect("open")
}

/// Buffered (non-fsync) puts into the memtable.
///
/// **Expected behaviour:** dominated by the WAL append and the BTreeMap
/// insert; no fsync, no flush.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Bytes(
        (make_key(0).len() + VALUE_128B.len()) as u64,
    ));

    group.bench_function("async_128b", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let opts = WriteOptions { sync: false };
        let mut i = 0u64;
        b.iter(|| {
            engine
                .put(&opts, make_key(i), VALUE_128B.to_vec())
                .expect("put");
            i += 1;
        });
    });

    // Sample size is reduced because every iteration pays a real fsync.
    group.sample_size(10);
    group.bench_function("sync_128b", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let opts = WriteOptions { sync: true };
        let mut i = 0u64;
        b.iter(|| {
            engine
                .put(&opts, make_key(i), VALUE_128B.to_vec())
                .expect("put");
            i += 1;
        });
    });

    group.finish();
}

/// Point lookups served by the memtable and by sorted tables.
///
/// **Expected behaviour:** memtable hits are a map probe; sorted-table
/// hits add a bloom probe, an index binary search, and a (cached) block
/// read. Misses should be the fastest because the bloom filter rejects
/// the key without touching data blocks.
fn bench_get(c: &mut Criterion) {
    const N: u64 = 10_000;
    let mut group = c.benchmark_group("get");

    group.bench_function("memtable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let opts = WriteOptions { sync: false };
        for i in 0..N {
            engine.put(&opts, make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let value = engine.get(black_box(&make_key(i % N))).expect("get");
            black_box(value);
            i += 1;
        });
    });

    group.bench_function("sstable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let opts = WriteOptions { sync: false };
        for i in 0..N {
            engine.put(&opts, make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        engine.flush().expect("flush");
        let mut i = 0u64;
        b.iter(|| {
            let value = engine.get(black_box(&make_key(i % N))).expect("get");
            black_box(value);
            i += 1;
        });
    });

    group.bench_function("sstable_miss", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let opts = WriteOptions { sync: false };
        for i in 0..N {
            engine.put(&opts, make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        engine.flush().expect("flush");
        b.iter(|| {
            let value = engine.get(black_box(b"absent-key")).expect("get");
            black_box(value);
        });
    });

    group.finish();
}

/// Full scans over a flushed data set.
///
/// **Expected behaviour:** linear in live keys; the merging iterator adds
/// a heap pop per entry on top of the block walks.
fn bench_scan(c: &mut Criterion) {
    const N: u64 = 10_000;
    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(N));
    group.sample_size(20);

    group.bench_function("full_scan_10k", |b| {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        let opts = WriteOptions { sync: false };
        for i in 0..N {
            engine.put(&opts, make_key(i), VALUE_128B.to_vec()).unwrap();
        }
        engine.flush().expect("flush");

        b.iter(|| {
            let mut iter = engine.new_iterator().expect("iterator");
            iter.seek_to_first();
            let mut count = 0u64;
            while iter.valid() {
                black_box(iter.value());
                count += 1;
                iter.next();
            }
            assert_eq!(count, N);
        });
    });

    group.finish();
}

/// Flush and compaction of a populated engine.
///
/// Sample size is reduced to 10 because each iteration creates and fills
/// an entire database.
fn bench_maintenance(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintenance");
    group.sample_size(10);

    group.bench_function("flush_4k_keys", |b| {
        b.iter_batched(
            || {
                let tmp = TempDir::new().unwrap();
                let engine = open_memtable_only(tmp.path());
                let opts = WriteOptions { sync: false };
                for i in 0..4_000u64 {
                    engine.put(&opts, make_key(i), VALUE_128B.to_vec()).unwrap();
                }
                (tmp, engine)
            },
            |(_tmp, engine)| {
                engine.flush().expect("flush");
            },
            BatchSize::PerIteration,
        );
    });

    group.bench_function("compact_4_tables", |b| {
        b.iter_batched(
            || {
                let tmp = TempDir::new().unwrap();
                let engine = open_memtable_only(tmp.path());
                let opts = WriteOptions { sync: false };
                for round in 0..4u64 {
                    for i in 0..1_000u64 {
                        engine
                            .put(&opts, make_key(round * 500 + i), VALUE_128B.to_vec())
                            .unwrap();
                    }
                    engine.flush().expect("flush");
                }
                (tmp, engine)
            },
            |(_tmp, engine)| {
                assert!(engine.compact().expect("compact"));
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_scan, bench_maintenance);
criterion_main!(benches);
