use crate::engine::{Engine, EngineConfig, WriteOptions};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a large memtable — nothing spills to disk on its own.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_size_threshold: 64 * 1024,
        sstable_count_threshold: 1000,
        ..EngineConfig::default()
    }
}

/// Small memtable so writes rotate and flush quickly.
pub fn small_buffer_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_size_threshold: 512,
        sstable_count_threshold: 1000,
        ..EngineConfig::default()
    }
}

/// Small memtable *and* a low table-count threshold so background
/// compaction actually triggers.
pub fn compacting_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        memtable_size_threshold: 512,
        sstable_count_threshold: 4,
        ..EngineConfig::default()
    }
}

/// Non-synchronous write options; the default for tests that do not
/// exercise durability.
pub fn async_opts() -> WriteOptions {
    WriteOptions { sync: false }
}

/// Synchronous write options for durability tests.
pub fn sync_opts() -> WriteOptions {
    WriteOptions { sync: true }
}

/// Open an engine, write `num_keys` keys, and flush them into at least one
/// sorted table.
pub fn engine_with_sstables(path: &Path, num_keys: usize, prefix: &str) -> Engine {
    let engine = Engine::open(path, memtable_only_config()).expect("open");
    for i in 0..num_keys {
        let key = format!("{prefix}_{i:04}").into_bytes();
        let value = format!("value_with_some_padding_{i:04}").into_bytes();
        engine.put(&async_opts(), key, value).expect("put");
    }
    engine.flush().expect("flush");
    let stats = engine.stats().expect("stats");
    assert!(stats.sstable_count > 0, "expected at least one sorted table");
    engine
}

/// Collect every live `(key, value)` pair from a full scan.
pub fn collect_scan(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = engine.new_iterator().expect("iterator");
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    assert!(iter.error().is_none(), "scan reported an error");
    out
}
