//! LSM storage engine — the orchestrator.
//!
//! # Design overview
//!
//! Data lives in three layers, queried newest-first:
//!
//! 1. **Active memtable** — the in-memory write buffer, backed by the
//!    active WAL (`db.wal`).
//! 2. **Immutable memtable** — at most one rotated buffer awaiting flush,
//!    backed by its rotated WAL (`wal-NNNNN.log`).
//! 3. **Sorted tables** — the active set of immutable on-disk tables,
//!    consulted in descending file-number order.
//!
//! Writes allocate a sequence number, append to the WAL, then land in the
//! active memtable. Once the memtable crosses the configured threshold it
//! is rotated: the WAL is renamed after the table that will absorb it, a
//! fresh memtable and WAL are installed, and a background task builds the
//! sorted table. When the active set reaches the table-count threshold, a
//! background compaction merges the whole set into one table, drops
//! shadowed versions and tombstones, swaps the set atomically, and garbage
//! collects the inputs.
//!
//! # Concurrency model
//!
//! Shared state sits behind one `RwLock`. Writers and readers hold it just
//! long enough to reach the handles (the WAL and memtable synchronize
//! themselves); flush rotation, the flush commit, and the compaction swap
//! take it exclusively at their commit points. At most one flush and one
//! compaction run at a time, on plain threads holding a cloned engine
//! handle, joined at close.
//!
//! # Guarantees
//!
//! - **Durability** — every mutation is in the WAL before it is visible;
//!   `WriteOptions { sync: true }` additionally fsyncs before
//!   acknowledging.
//! - **Crash recovery** — on open, rotated WALs and the active WAL are
//!   replayed in order; the sequence counter resumes past the maximum seen.
//! - **Atomic commits** — tables and the state document are written to
//!   temporaries and renamed; a failed flush or compaction leaves the
//!   previous on-disk state intact.

mod flock;

#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::iterator::{KvIterator, MergeIterator};
use crate::key::{InternalKey, OpType};
use crate::manifest::{self, ManifestError, State};
use crate::memtable::{Memtable, MemtableError, MemtableGetResult};
use crate::sstable::{self, TableCache, TableError, TableGetResult};
use crate::wal::{self, Wal, WalEntry, WalError};

use flock::DirLock;

/// Name of the advisory lock file inside the database directory.
pub const LOCK_FILENAME: &str = "LOCK";

/// Name of the active WAL inside the database directory.
pub const ACTIVE_WAL_FILENAME: &str = "db.wal";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the WAL.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from the memtable.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from a sorted table.
    #[error("Sorted table error: {0}")]
    Table(#[from] TableError),

    /// Error originating from the state document.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The directory is already open elsewhere.
    #[error("database directory {} is locked by another process", .0.display())]
    Locked(PathBuf),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max active memtable size (bytes) before rotation and flush.
    pub memtable_size_threshold: usize,

    /// Active-set size that triggers a background compaction.
    pub sstable_count_threshold: usize,

    /// Block cache capacity in bytes, shared by all table readers.
    pub block_cache_capacity: usize,

    /// Max number of open table readers kept in the table cache.
    pub table_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_size_threshold: 4 * 1024 * 1024,
            sstable_count_threshold: 10,
            block_cache_capacity: 8 * 1024 * 1024,
            table_cache_capacity: 128,
        }
    }
}

/// Per-write durability options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging the write.
    pub sync: bool,
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug)]
pub struct EngineStats {
    /// Number of sorted tables in the active set.
    pub sstable_count: usize,

    /// Sum of all active table file sizes in bytes.
    pub total_sst_size_bytes: u64,

    /// Whether an immutable memtable is awaiting flush.
    pub immutable_pending: bool,
}

struct EngineInner {
    /// Active WAL backing the active memtable.
    wal: Wal,

    /// Active memtable accepting writes.
    active: Arc<Memtable>,

    /// Rotated memtable awaiting flush; at most one at a time.
    immutable: Option<Arc<Memtable>>,

    /// File numbers of the active sorted tables, ascending.
    active_sstables: Vec<u64>,

    /// Next file number to allocate.
    next_file_number: u64,
}

struct EngineShared {
    inner: RwLock<EngineInner>,

    /// Last assigned sequence number.
    seq: AtomicU64,

    /// At most one compaction at a time.
    compaction_running: AtomicBool,

    table_cache: TableCache,
    dir: PathBuf,
    config: EngineConfig,

    /// Outstanding background flush/compaction threads, joined at close.
    tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Held for the whole engine lifetime; released on drop.
    _lock: DirLock,
}

/// The main LSM storage engine handle.
///
/// Cloning is cheap and shares the same underlying engine, which is how
/// background tasks reference it.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Engine {
    /// Opens (or creates) an engine rooted at the given directory.
    ///
    /// Acquires the directory lock, loads the state document, purges stale
    /// temporaries and orphan tables, replays rotated WALs and the active
    /// WAL into a fresh memtable, reconciles the file-number counter, and
    /// persists the resulting state.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = DirLock::acquire(dir.join(LOCK_FILENAME)).map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                EngineError::Locked(dir.clone())
            } else {
                EngineError::Io(e)
            }
        })?;

        let mut state = manifest::load(&dir)?;
        Self::remove_stale_files(&dir, &state)?;

        let active = Arc::new(Memtable::new());
        let mut max_seq = 0u64;
        let mut max_file_num = 0u64;

        for (num, wal_path) in Self::rotated_wals(&dir)? {
            max_file_num = max_file_num.max(num);
            let (entries, seq) = wal::replay(&wal_path)?;
            info!(wal = %wal_path.display(), records = entries.len(), "replayed rotated WAL");
            for entry in entries {
                let WalEntry { seq, op, key, value } = entry;
                active.put(InternalKey::new(key, seq, op), value)?;
            }
            max_seq = max_seq.max(seq);
        }

        let active_wal_path = dir.join(ACTIVE_WAL_FILENAME);
        let (entries, seq) = wal::replay(&active_wal_path)?;
        if !entries.is_empty() {
            info!(records = entries.len(), "replayed active WAL");
        }
        for entry in entries {
            let WalEntry { seq, op, key, value } = entry;
            active.put(InternalKey::new(key, seq, op), value)?;
        }
        max_seq = max_seq.max(seq);

        // Rotation allocates file numbers without an immediate state save,
        // so the recovered counter may lag what is on disk.
        for &num in &state.active_sstables {
            max_file_num = max_file_num.max(num);
        }
        if state.next_file_number <= max_file_num {
            state.next_file_number = max_file_num + 1;
        }

        let wal = Wal::open(&active_wal_path)?;
        manifest::save(&dir, &state)?;

        let block_cache = Arc::new(BlockCache::new(config.block_cache_capacity));
        let table_cache = TableCache::new(dir.clone(), config.table_cache_capacity, block_cache);

        info!(
            dir = %dir.display(),
            sstables = state.active_sstables.len(),
            next_file_number = state.next_file_number,
            max_seq,
            "engine opened"
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                inner: RwLock::new(EngineInner {
                    wal,
                    active,
                    immutable: None,
                    active_sstables: state.active_sstables,
                    next_file_number: state.next_file_number,
                }),
                seq: AtomicU64::new(max_seq),
                compaction_running: AtomicBool::new(false),
                table_cache,
                dir,
                config,
                tasks: Mutex::new(Vec::new()),
                _lock: lock,
            }),
        })
    }

    /// Insert or update a key.
    pub fn put(
        &self,
        opts: &WriteOptions,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.write(opts, key, value, OpType::Put)
    }

    /// Delete a key by writing a tombstone.
    pub fn delete(&self, opts: &WriteOptions, key: Vec<u8>) -> Result<(), EngineError> {
        self.write(opts, key, Vec::new(), OpType::Delete)
    }

    fn write(
        &self,
        opts: &WriteOptions,
        key: Vec<u8>,
        value: Vec<u8>,
        op: OpType,
    ) -> Result<(), EngineError> {
        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let size = {
            let inner = self
                .shared
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

            // WAL strictly before the memtable: a crash between the two
            // must never leave a visible-but-unlogged write.
            let entry = WalEntry { seq, op, key, value };
            inner.wal.append(&entry, opts.sync)?;

            let WalEntry { seq, op, key, value } = entry;
            inner.active.put(InternalKey::new(key, seq, op), value)?;
            inner.active.approximate_size()?
        };

        if size > self.shared.config.memtable_size_threshold {
            if let Some(file_num) = self.begin_flush(false)? {
                self.spawn_flush(file_num);
            }
        }
        Ok(())
    }

    /// Look up a single key.
    ///
    /// Returns `Ok(None)` both for never-written keys and for keys whose
    /// newest version is a tombstone. Lookup order: active memtable →
    /// immutable memtable → sorted tables, newest file number first; the
    /// first layer with any verdict (value or tombstone) is authoritative.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let (active, immutable, tables) = self.read_snapshot()?;

        match active.get(key)? {
            MemtableGetResult::Put(value) => return Ok(Some(value)),
            MemtableGetResult::Tombstone => return Ok(None),
            MemtableGetResult::NotFound => {}
        }

        if let Some(immutable) = immutable {
            match immutable.get(key)? {
                MemtableGetResult::Put(value) => return Ok(Some(value)),
                MemtableGetResult::Tombstone => return Ok(None),
                MemtableGetResult::NotFound => {}
            }
        }

        for &file_num in tables.iter().rev() {
            let reader = match self.shared.table_cache.get_or_open(file_num) {
                Ok(reader) => reader,
                Err(e) => {
                    // Corruption or a racing deletion; other tables can
                    // still answer.
                    error!(file_num, %e, "failed to open sorted table, skipping");
                    continue;
                }
            };
            match reader.get(key) {
                Ok(TableGetResult::Put(value)) => return Ok(Some(value)),
                Ok(TableGetResult::Tombstone) => return Ok(None),
                Ok(TableGetResult::NotFound) => {}
                Err(e) => {
                    error!(file_num, %e, "sorted table read failed, skipping");
                }
            }
        }

        Ok(None)
    }

    /// Merging iterator over the current snapshot.
    ///
    /// Yields each live user key exactly once, in ascending order; call
    /// `seek_to_first` before the first use.
    pub fn new_iterator(&self) -> Result<EngineIterator, EngineError> {
        let (active, immutable, tables) = self.read_snapshot()?;

        let mut children: Vec<Box<dyn KvIterator>> = Vec::new();
        children.push(Box::new(active.iter()?));
        if let Some(immutable) = immutable {
            children.push(Box::new(immutable.iter()?));
        }
        for &file_num in tables.iter().rev() {
            let reader = self.shared.table_cache.get_or_open(file_num)?;
            children.push(Box::new(reader.iter()));
        }

        Ok(EngineIterator {
            merge: MergeIterator::new(children),
        })
    }

    /// Rotates the active memtable and builds its sorted table
    /// synchronously.
    ///
    /// Returns `Ok(false)` when there is nothing to flush or another flush
    /// is in flight.
    pub fn flush(&self) -> Result<bool, EngineError> {
        match self.begin_flush(true)? {
            Some(file_num) => {
                self.finish_flush(file_num)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merges the whole active set into one table synchronously.
    ///
    /// Returns `Ok(false)` when fewer than two tables exist or a
    /// compaction is already running.
    pub fn compact(&self) -> Result<bool, EngineError> {
        if self.shared.compaction_running.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let result = self.run_compaction();
        self.shared.compaction_running.store(false, Ordering::SeqCst);
        result
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let (tables, immutable_pending) = {
            let inner = self
                .shared
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            (inner.active_sstables.clone(), inner.immutable.is_some())
        };

        let mut total_sst_size_bytes = 0u64;
        for &file_num in &tables {
            let path = sstable::sstable_path(&self.shared.dir, file_num);
            total_sst_size_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }

        Ok(EngineStats {
            sstable_count: tables.len(),
            total_sst_size_bytes,
            immutable_pending,
        })
    }

    /// Gracefully shuts down the engine: joins outstanding background
    /// tasks and syncs the WAL. Nothing new is persisted — every flush and
    /// compaction already saved its state when it committed. The directory
    /// lock is released when the last handle is dropped.
    pub fn close(&self) -> Result<(), EngineError> {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tasks = self
                    .shared
                    .tasks
                    .lock()
                    .map_err(|_| EngineError::Internal("task list mutex poisoned".into()))?;
                tasks.drain(..).collect()
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.join();
            }
        }

        let inner = self
            .shared
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        inner.wal.sync()?;
        info!("engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Flush pipeline
    // --------------------------------------------------------------------------------------------

    /// Rotation half of a flush, under the exclusive lock: allocates the
    /// file number, renames the active WAL after it, installs a fresh WAL
    /// and memtable, and promotes the old memtable to immutable.
    ///
    /// Returns `None` when a flush is already in flight, the memtable is
    /// empty, or (unless `force`) the size threshold is not crossed.
    fn begin_flush(&self, force: bool) -> Result<Option<u64>, EngineError> {
        let mut inner = self
            .shared
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.immutable.is_some() {
            debug!("flush already in flight");
            return Ok(None);
        }
        if inner.active.is_empty()? {
            return Ok(None);
        }
        if !force && inner.active.approximate_size()? <= self.shared.config.memtable_size_threshold
        {
            // Another writer already rotated under us.
            return Ok(None);
        }

        let file_num = inner.next_file_number;
        inner.next_file_number += 1;

        inner.wal.sync()?;
        let active_wal_path = self.shared.dir.join(ACTIVE_WAL_FILENAME);
        let rotated_path = self.shared.dir.join(format!("wal-{file_num:05}.log"));
        fs::rename(&active_wal_path, &rotated_path)?;

        let fresh_wal = Wal::open(&active_wal_path)?;
        // Dropping the old handle syncs the rotated file.
        let _rotated = std::mem::replace(&mut inner.wal, fresh_wal);

        let fresh_memtable = Arc::new(Memtable::new());
        let old_active = std::mem::replace(&mut inner.active, fresh_memtable);
        inner.immutable = Some(old_active);

        info!(file_num, "memtable rotated for flush");
        Ok(Some(file_num))
    }

    /// Table-building half of a flush: writes the sorted table from the
    /// immutable memtable, commits it to the active set and the state
    /// document, then retires the rotated WALs it covers.
    fn finish_flush(&self, file_num: u64) -> Result<(), EngineError> {
        let immutable = {
            let inner = self
                .shared
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            inner.immutable.clone()
        };
        let Some(immutable) = immutable else {
            return Ok(());
        };

        let entries = immutable.snapshot()?;
        let path = sstable::sstable_path(&self.shared.dir, file_num);
        sstable::write_table(&path, entries.len(), entries.into_iter())?;

        {
            let mut inner = self
                .shared
                .inner
                .write()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            inner.active_sstables.push(file_num);
            inner.active_sstables.sort_unstable();
            let state = State {
                next_file_number: inner.next_file_number,
                active_sstables: inner.active_sstables.clone(),
            };
            manifest::save(&self.shared.dir, &state)?;
            // The immutable memtable stays readable until the new table is
            // registered; clearing it in the same critical section closes
            // the visibility gap.
            inner.immutable = None;
        }

        // The flushed memtable covered everything replayed at startup, so
        // every rotated WAL up to this file number is retired with it.
        self.remove_rotated_wals(file_num);

        info!(file_num, "memtable flushed");
        self.maybe_schedule_compaction();
        Ok(())
    }

    fn spawn_flush(&self, file_num: u64) {
        let engine = self.clone();
        let handle = std::thread::spawn(move || {
            // On failure the rotated WAL and immutable memtable stay in
            // place; the next open replays them.
            if let Err(e) = engine.finish_flush(file_num) {
                error!(file_num, %e, "background flush failed");
            }
        });
        self.track(handle);
    }

    // --------------------------------------------------------------------------------------------
    // Compaction
    // --------------------------------------------------------------------------------------------

    fn maybe_schedule_compaction(&self) {
        let count = match self.shared.inner.read() {
            Ok(inner) => inner.active_sstables.len(),
            Err(_) => return,
        };
        if count < self.shared.config.sstable_count_threshold {
            return;
        }
        if self.shared.compaction_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = self.clone();
        let handle = std::thread::spawn(move || {
            if let Err(e) = engine.run_compaction() {
                // Inputs are untouched on failure; only the output
                // temporary may linger until the next open.
                error!(%e, "background compaction failed");
            }
            engine
                .shared
                .compaction_running
                .store(false, Ordering::SeqCst);
            // Flushes that landed while the merge ran may already warrant
            // another round.
            engine.maybe_schedule_compaction();
        });
        self.track(handle);
    }

    /// One universal compaction round: merge the snapshotted active set
    /// into a single output table, keeping only the newest version of each
    /// user key and dropping tombstones — nothing outside the input set
    /// can shadow a live value, so both are safe to drop.
    fn run_compaction(&self) -> Result<bool, EngineError> {
        let (inputs, out_num) = {
            let mut inner = self
                .shared
                .inner
                .write()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            if inner.active_sstables.len() < 2 {
                return Ok(false);
            }
            let inputs = inner.active_sstables.clone();
            let out_num = inner.next_file_number;
            inner.next_file_number += 1;
            (inputs, out_num)
        };

        info!(inputs = inputs.len(), out_num, "compaction started");

        let mut children: Vec<Box<dyn KvIterator>> = Vec::with_capacity(inputs.len());
        for &file_num in &inputs {
            let reader = self.shared.table_cache.get_or_open(file_num)?;
            children.push(Box::new(reader.iter()));
        }

        let mut merge = MergeIterator::raw(children);
        merge.seek_to_first();

        let mut survivors: Vec<(InternalKey, Vec<u8>)> = Vec::new();
        while merge.valid() {
            if merge.key().op == OpType::Put {
                survivors.push((merge.key().clone(), merge.value().to_vec()));
            }
            merge.next();
        }
        if let Some(e) = merge.error() {
            return Err(EngineError::Internal(format!(
                "compaction merge failed: {e}"
            )));
        }

        let produced = if survivors.is_empty() {
            // Everything was tombstoned; no point writing an empty table.
            debug!(out_num, "compaction eliminated every key");
            None
        } else {
            let path = sstable::sstable_path(&self.shared.dir, out_num);
            sstable::write_table(&path, survivors.len(), survivors.into_iter())?;
            Some(out_num)
        };

        {
            let mut inner = self
                .shared
                .inner
                .write()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            // Keep tables flushed while the merge ran.
            inner.active_sstables.retain(|num| !inputs.contains(num));
            if let Some(num) = produced {
                inner.active_sstables.push(num);
            }
            inner.active_sstables.sort_unstable();
            let state = State {
                next_file_number: inner.next_file_number,
                active_sstables: inner.active_sstables.clone(),
            };
            manifest::save(&self.shared.dir, &state)?;
        }

        for &file_num in &inputs {
            self.shared.table_cache.evict(file_num);
            let path = sstable::sstable_path(&self.shared.dir, file_num);
            if let Err(e) = fs::remove_file(&path) {
                warn!(file_num, %e, "failed to remove compacted table");
            }
        }

        info!(
            inputs = inputs.len(),
            produced = produced.is_some(),
            "compaction finished"
        );
        Ok(true)
    }

    // --------------------------------------------------------------------------------------------
    // Helpers
    // --------------------------------------------------------------------------------------------

    fn read_snapshot(
        &self,
    ) -> Result<(Arc<Memtable>, Option<Arc<Memtable>>, Vec<u64>), EngineError> {
        let inner = self
            .shared
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Ok((
            Arc::clone(&inner.active),
            inner.immutable.clone(),
            inner.active_sstables.clone(),
        ))
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = match self.shared.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Rotated WALs in the directory, sorted by file number ascending.
    fn rotated_wals(dir: &Path) -> Result<Vec<(u64, PathBuf)>, EngineError> {
        let mut wals = Vec::new();
        for dirent in fs::read_dir(dir)? {
            let path = dirent?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(num) = name
                .strip_prefix("wal-")
                .and_then(|rest| rest.strip_suffix(".log"))
                .and_then(|num| num.parse::<u64>().ok())
            {
                wals.push((num, path));
            }
        }
        wals.sort_unstable_by_key(|(num, _)| *num);
        Ok(wals)
    }

    fn remove_rotated_wals(&self, up_to: u64) {
        let wals = match Self::rotated_wals(&self.shared.dir) {
            Ok(wals) => wals,
            Err(e) => {
                warn!(%e, "failed to enumerate rotated WALs");
                return;
            }
        };
        for (num, path) in wals {
            if num > up_to {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!(num, %e, "failed to remove rotated WAL");
            } else {
                debug!(num, "removed rotated WAL");
            }
        }
    }

    /// Removes leftovers from interrupted runs: in-flight `*.tmp`
    /// artifacts and tables that never made it into the active set.
    fn remove_stale_files(dir: &Path, state: &State) -> Result<(), EngineError> {
        for dirent in fs::read_dir(dir)? {
            let path = dirent?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(".tmp") {
                warn!(file = name, "removing stale temporary file");
                fs::remove_file(&path)?;
                continue;
            }

            if let Some(num) = name
                .strip_suffix(".sst")
                .and_then(|num| num.parse::<u64>().ok())
            {
                if !state.active_sstables.contains(&num) {
                    warn!(file = name, "removing orphan sorted table");
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

/// Merging iterator over an engine snapshot.
///
/// Yields each live user key exactly once, ascending; tombstoned keys are
/// suppressed. Methods mirror the iterator vocabulary: `seek_to_first`,
/// `valid`, `key`, `value`, `next`, `error`, `close`.
pub struct EngineIterator {
    merge: MergeIterator,
}

impl EngineIterator {
    /// Position at the first live entry.
    pub fn seek_to_first(&mut self) {
        self.merge.seek_to_first();
    }

    pub fn valid(&self) -> bool {
        self.merge.valid()
    }

    /// Current user key. Only valid while `valid()` holds.
    pub fn key(&self) -> &[u8] {
        &self.merge.key().user_key
    }

    /// Current value. Only valid while `valid()` holds.
    pub fn value(&self) -> &[u8] {
        self.merge.value()
    }

    pub fn next(&mut self) {
        self.merge.next();
    }

    /// First error any underlying source reported; check on loop exit.
    pub fn error(&self) -> Option<&TableError> {
        self.merge.error()
    }

    /// Releases the snapshot.
    pub fn close(self) {}
}
