//! Memtable — the in-memory write buffer.
//!
//! An ordered map over [`InternalKey`]s backing both the active write
//! buffer and the immutable buffer awaiting flush. Because the internal
//! key carries the sequence number, multiple versions of the same user key
//! coexist in the map, newest first; nothing is deduplicated on insert and
//! deletes are tombstone entries, not removals.
//!
//! # Concurrency
//!
//! Single writer, many readers: puts take the write half of an `RwLock`,
//! gets and snapshots take the read half. Durability is the WAL's job —
//! the engine appends there before touching the memtable.
//!
//! # Size accounting
//!
//! Every put advances an approximate byte size
//! (`len(user_key) + len(value)`); the engine rotates the memtable once it
//! crosses the configured threshold.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::trace;

use crate::key::{InternalKey, OpType};

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result of a point lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MemtableGetResult {
    /// Newest version is a put with this value.
    Put(Vec<u8>),

    /// Newest version is a tombstone — found, but deleted.
    Tombstone,

    /// No version of the key in this memtable.
    NotFound,
}

struct MemtableInner {
    tree: BTreeMap<InternalKey, Vec<u8>>,
    approximate_size: usize,
}

/// Ordered in-memory buffer of recent writes.
pub struct Memtable {
    inner: RwLock<MemtableInner>,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemtableInner {
                tree: BTreeMap::new(),
                approximate_size: 0,
            }),
        }
    }

    /// Inserts one version. Multiple versions of the same user key are kept
    /// side by side, ordered newest first by the internal-key comparator.
    pub fn put(&self, key: InternalKey, value: Vec<u8>) -> Result<(), MemtableError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        guard.approximate_size += key.user_key.len() + value.len();
        trace!(seq = key.seq, key_len = key.user_key.len(), "memtable put");
        guard.tree.insert(key, value);
        Ok(())
    }

    /// Looks up the newest version of `user_key`.
    ///
    /// Scans forward from the synthesized upper bound
    /// `(user_key, MAX, Put)`; the first entry at or past that position is
    /// the newest version and decides the result iff its user key matches.
    pub fn get(&self, user_key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;

        let lookup = InternalKey::lookup(user_key);
        match guard.tree.range(lookup..).next() {
            Some((key, value)) if key.user_key == user_key => Ok(match key.op {
                OpType::Put => MemtableGetResult::Put(value.clone()),
                OpType::Delete => MemtableGetResult::Tombstone,
            }),
            _ => Ok(MemtableGetResult::NotFound),
        }
    }

    /// Approximate in-memory footprint in bytes.
    pub fn approximate_size(&self) -> Result<usize, MemtableError> {
        Ok(self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?
            .approximate_size)
    }

    /// Number of stored versions (not distinct user keys).
    pub fn len(&self) -> Result<usize, MemtableError> {
        Ok(self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?
            .tree
            .len())
    }

    pub fn is_empty(&self) -> Result<bool, MemtableError> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of every version in internal-key order.
    ///
    /// Consumed by the sorted-table builder during flush; also the backing
    /// store for [`Memtable::iter`]. Does not mutate in-memory state.
    pub fn snapshot(&self) -> Result<Vec<(InternalKey, Vec<u8>)>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        Ok(guard
            .tree
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Snapshot iterator over every version, in order.
    pub fn iter(&self) -> Result<MemtableIterator, MemtableError> {
        Ok(MemtableIterator::new(self.snapshot()?))
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned snapshot iterator over a memtable's contents.
pub struct MemtableIterator {
    entries: Vec<(InternalKey, Vec<u8>)>,
    pos: usize,
}

impl MemtableIterator {
    fn new(entries: Vec<(InternalKey, Vec<u8>)>) -> Self {
        Self { entries, pos: 0 }
    }
}

impl crate::iterator::KvIterator for MemtableIterator {
    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn key(&self) -> &InternalKey {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].1
    }

    fn next(&mut self) {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
    }

    fn error(&self) -> Option<&crate::sstable::TableError> {
        None
    }
}
