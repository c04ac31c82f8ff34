//! Iterator vocabulary and the k-way merging iterator.
//!
//! Every source the engine can read — memtable snapshot, single data
//! block, whole sorted table — speaks the same small vocabulary,
//! [`KvIterator`]. The [`MergeIterator`] composes any mix of them behind a
//! min-heap keyed by the internal-key order.
//!
//! # MVCC shadowing
//!
//! Because the internal-key order sorts duplicate user keys newest first,
//! the first occurrence of any user key popped from the heap is its newest
//! version. The merge remembers that user key and skips every later pop
//! with the same one (older versions, wherever they live).
//!
//! Two views exist on top of the shadowed stream:
//!
//! - the **live view** ([`MergeIterator::new`]) additionally suppresses
//!   keys whose newest version is a tombstone — this is what scans see;
//! - the **raw view** ([`MergeIterator::raw`]) keeps the tombstones so
//!   compaction can observe them while still dropping shadowed versions.
//!
//! # Errors
//!
//! A child iterator that fails records its error and goes invalid; the
//! merge keeps serving the remaining children and surfaces the first child
//! error through `error()`. Callers are expected to check it on loop exit.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::key::{InternalKey, OpType};
use crate::sstable::TableError;

/// The shared operation vocabulary of all engine iterators.
///
/// `key`/`value` may only be called while `valid()` holds.
pub trait KvIterator: Send {
    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Whether the iterator is positioned on an entry.
    fn valid(&self) -> bool;

    /// Current internal key.
    fn key(&self) -> &InternalKey;

    /// Current value bytes.
    fn value(&self) -> &[u8];

    /// Advance to the next entry.
    fn next(&mut self);

    /// First error encountered, if any.
    fn error(&self) -> Option<&TableError>;
}

/// One heap slot: the child's current entry plus exclusive ownership of
/// the child itself, so entries can never alias.
struct HeapItem {
    key: InternalKey,
    value: Vec<u8>,
    child: Box<dyn KvIterator>,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// K-way merge over heterogeneous child iterators with MVCC shadowing.
pub struct MergeIterator {
    /// Children not yet seeked (between construction and `seek_to_first`).
    pending: Vec<Box<dyn KvIterator>>,

    /// Min-heap of children positioned on an entry.
    heap: BinaryHeap<Reverse<HeapItem>>,

    /// Children that ran out of entries; kept for error reporting.
    exhausted: Vec<Box<dyn KvIterator>>,

    current: Option<(InternalKey, Vec<u8>)>,
    last_user_key: Option<Vec<u8>>,
    keep_tombstones: bool,
}

impl MergeIterator {
    /// Live view: yields each live user key exactly once, ascending;
    /// tombstoned keys are suppressed entirely.
    pub fn new(children: Vec<Box<dyn KvIterator>>) -> Self {
        Self::with_mode(children, false)
    }

    /// Raw view for compaction: yields the newest version of each user key
    /// including tombstones, so deletes can shadow older puts and still be
    /// observed by the caller.
    pub fn raw(children: Vec<Box<dyn KvIterator>>) -> Self {
        Self::with_mode(children, true)
    }

    fn with_mode(children: Vec<Box<dyn KvIterator>>, keep_tombstones: bool) -> Self {
        Self {
            pending: children,
            heap: BinaryHeap::new(),
            exhausted: Vec::new(),
            current: None,
            last_user_key: None,
            keep_tombstones,
        }
    }

    fn advance(&mut self) {
        while let Some(Reverse(item)) = self.heap.pop() {
            let HeapItem {
                key,
                value,
                mut child,
            } = item;

            // Re-arm the child before deciding anything about the popped
            // entry, so the heap always reflects every live child.
            child.next();
            if child.valid() {
                let next_key = child.key().clone();
                let next_value = child.value().to_vec();
                self.heap.push(Reverse(HeapItem {
                    key: next_key,
                    value: next_value,
                    child,
                }));
            } else {
                self.exhausted.push(child);
            }

            // Older version of a user key we already emitted or suppressed.
            if self.last_user_key.as_deref() == Some(key.user_key.as_slice()) {
                continue;
            }
            self.last_user_key = Some(key.user_key.clone());

            if key.op == OpType::Delete && !self.keep_tombstones {
                continue;
            }

            self.current = Some((key, value));
            return;
        }
        self.current = None;
    }
}

impl KvIterator for MergeIterator {
    fn seek_to_first(&mut self) {
        let mut children: Vec<Box<dyn KvIterator>> = Vec::new();
        children.append(&mut self.pending);
        children.extend(self.exhausted.drain(..));
        while let Some(Reverse(item)) = self.heap.pop() {
            children.push(item.child);
        }

        for mut child in children {
            child.seek_to_first();
            if child.valid() {
                let key = child.key().clone();
                let value = child.value().to_vec();
                self.heap.push(Reverse(HeapItem { key, value, child }));
            } else {
                self.exhausted.push(child);
            }
        }

        self.last_user_key = None;
        self.current = None;
        self.advance();
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &InternalKey {
        &self.current.as_ref().expect("iterator not valid").0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").1
    }

    fn next(&mut self) {
        if self.current.is_some() {
            self.advance();
        }
    }

    fn error(&self) -> Option<&TableError> {
        self.heap
            .iter()
            .find_map(|Reverse(item)| item.child.error())
            .or_else(|| self.exhausted.iter().find_map(|c| c.error()))
            .or_else(|| self.pending.iter().find_map(|c| c.error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, OpType};
    use crate::memtable::Memtable;

    fn memtable_iter(entries: &[(&[u8], u64, OpType, &[u8])]) -> Box<dyn KvIterator> {
        let mem = Memtable::new();
        for (key, seq, op, value) in entries {
            mem.put(InternalKey::new(key.to_vec(), *seq, *op), value.to_vec())
                .unwrap();
        }
        Box::new(mem.iter().unwrap())
    }

    fn collect_live(mut merge: MergeIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
        merge.seek_to_first();
        let mut out = Vec::new();
        while merge.valid() {
            out.push((merge.key().user_key.clone(), merge.value().to_vec()));
            merge.next();
        }
        assert!(merge.error().is_none());
        out
    }

    #[test]
    fn merges_two_sources_in_order() {
        let a = memtable_iter(&[(b"a", 1, OpType::Put, b"1"), (b"c", 2, OpType::Put, b"3")]);
        let b = memtable_iter(&[(b"b", 3, OpType::Put, b"2"), (b"d", 4, OpType::Put, b"4")]);

        let out = collect_live(MergeIterator::new(vec![a, b]));
        let keys: Vec<_> = out.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn newest_version_shadows_older_across_sources() {
        let newer = memtable_iter(&[(b"k", 9, OpType::Put, b"new")]);
        let older = memtable_iter(&[(b"k", 2, OpType::Put, b"old")]);

        let out = collect_live(MergeIterator::new(vec![older, newer]));
        assert_eq!(out, vec![(b"k".to_vec(), b"new".to_vec())]);
    }

    #[test]
    fn tombstone_suppresses_key_in_live_view() {
        let newer = memtable_iter(&[(b"gone", 5, OpType::Delete, b"")]);
        let older = memtable_iter(&[
            (b"gone", 1, OpType::Put, b"v"),
            (b"kept", 2, OpType::Put, b"v"),
        ]);

        let out = collect_live(MergeIterator::new(vec![newer, older]));
        assert_eq!(out, vec![(b"kept".to_vec(), b"v".to_vec())]);
    }

    #[test]
    fn raw_view_keeps_tombstones_but_shadows_versions() {
        let newer = memtable_iter(&[(b"k", 5, OpType::Delete, b"")]);
        let older = memtable_iter(&[(b"k", 1, OpType::Put, b"v")]);

        let mut merge = MergeIterator::raw(vec![newer, older]);
        merge.seek_to_first();

        let mut seen = Vec::new();
        while merge.valid() {
            seen.push((merge.key().user_key.clone(), merge.key().op));
            merge.next();
        }
        assert_eq!(seen, vec![(b"k".to_vec(), OpType::Delete)]);
    }

    #[test]
    fn put_over_delete_over_put_keeps_newest() {
        let source = memtable_iter(&[
            (b"k", 1, OpType::Put, b"first"),
            (b"k", 2, OpType::Delete, b""),
            (b"k", 3, OpType::Put, b"third"),
        ]);

        let out = collect_live(MergeIterator::new(vec![source]));
        assert_eq!(out, vec![(b"k".to_vec(), b"third".to_vec())]);
    }

    #[test]
    fn empty_children_yield_empty_merge() {
        let empty = memtable_iter(&[]);
        let out = collect_live(MergeIterator::new(vec![empty]));
        assert!(out.is_empty());
    }

    #[test]
    fn seek_to_first_restarts_the_merge() {
        let source = memtable_iter(&[
            (b"a", 1, OpType::Put, b"1"),
            (b"b", 2, OpType::Put, b"2"),
        ]);

        let mut merge = MergeIterator::new(vec![source]);
        merge.seek_to_first();
        merge.next();
        assert_eq!(merge.key().user_key, b"b".to_vec());

        merge.seek_to_first();
        assert_eq!(merge.key().user_key, b"a".to_vec());
    }
}
