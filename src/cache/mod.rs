//! Bounded, weighted LRU caches shared across sorted-table readers.
//!
//! Two cache instances back the read path:
//!
//! - the **block cache** holds decoded data-block bytes keyed by
//!   `(file number, block offset)`, bounded by total bytes;
//! - the **table cache** (see [`crate::sstable::TableCache`]) holds open
//!   table readers keyed by file number, bounded by reader count.
//!
//! Both are built on the generic [`LruCache`] below: a mutex-protected map
//! plus a recency queue, where every entry carries a caller-supplied weight
//! and eviction pops the least-recently-used entries until usage fits the
//! capacity again. Values are handed out by clone, so callers typically
//! store `Arc`s.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cache of decoded data-block bytes keyed by `(file number, block offset)`.
pub type BlockCache = LruCache<(u64, u64), Arc<Vec<u8>>>;

/// A thread-safe LRU cache with per-entry weights.
pub struct LruCache<K, V> {
    inner: Mutex<LruInner<K, V>>,
    capacity: usize,
}

struct LruInner<K, V> {
    /// Value plus the weight it was inserted with.
    map: HashMap<K, (V, usize)>,

    /// Keys in recency order — least recently used at the front.
    order: VecDeque<K>,

    /// Sum of the weights of all resident entries.
    usage: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` total weight.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                usage: 0,
            }),
            capacity,
        }
    }

    /// Returns a clone of the cached value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.lock();
        if !guard.map.contains_key(key) {
            return None;
        }
        Self::touch(&mut guard.order, key);
        guard.map.get(key).map(|(v, _)| v.clone())
    }

    /// Inserts an entry, evicting least-recently-used entries until the
    /// total weight fits the capacity again.
    pub fn insert(&self, key: K, value: V, weight: usize) {
        let mut guard = self.lock();
        if let Some((_, old_weight)) = guard.map.remove(&key) {
            guard.usage -= old_weight;
            if let Some(i) = guard.order.iter().position(|k| k == &key) {
                guard.order.remove(i);
            }
        }
        guard.map.insert(key.clone(), (value, weight));
        guard.order.push_back(key);
        guard.usage += weight;

        while guard.usage > self.capacity {
            let Some(oldest) = guard.order.pop_front() else {
                break;
            };
            if let Some((_, w)) = guard.map.remove(&oldest) {
                guard.usage -= w;
            }
        }
    }

    /// Drops an entry, returning its value if it was resident.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.lock();
        let (value, weight) = guard.map.remove(key)?;
        guard.usage -= weight;
        if let Some(i) = guard.order.iter().position(|k| k == key) {
            guard.order.remove(i);
        }
        Some(value)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    /// Total weight of resident entries.
    pub fn usage(&self) -> usize {
        self.lock().usage
    }

    /// A poisoned mutex only means another thread panicked mid-operation;
    /// the map and queue are updated together, so the state is still usable.
    fn lock(&self) -> MutexGuard<'_, LruInner<K, V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(order: &mut VecDeque<K>, key: &K) {
        if let Some(i) = order.iter().position(|k| k == key) {
            order.remove(i);
        }
        order.push_back(key.clone());
    }
}
