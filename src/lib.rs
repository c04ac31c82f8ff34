//! # StrataDB
//!
//! An embedded, persistent, ordered key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)**. Designed for fast writes,
//! crash-safe operation, and predictable reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Engine                            │
//! │  ┌────────────┐   ┌─────────────┐   ┌────────────────┐  │
//! │  │   Active    │   │  Immutable  │   │ Sorted tables  │  │
//! │  │  memtable   │   │  memtable   │   │   (on disk)    │  │
//! │  │  + db.wal   │   │ + wal-N.log │   │  NNNNN.sst ... │  │
//! │  └─────┬───────┘   └──────┬──────┘   └───────┬────────┘  │
//! │        │    rotate        │    flush         │           │
//! │        └──────────►       └─────────►        │           │
//! │                                              │           │
//! │  ┌───────────────────────────────────────────┘           │
//! │  │  Compaction (k-way merge of the whole active set)     │
//! │  └───────────────────────────────────────────────────┐   │
//! │                                                      │   │
//! │  ┌───────────────┐  ┌──────────────┐  ┌───────────┐  │   │
//! │  │  state.json   │  │ block cache  │  │   LOCK    │  │   │
//! │  └───────────────┘  └──────────────┘  └───────────┘  │   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`key`] | Internal key triple and its total order |
//! | [`wal`] | Checksummed write-ahead log for crash recovery |
//! | [`memtable`] | In-memory multi-version write buffer |
//! | [`sstable`] | Immutable sorted tables with Bloom filters and block indices |
//! | [`iterator`] | Iterator vocabulary and the MVCC-shadowing k-way merge |
//! | [`cache`] | Bounded LRU caches for data blocks and table readers |
//! | [`manifest`] | Durable JSON state document |
//!
//! ## Key features
//!
//! - **Write-ahead logging** — every mutation is persisted to the WAL
//!   before it becomes visible; `sync` writes fsync before acknowledging.
//! - **Multi-version reads** — versions are ordered by sequence number and
//!   reads always see the newest committed one.
//! - **Tombstone deletes** — deletes shadow older puts until compaction
//!   drops both.
//! - **Bloom-gated lookups** — each table carries a Bloom filter for fast
//!   negative answers.
//! - **Universal compaction** — the whole active set merges into one
//!   table; the swap is atomic and inputs are garbage collected after the
//!   new state is durable.
//! - **Single-process enforcement** — an exclusive lock file rejects a
//!   second open of the same directory.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stratadb::{Engine, EngineConfig, WriteOptions};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//! let opts = WriteOptions { sync: true };
//!
//! // Write
//! engine.put(&opts, b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(&opts, b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Ordered scan over every live key
//! let mut iter = engine.new_iterator().unwrap();
//! iter.seek_to_first();
//! while iter.valid() {
//!     println!("{:?} => {:?}", iter.key(), iter.value());
//!     iter.next();
//! }
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

pub mod cache;
pub mod engine;
pub mod iterator;
pub mod key;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use engine::{Engine, EngineConfig, EngineError, EngineIterator, EngineStats, WriteOptions};
