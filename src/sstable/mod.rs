//! Sorted Table (SST) module.
//!
//! Immutable, disk-backed sorted tables holding `(internal key, value)`
//! pairs, plus the builder that writes them and the readers/iterators that
//! serve point lookups and scans.
//!
//! # On-disk layout
//!
//! ```text
//! [DATA BLOCK 0]
//! [DATA BLOCK 1]
//! ...
//! [BLOOM FILTER BYTES]
//! [INDEX BYTES]
//! [FOOTER BYTES]
//! [FOOTER_LEN (4, LE)]
//! ```
//!
//! - **Data blocks** — consecutive entries encoded as
//!   `[key_len(4)][val_len(4)][encoded internal key][value]`, flushed once
//!   the buffered block exceeds [`DATA_BLOCK_SIZE`].
//! - **Bloom filter** — built over the raw user-key bytes of every entry at
//!   a 1% target false-positive rate; never reports a stored key absent.
//! - **Index** — one `(last_key, offset, size)` entry per data block, in
//!   block order, bincode-encoded.
//! - **Footer** — `(index_offset, index_size, filter_offset, filter_size)`
//!   bincode-encoded, followed by its own 4-byte length so the footer can
//!   be discovered in O(1) from the end of the file.
//!
//! # Concurrency model
//!
//! Tables are immutable after creation. A [`TableReader`] keeps the open
//! file handle plus the decoded index and filter in memory; data blocks
//! are fetched on demand through the shared block cache, so concurrent
//! lookups and iterators need no locking of their own.
//!
//! # Atomicity
//!
//! The builder writes to `<path>.tmp`, fsyncs, renames into place, and
//! fsyncs the parent directory. A crash can never leave a half-written
//! table under the final name.


use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::config::standard;
use bincode::{decode_from_slice, encode_to_vec};
use bloomfilter::Bloom;
use thiserror::Error;
use tracing::{debug, trace};

use crate::cache::{BlockCache, LruCache};
use crate::iterator::KvIterator;
use crate::key::{InternalKey, OpType};

/// Data blocks are flushed once the buffered entries exceed this size.
pub const DATA_BLOCK_SIZE: usize = 4096;

/// Target Bloom filter false-positive rate.
const BLOOM_FP_RATE: f64 = 0.01;

/// Errors returned by sorted-table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization (encode) error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Deserialization error.
    #[error("Deserialization (decode) error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Malformed or truncated table structure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Index entry describing one data block: the last internal key it holds
/// and its position in the file.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub struct IndexEntry {
    pub last_key: InternalKey,
    pub offset: u64,
    pub size: u64,
}

/// Fixed-structure trailer locating the index and filter blocks.
#[derive(Debug, bincode::Encode, bincode::Decode)]
struct Footer {
    index_offset: u64,
    index_size: u64,
    filter_offset: u64,
    filter_size: u64,
}

/// Result of a single-table point lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum TableGetResult {
    /// Newest version in this table is a put with this value.
    Put(Vec<u8>),

    /// Newest version in this table is a tombstone — found, but deleted.
    Tombstone,

    /// This table has no information about the key.
    NotFound,
}

/// Path of a sorted table file under the database directory.
pub fn sstable_path(dir: &Path, file_num: u64) -> PathBuf {
    dir.join(format!("{file_num:05}.sst"))
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Builds a complete sorted table from an ordered entry stream.
///
/// `item_count` is a prediction used to size the Bloom filter; `entries`
/// must be sorted by internal key. The table is written to `<path>.tmp`,
/// fsync'd, renamed to `path`, and the parent directory is fsync'd so the
/// rename itself survives a crash.
pub fn write_table(
    path: impl AsRef<Path>,
    item_count: usize,
    entries: impl Iterator<Item = (InternalKey, Vec<u8>)>,
) -> Result<(), TableError> {
    let final_path = path.as_ref();
    let mut tmp_os = final_path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp_path = PathBuf::from(tmp_os);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    let config = standard().with_fixed_int_encoding();

    let mut bloom: Bloom<[u8]> = Bloom::new_for_fp_rate(item_count.max(1), BLOOM_FP_RATE)
        .map_err(|e| TableError::Internal(e.to_string()))?;

    let mut index: Vec<IndexEntry> = Vec::new();
    let mut block: Vec<u8> = Vec::with_capacity(DATA_BLOCK_SIZE);
    let mut block_last_key: Option<InternalKey> = None;
    let mut offset: u64 = 0;
    let mut entry_count: usize = 0;

    for (key, value) in entries {
        bloom.set(&key.user_key);

        let key_bytes = encode_to_vec(&key, config)?;
        block.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
        block.extend_from_slice(&(value.len() as u32).to_le_bytes());
        block.extend_from_slice(&key_bytes);
        block.extend_from_slice(&value);
        block_last_key = Some(key);
        entry_count += 1;

        if block.len() > DATA_BLOCK_SIZE {
            flush_block(&mut writer, &mut block, &mut block_last_key, &mut index, &mut offset)?;
        }
    }
    if !block.is_empty() {
        flush_block(&mut writer, &mut block, &mut block_last_key, &mut index, &mut offset)?;
    }

    let filter_offset = offset;
    let filter_bytes = bloom.as_slice();
    writer.write_all(filter_bytes)?;

    let index_offset = filter_offset + filter_bytes.len() as u64;
    let index_bytes = encode_to_vec(&index, config)?;
    writer.write_all(&index_bytes)?;

    let footer = Footer {
        index_offset,
        index_size: index_bytes.len() as u64,
        filter_offset,
        filter_size: filter_bytes.len() as u64,
    };
    let footer_bytes = encode_to_vec(&footer, config)?;
    writer.write_all(&footer_bytes)?;
    writer.write_all(&(footer_bytes.len() as u32).to_le_bytes())?;

    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp_path, final_path)?;
    if let Some(parent) = final_path.parent() {
        File::open(parent)?.sync_all()?;
    }

    debug!(
        path = %final_path.display(),
        entries = entry_count,
        blocks = index.len(),
        "wrote sorted table"
    );
    Ok(())
}

fn flush_block(
    writer: &mut BufWriter<File>,
    block: &mut Vec<u8>,
    block_last_key: &mut Option<InternalKey>,
    index: &mut Vec<IndexEntry>,
    offset: &mut u64,
) -> Result<(), TableError> {
    let data = std::mem::take(block);
    let last_key = block_last_key
        .take()
        .ok_or_else(|| TableError::Internal("flushing a data block with no entries".into()))?;

    writer.write_all(&data)?;
    index.push(IndexEntry {
        last_key,
        offset: *offset,
        size: data.len() as u64,
    });
    *offset += data.len() as u64;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// An open sorted table: file handle plus the in-memory index and filter.
///
/// Immutable after open and safe to share across threads; data blocks are
/// read on demand through the block cache.
pub struct TableReader {
    file: File,
    file_num: u64,
    file_size: u64,
    index: Vec<IndexEntry>,
    filter: Bloom<[u8]>,
    block_cache: Arc<BlockCache>,
}

impl TableReader {
    /// Opens a table: reads the trailing footer length, the footer, and the
    /// filter and index blocks it points at.
    pub fn open(
        path: impl AsRef<Path>,
        file_num: u64,
        block_cache: Arc<BlockCache>,
    ) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < 4 {
            return Err(TableError::Internal("table file too small".into()));
        }

        let mut len_buf = [0u8; 4];
        file.read_exact_at(&mut len_buf, file_size - 4)?;
        let footer_len = u32::from_le_bytes(len_buf) as u64;
        if footer_len + 4 > file_size {
            return Err(TableError::Internal("footer length out of range".into()));
        }

        let config = standard().with_fixed_int_encoding();
        let mut footer_buf = vec![0u8; footer_len as usize];
        file.read_exact_at(&mut footer_buf, file_size - 4 - footer_len)?;
        let (footer, _) = decode_from_slice::<Footer, _>(&footer_buf, config)?;

        if footer.filter_offset.saturating_add(footer.filter_size) > file_size
            || footer.index_offset.saturating_add(footer.index_size) > file_size
        {
            return Err(TableError::Internal("footer block handles out of range".into()));
        }

        let mut filter_buf = vec![0u8; footer.filter_size as usize];
        file.read_exact_at(&mut filter_buf, footer.filter_offset)?;
        let filter = Bloom::from_slice(&filter_buf)
            .map_err(|e| TableError::Internal(e.to_string()))?;

        let mut index_buf = vec![0u8; footer.index_size as usize];
        file.read_exact_at(&mut index_buf, footer.index_offset)?;
        let (index, _) = decode_from_slice::<Vec<IndexEntry>, _>(&index_buf, config)?;

        trace!(path = %path.display(), file_num, blocks = index.len(), "opened sorted table");

        Ok(Self {
            file,
            file_num,
            file_size,
            index,
            filter,
            block_cache,
        })
    }

    pub fn file_num(&self) -> u64 {
        self.file_num
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Looks up the newest version of `user_key` in this table.
    ///
    /// Pipeline: Bloom gate → index binary search for the first block whose
    /// last key is at or past the synthesized lookup bound → in-block scan.
    /// The index bounds guarantee the key can only live in that one block,
    /// so a miss there is a definitive [`TableGetResult::NotFound`].
    pub fn get(&self, user_key: &[u8]) -> Result<TableGetResult, TableError> {
        if !self.filter.check(user_key) {
            trace!(file_num = self.file_num, "bloom filter negative");
            return Ok(TableGetResult::NotFound);
        }

        let lookup = InternalKey::lookup(user_key);
        let block_idx = self.index.partition_point(|e| e.last_key < lookup);
        if block_idx >= self.index.len() {
            return Ok(TableGetResult::NotFound);
        }

        let block = self.read_block(block_idx)?;
        let mut iter = BlockIterator::new(block);
        iter.seek_to_first();
        while iter.valid() {
            let key = iter.key();
            if key.user_key.as_slice() > user_key {
                break;
            }
            if key.user_key == user_key {
                // First hit is the newest version of the user key.
                return Ok(match key.op {
                    OpType::Put => TableGetResult::Put(iter.value().to_vec()),
                    OpType::Delete => TableGetResult::Tombstone,
                });
            }
            iter.next();
        }
        if let Some(e) = iter.into_error() {
            return Err(e);
        }
        Ok(TableGetResult::NotFound)
    }

    /// Whole-file iterator surfacing every internal key in order, including
    /// tombstones and shadowed versions.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator::new(Arc::clone(self))
    }

    /// Fetches one data block through the block cache, reading from disk on
    /// a miss.
    fn read_block(&self, block_idx: usize) -> Result<Arc<Vec<u8>>, TableError> {
        let entry = &self.index[block_idx];
        let cache_key = (self.file_num, entry.offset);

        if let Some(block) = self.block_cache.get(&cache_key) {
            trace!(file_num = self.file_num, offset = entry.offset, "block cache hit");
            return Ok(block);
        }

        let mut buf = vec![0u8; entry.size as usize];
        self.file.read_exact_at(&mut buf, entry.offset)?;
        let block = Arc::new(buf);
        let weight = block.len();
        self.block_cache.insert(cache_key, Arc::clone(&block), weight);
        trace!(file_num = self.file_num, offset = entry.offset, "block cache fill");
        Ok(block)
    }
}

// ------------------------------------------------------------------------------------------------
// Block iterator
// ------------------------------------------------------------------------------------------------

/// Forward iterator over the entries of a single data block.
///
/// Decodes the `[key_len][val_len][internal key][value]` framing one entry
/// at a time. On truncation or a decode failure the iterator records the
/// error and becomes invalid; higher layers surface it through `error()`.
pub struct BlockIterator {
    data: Arc<Vec<u8>>,
    cursor: usize,
    current: Option<(InternalKey, Vec<u8>)>,
    error: Option<TableError>,
}

impl BlockIterator {
    pub(crate) fn new(data: Arc<Vec<u8>>) -> Self {
        Self {
            data,
            cursor: 0,
            current: None,
            error: None,
        }
    }

    pub(crate) fn into_error(self) -> Option<TableError> {
        self.error
    }

    fn read_next(&mut self) {
        self.current = None;
        if self.cursor == self.data.len() {
            return;
        }
        if self.cursor + 8 > self.data.len() {
            self.error = Some(TableError::Internal("truncated block entry header".into()));
            return;
        }

        let key_len = u32::from_le_bytes(
            self.data[self.cursor..self.cursor + 4]
                .try_into()
                .expect("fixed slice"),
        ) as usize;
        let val_len = u32::from_le_bytes(
            self.data[self.cursor + 4..self.cursor + 8]
                .try_into()
                .expect("fixed slice"),
        ) as usize;
        let mut pos = self.cursor + 8;

        if pos + key_len + val_len > self.data.len() {
            self.error = Some(TableError::Internal("block entry exceeds block".into()));
            return;
        }

        let config = standard().with_fixed_int_encoding();
        let key = match decode_from_slice::<InternalKey, _>(&self.data[pos..pos + key_len], config)
        {
            Ok((key, _)) => key,
            Err(e) => {
                self.error = Some(TableError::Decode(e));
                return;
            }
        };
        pos += key_len;
        let value = self.data[pos..pos + val_len].to_vec();
        pos += val_len;

        self.cursor = pos;
        self.current = Some((key, value));
    }
}

impl KvIterator for BlockIterator {
    fn seek_to_first(&mut self) {
        self.cursor = 0;
        self.error = None;
        self.read_next();
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
            self.read_next();
        }
    }

    fn error(&self) -> Option<&TableError> {
        self.error.as_ref()
    }
}

// ------------------------------------------------------------------------------------------------
// File iterator
// ------------------------------------------------------------------------------------------------

/// Iterator over every entry of a sorted table, rolling from block to block.
pub struct TableIterator {
    table: Arc<TableReader>,
    block_idx: usize,
    block: Option<BlockIterator>,
    error: Option<TableError>,
}

impl TableIterator {
    fn new(table: Arc<TableReader>) -> Self {
        Self {
            table,
            block_idx: 0,
            block: None,
            error: None,
        }
    }

    fn load_block(&mut self) {
        if self.block_idx >= self.table.block_count() {
            self.block = None;
            return;
        }
        match self.table.read_block(self.block_idx) {
            Ok(data) => {
                let mut iter = BlockIterator::new(data);
                iter.seek_to_first();
                if !iter.valid() {
                    // An empty or undecodable block ends the iteration; a
                    // decode error is kept for error().
                    self.error = iter.into_error();
                    self.block = None;
                    return;
                }
                self.block = Some(iter);
            }
            Err(e) => {
                self.error = Some(e);
                self.block = None;
            }
        }
    }
}

impl KvIterator for TableIterator {
    fn seek_to_first(&mut self) {
        self.block_idx = 0;
        self.error = None;
        self.load_block();
    }

    fn valid(&self) -> bool {
        self.block.as_ref().is_some_and(|b| b.valid())
    }

    fn key(&self) -> &InternalKey {
        self.block.as_ref().expect("iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.block.as_ref().expect("iterator not valid").value()
    }

    fn next(&mut self) {
        let Some(block) = self.block.as_mut() else {
            return;
        };
        block.next();
        if !block.valid() {
            if block.error().is_some() {
                if let Some(block) = self.block.take() {
                    self.error = block.into_error();
                }
                return;
            }
            self.block_idx += 1;
            self.load_block();
        }
    }

    fn error(&self) -> Option<&TableError> {
        self.error
            .as_ref()
            .or_else(|| self.block.as_ref().and_then(|b| b.error()))
    }
}

// ------------------------------------------------------------------------------------------------
// Table cache
// ------------------------------------------------------------------------------------------------

/// Bounded cache of open [`TableReader`]s keyed by file number.
///
/// Shared by every lookup and iterator; readers are opened on demand and
/// evicted least-recently-used, or explicitly when compaction deletes
/// their file.
pub struct TableCache {
    dir: PathBuf,
    readers: LruCache<u64, Arc<TableReader>>,
    block_cache: Arc<BlockCache>,
}

impl TableCache {
    pub fn new(dir: PathBuf, capacity: usize, block_cache: Arc<BlockCache>) -> Self {
        Self {
            dir,
            readers: LruCache::new(capacity),
            block_cache,
        }
    }

    /// Returns the cached reader for `file_num`, opening it on a miss.
    pub fn get_or_open(&self, file_num: u64) -> Result<Arc<TableReader>, TableError> {
        if let Some(reader) = self.readers.get(&file_num) {
            return Ok(reader);
        }
        let path = sstable_path(&self.dir, file_num);
        let reader = Arc::new(TableReader::open(&path, file_num, Arc::clone(&self.block_cache))?);
        self.readers.insert(file_num, Arc::clone(&reader), 1);
        Ok(reader)
    }

    /// Drops the cached reader for a deleted table.
    pub fn evict(&self, file_num: u64) {
        if self.readers.remove(&file_num).is_some() {
            debug!(file_num, "evicted reader for removed table");
        }
    }
}
