//! Write-Ahead Log (WAL).
//!
//! A durable, append-only log of every mutation, written **before** the
//! corresponding memtable insert so that a crash between the two never
//! leaves a visible-but-unlogged write.
//!
//! # On-disk layout
//!
//! One record per mutation, all integers little-endian:
//!
//! ```text
//! [crc32(4)] [seq(8)] [key_len(4)] [val_len(4)] [op(1)] [key] [value]
//! ```
//!
//! The checksum covers everything after itself — the 17-byte header plus
//! key and value bytes.
//!
//! # Concurrency model
//!
//! Appends are serialized by an internal mutex so records never interleave.
//! Each append flushes the userspace buffer to the OS; callers requesting
//! synchronous durability additionally get an fsync before the append
//! returns.
//!
//! # Replay
//!
//! [`replay`] reads records sequentially and stops at the first checksum
//! mismatch or short read. The tail of a crashed WAL may be torn; records
//! before the tear are still valid and are returned.
//!
//! # Rotation
//!
//! Rotation is driven by the engine: when a flush starts, the active WAL is
//! renamed to `wal-NNNNN.log` (NNNNN matching the sorted table that will
//! absorb its contents) and a fresh active WAL is opened. Rotated WALs are
//! deleted only after that table is durably registered in the active set.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{error, trace, warn};

use crate::key::{InternalKey, OpType};

/// Fixed header after the checksum: seq (8) + key_len (4) + val_len (4) + op (1).
const RECORD_HEADER_SIZE: usize = 17;
const CHECKSUM_SIZE: usize = 4;

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Sequence number assigned before the append.
    pub seq: u64,

    /// Put or Delete.
    pub op: OpType,

    /// User key bytes.
    pub key: Vec<u8>,

    /// Value bytes; empty for deletes.
    pub value: Vec<u8>,
}

impl WalEntry {
    /// The internal key this entry maps to in the memtable.
    pub fn internal_key(&self) -> InternalKey {
        InternalKey::new(self.key.clone(), self.seq, self.op)
    }
}

/// Append-only log handle for one memtable generation.
pub struct Wal {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl Wal {
    /// Opens (or creates) a WAL file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Appends one record.
    ///
    /// The full record is built in a single buffer, checksummed, and written
    /// under the mutex so concurrent appenders never interleave bytes. The
    /// userspace buffer is always flushed to the OS; `sync` additionally
    /// forces an fsync before returning.
    pub fn append(&self, entry: &WalEntry, sync: bool) -> Result<(), WalError> {
        let mut buf =
            Vec::with_capacity(RECORD_HEADER_SIZE + entry.key.len() + entry.value.len());
        buf.extend_from_slice(&entry.seq.to_le_bytes());
        buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
        buf.push(entry.op.as_byte());
        buf.extend_from_slice(&entry.key);
        buf.extend_from_slice(&entry.value);

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        let checksum = hasher.finalize();

        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))?;
        guard.write_all(&checksum.to_le_bytes())?;
        guard.write_all(&buf)?;
        guard.flush()?;
        if sync {
            guard.get_ref().sync_all()?;
        }

        trace!(seq = entry.seq, bytes = buf.len() + CHECKSUM_SIZE, "appended WAL record");
        Ok(())
    }

    /// Flushes buffered bytes and fsyncs the file.
    pub fn sync(&self) -> Result<(), WalError> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))?;
        guard.flush()?;
        guard.get_ref().sync_all()?;
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = guard.flush().and_then(|_| guard.get_ref().sync_all()) {
            error!(path = %self.path.display(), %e, "failed to sync WAL on drop");
        }
    }
}

/// Replays all intact records from a WAL file.
///
/// Returns the records in append order plus the maximum sequence number
/// seen. Replay stops at the first checksum mismatch or short read — a
/// crashed writer may leave a torn tail, and everything before the tear is
/// still valid. A missing file yields an empty replay.
pub fn replay(path: impl AsRef<Path>) -> Result<(Vec<WalEntry>, u64), WalError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut entries = Vec::new();
    let mut max_seq = 0u64;
    let mut pos = 0u64;

    loop {
        let mut checksum_buf = [0u8; CHECKSUM_SIZE];
        match reader.read_exact(&mut checksum_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let stored_checksum = u32::from_le_bytes(checksum_buf);

        let mut header = [0u8; RECORD_HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), offset = pos, "torn WAL record header, stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let seq = u64::from_le_bytes(header[0..8].try_into().expect("fixed slice"));
        let key_len = u32::from_le_bytes(header[8..12].try_into().expect("fixed slice")) as u64;
        let val_len = u32::from_le_bytes(header[12..16].try_into().expect("fixed slice")) as u64;
        let op_byte = header[16];

        // A corrupt length prefix would point past the end of the file;
        // treat it like any other torn tail rather than allocating for it.
        let record_end = pos
            + (CHECKSUM_SIZE + RECORD_HEADER_SIZE) as u64
            + key_len
            + val_len;
        if record_end > file_len {
            warn!(path = %path.display(), offset = pos, "WAL record length exceeds file, stopping replay");
            break;
        }

        let mut kv = vec![0u8; (key_len + val_len) as usize];
        match reader.read_exact(&mut kv) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), offset = pos, "torn WAL record body, stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let mut hasher = Crc32::new();
        hasher.update(&header);
        hasher.update(&kv);
        if hasher.finalize() != stored_checksum {
            warn!(path = %path.display(), offset = pos, "WAL checksum mismatch, stopping replay");
            break;
        }

        let Some(op) = OpType::from_byte(op_byte) else {
            warn!(path = %path.display(), offset = pos, op_byte, "unknown WAL op, stopping replay");
            break;
        };

        let value = kv.split_off(key_len as usize);
        entries.push(WalEntry {
            seq,
            op,
            key: kv,
            value,
        });
        if seq > max_seq {
            max_seq = seq;
        }
        pos = record_end;
    }

    trace!(path = %path.display(), records = entries.len(), max_seq, "WAL replay finished");
    Ok((entries, max_seq))
}
