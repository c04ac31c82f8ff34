//! Durable engine state.
//!
//! A single JSON document, `state.json`, records what must survive a
//! crash besides the WALs and the tables themselves: the next file number
//! to allocate and the active sorted-table set. It is rewritten after
//! every flush and compaction commit.
//!
//! Saves are atomic: the new document is written to a temporary file,
//! fsync'd, renamed over the old one, and the directory is fsync'd so the
//! rename itself is durable.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the state document inside the database directory.
pub const STATE_FILENAME: &str = "state.json";

/// Errors returned by state load/save.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed state document.
    #[error("State encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The durable record of the engine's on-disk layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Next file number to allocate (tables and rotated WALs share it).
    pub next_file_number: u64,

    /// File numbers of the sorted tables contributing to reads, ascending.
    pub active_sstables: Vec<u64>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_file_number: 1,
            active_sstables: Vec::new(),
        }
    }
}

/// Loads the state document, defaulting when none exists yet.
pub fn load(dir: &Path) -> Result<State, ManifestError> {
    let path = dir.join(STATE_FILENAME);
    match fs::read(&path) {
        Ok(bytes) => {
            let state: State = serde_json::from_slice(&bytes)?;
            debug!(
                next_file_number = state.next_file_number,
                active = state.active_sstables.len(),
                "loaded state"
            );
            Ok(state)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("state file not found, starting from defaults");
            Ok(State::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Atomically persists the state document.
pub fn save(dir: &Path, state: &State) -> Result<(), ManifestError> {
    let tmp_path = dir.join(format!("{STATE_FILENAME}.tmp"));
    let bytes = serde_json::to_vec_pretty(state)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, dir.join(STATE_FILENAME))?;
    File::open(dir)?.sync_all()?;

    debug!(
        next_file_number = state.next_file_number,
        active = state.active_sstables.len(),
        "saved state"
    );
    Ok(())
}
