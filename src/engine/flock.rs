//! Exclusive database-directory lock.
//!
//! An advisory `flock` on the `LOCK` file prevents a second process (or a
//! second handle in the same process) from opening the same database
//! directory. The pid is written into the file for debugging. The lock is
//! released by the OS when the file handle is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Held exclusive lock on a database directory.
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquires the lock, failing immediately (`WouldBlock`) when another
    /// holder exists.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
