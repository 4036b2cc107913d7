//! Concurrency control.
//!
//! Thread-level: block locks in a shared `LockTable`, tracked per transaction
//! by a `ConcurrencyManager` (strict two-phase locking).
//! Process-level: an fs4 file lock so only one process opens a directory.

pub mod lock_table;
pub mod manager;

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

use crate::error::{DbError, Result};

pub use lock_table::{LockGrant, LockTable};
pub use manager::{ConcurrencyManager, LockMode};

pub const LOCK_FILE_NAME: &str = "blockdb.lock";

/// Exclusive ownership of a database directory, held until dropped.
pub struct DirLock {
    lock_file: File,
    lock_path: PathBuf,
}

impl DirLock {
    /// Lock `dir`, failing immediately if another handle holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        match FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => {
                debug!(path = %lock_path.display(), "acquired directory lock");
                Ok(DirLock {
                    lock_file,
                    lock_path,
                })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(DbError::DirectoryLocked(dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            warn!(path = %self.lock_path.display(), error = %e, "failed to release directory lock");
        }
    }
}
