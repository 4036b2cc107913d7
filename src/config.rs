//! Database configuration.
//!
//! `DbConfig` carries everything `Database::open` needs. Values come from the
//! builder setters or from environment variables:
//!
//! - `BLOCKDB_BLOCK_SIZE`: block size in bytes (default: `400`)
//! - `BLOCKDB_BUFFERS`: buffer pool capacity (default: `8`)
//! - `BLOCKDB_LOG_FILE`: log file name inside the directory (default: `blockdb.log`)
//! - `BLOCKDB_TIMEOUT_MS`: buffer and lock wait timeout (default: `10000`)
//! - `BLOCKDB_SYNC_WRITES`: `true`/`false`, sync every block write (default: `true`)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::storage::page::INT_SIZE;

/// Longest file name whose `SetInt` record still fits a minimum-size log block.
pub const MIN_LOGGED_FILENAME_LEN: usize = 32;

/// Smallest block whose log can hold one `SetInt` record: the boundary
/// pointer and length prefix, seven 4-byte fields, and the file name.
pub const MIN_BLOCK_SIZE: usize = 2 * INT_SIZE + 7 * INT_SIZE + MIN_LOGGED_FILENAME_LEN;

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory holding table files, the log and the lock file.
    pub dir: PathBuf,
    pub block_size: usize,
    pub buffer_count: usize,
    pub log_file: String,
    /// How long `pin` waits for an unpinned buffer.
    pub buffer_timeout: Duration,
    /// How long `s_lock`/`x_lock` wait for a conflicting grant to go away.
    pub lock_timeout: Duration,
    /// Call `sync_data` after every block write.
    pub sync_writes: bool,
}

impl DbConfig {
    pub const DEFAULT_BLOCK_SIZE: usize = 400;
    pub const DEFAULT_BUFFER_COUNT: usize = 8;
    pub const DEFAULT_LOG_FILE: &'static str = "blockdb.log";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(dir: impl AsRef<Path>) -> Self {
        DbConfig {
            dir: dir.as_ref().to_path_buf(),
            block_size: Self::DEFAULT_BLOCK_SIZE,
            buffer_count: Self::DEFAULT_BUFFER_COUNT,
            log_file: Self::DEFAULT_LOG_FILE.to_string(),
            buffer_timeout: Self::DEFAULT_TIMEOUT,
            lock_timeout: Self::DEFAULT_TIMEOUT,
            sync_writes: true,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_log_file(mut self, log_file: impl Into<String>) -> Self {
        self.log_file = log_file.into();
        self
    }

    /// Sets both the buffer and the lock wait timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout = timeout;
        self.lock_timeout = timeout;
        self
    }

    pub fn with_buffer_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(&self.log_file)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(DbError::Config(format!(
                "block size {} is below the minimum of {}",
                self.block_size, MIN_BLOCK_SIZE
            )));
        }
        if self.block_size > i32::MAX as usize {
            return Err(DbError::Config(format!(
                "block size {} does not fit a 4-byte boundary pointer",
                self.block_size
            )));
        }
        if self.buffer_count == 0 {
            return Err(DbError::Config("buffer pool needs at least one buffer".into()));
        }
        if self.log_file.is_empty() {
            return Err(DbError::Config("log file name must not be empty".into()));
        }
        if self.buffer_timeout.is_zero() || self.lock_timeout.is_zero() {
            return Err(DbError::Config("wait timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Build a config for `dir` from `BLOCKDB_*` environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are an error.
    pub fn from_env(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_lookup(dir, |name| std::env::var(name).ok())
    }

    fn from_lookup<F>(dir: impl AsRef<Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = DbConfig::new(dir);

        if let Some(v) = parse_var::<usize, _>(&lookup, "BLOCKDB_BLOCK_SIZE")? {
            config.block_size = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "BLOCKDB_BUFFERS")? {
            config.buffer_count = v;
        }
        if let Some(v) = lookup("BLOCKDB_LOG_FILE") {
            config.log_file = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "BLOCKDB_TIMEOUT_MS")? {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, "BLOCKDB_SYNC_WRITES")? {
            config.sync_writes = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| DbError::Config(format!("invalid value for {}: '{}'", name, raw))),
    }
}
