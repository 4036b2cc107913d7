//! BlockDB: transactional block storage engine
//!
//! A directory of fixed-size-block files with:
//! - A pinning buffer pool with LRU replacement
//! - A write-ahead log holding before and after images
//! - Strict two-phase locking at block granularity
//! - Undo/redo restart recovery and quiescent checkpoints
//!
//! Higher layers (record pages, indexes, catalogs) work only through
//! [`Transaction`].

pub mod buffer;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod storage;
pub mod tx;
pub mod wal;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::buffer::BufferManager;
use crate::concurrency::{DirLock, LockTable};
use crate::storage::FileManager;
use crate::tx::gate::CheckpointGate;
use crate::tx::id::{TxIdAllocator, RECOVERY_TXID};
use crate::tx::recovery::recover;
use crate::wal::{audit, LogManager};

pub use crate::config::DbConfig;
pub use crate::error::{DbError, Result};
pub use crate::storage::{BlockId, FileStats, Page};
pub use crate::tx::{RecoveryReport, Transaction, TxContext, TxState};
pub use crate::wal::{LogRecord, Lsn, TxId};

/// Main database handle.
///
/// Owns the engine singletons for one directory. Transactions keep their own
/// handles to them and can be sent to other threads.
pub struct Database {
    config: DbConfig,
    ctx: TxContext,
    ids: TxIdAllocator,
    recovery: Option<RecoveryReport>,
    _dir_lock: DirLock,
}

impl Database {
    /// Open the database in `config.dir`, creating it if missing. An existing
    /// database is recovered before this returns.
    pub fn open(config: DbConfig) -> Result<Self> {
        config.validate()?;

        let fm = Arc::new(FileManager::new(
            &config.dir,
            config.block_size,
            config.sync_writes,
        )?);
        let dir_lock = DirLock::acquire(&config.dir)?;
        let removed = fm.remove_temp_files()?;

        let log = Arc::new(LogManager::new(Arc::clone(&fm), &config.log_file)?);
        let bm = Arc::new(BufferManager::new(
            Arc::clone(&fm),
            Arc::clone(&log),
            config.buffer_count,
            config.buffer_timeout,
        )?);

        let (recovery, ids) = if fm.is_new() {
            info!(dir = %config.dir.display(), "creating new database");
            (None, TxIdAllocator::new(RECOVERY_TXID + 1))
        } else {
            info!(dir = %config.dir.display(), temp_files_removed = removed, "recovering existing database");
            let report = recover(&log, &bm, RECOVERY_TXID)?;
            let ids = TxIdAllocator::after(report.max_txid);
            (Some(report), ids)
        };

        Ok(Database {
            ctx: TxContext {
                fm,
                log,
                bm,
                locks: Arc::new(LockTable::new(config.lock_timeout)),
                gate: Arc::new(CheckpointGate::new()),
            },
            config,
            ids,
            recovery,
            _dir_lock: dir_lock,
        })
    }

    /// Open `dir` with default settings.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(DbConfig::new(dir))
    }

    /// Start a transaction. Blocks while a checkpoint is running.
    pub fn new_transaction(&self) -> Result<Transaction> {
        Transaction::begin(self.ids.next_id(), &self.ctx)
    }

    /// Quiescent checkpoint: wait for active transactions to finish, keep new
    /// ones out, and write a Checkpoint record so recovery can stop there.
    pub fn checkpoint(&self) -> Result<()> {
        let log = &self.ctx.log;
        self.ctx.gate.quiesce(self.config.lock_timeout, || {
            let lsn = log.append(&LogRecord::Checkpoint.serialize())?;
            log.flush(lsn)
        })?;
        info!("checkpoint written");
        Ok(())
    }

    /// Log records that modified `block`, newest first.
    pub fn block_history(&self, block: &BlockId) -> Result<Vec<LogRecord>> {
        audit::modifications_of_block(self.ctx.log.iterator()?, block)
    }

    /// Log records of transaction `txid`, newest first.
    pub fn transaction_history(&self, txid: TxId) -> Result<Vec<LogRecord>> {
        audit::activity_of_transaction(self.ctx.log.iterator()?, txid)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// True when `open` created the directory.
    pub fn is_new(&self) -> bool {
        self.ctx.fm.is_new()
    }

    /// Report of the recovery run by `open`; `None` for a new database.
    pub fn recovery_report(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    pub fn file_stats(&self) -> FileStats {
        self.ctx.fm.stats()
    }

    pub fn block_size(&self) -> usize {
        self.ctx.fm.block_size()
    }

    pub fn available_buffers(&self) -> usize {
        self.ctx.bm.available()
    }

    pub fn active_transactions(&self) -> usize {
        self.ctx.gate.active()
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.ctx.bm
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.ctx.log
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.ctx.fm
    }
}
