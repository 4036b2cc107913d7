use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::manager::BufferManager;
use crate::concurrency::lock_table::LockTable;
use crate::concurrency::manager::ConcurrencyManager;
use crate::error::{DbError, Result};
use crate::storage::block::BlockId;
use crate::storage::file_manager::FileManager;
use crate::tx::buffer_list::BufferList;
use crate::tx::gate::CheckpointGate;
use crate::tx::recovery::RecoveryManager;
use crate::wal::log_manager::LogManager;
use crate::wal::record::TxId;

/// Transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Shared engine handles a transaction works against.
#[derive(Clone)]
pub struct TxContext {
    pub fm: Arc<FileManager>,
    pub log: Arc<LogManager>,
    pub bm: Arc<BufferManager>,
    pub locks: Arc<LockTable>,
    pub gate: Arc<CheckpointGate>,
}

/// A unit of work over pinned blocks.
///
/// Reads take shared locks and writes exclusive ones; all locks are held until
/// `commit` or `rollback`, after which the transaction is finished and every
/// further call fails with `TransactionFinished`. A lock or buffer timeout
/// (`DbError::is_abort`) leaves the transaction active; the caller must roll
/// it back. Dropping an active transaction rolls it back.
pub struct Transaction {
    txid: TxId,
    state: TxState,
    fm: Arc<FileManager>,
    bm: Arc<BufferManager>,
    gate: Arc<CheckpointGate>,
    recovery: RecoveryManager,
    concurrency: ConcurrencyManager,
    buffers: BufferList,
}

impl Transaction {
    /// Register with the checkpoint gate and write the Start record.
    pub fn begin(txid: TxId, ctx: &TxContext) -> Result<Self> {
        ctx.gate.enter();
        let recovery = match RecoveryManager::new(txid, Arc::clone(&ctx.log), Arc::clone(&ctx.bm)) {
            Ok(rm) => rm,
            Err(e) => {
                ctx.gate.leave();
                return Err(e);
            }
        };
        debug!(txid, "transaction started");

        Ok(Transaction {
            txid,
            state: TxState::Active,
            fm: Arc::clone(&ctx.fm),
            bm: Arc::clone(&ctx.bm),
            gate: Arc::clone(&ctx.gate),
            recovery,
            concurrency: ConcurrencyManager::new(Arc::clone(&ctx.locks)),
            buffers: BufferList::new(Arc::clone(&ctx.bm)),
        })
    }

    pub fn id(&self) -> TxId {
        self.txid
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DbError::TransactionFinished(self.txid))
        }
    }

    /// Pin `block` for the rest of the transaction (or until `unpin`).
    pub fn pin(&mut self, block: &BlockId) -> Result<()> {
        self.check_active()?;
        self.concurrency.s_lock(block)?;
        self.buffers.pin(block)?;
        Ok(())
    }

    /// Release one pin. Locks stay held.
    pub fn unpin(&mut self, block: &BlockId) -> Result<()> {
        self.check_active()?;
        self.buffers.unpin(block)
    }

    pub fn get_int(&mut self, block: &BlockId, offset: usize) -> Result<i32> {
        self.check_active()?;
        self.concurrency.s_lock(block)?;
        let id = self.buffers.buffer(block)?;
        self.bm.read_page(id, |page| page.get_int(offset))
    }

    pub fn get_string(&mut self, block: &BlockId, offset: usize) -> Result<String> {
        self.check_active()?;
        self.concurrency.s_lock(block)?;
        let id = self.buffers.buffer(block)?;
        self.bm.read_page(id, |page| page.get_string(offset))
    }

    /// Log the before-image, then write `value` at `offset`.
    pub fn set_int(&mut self, block: &BlockId, offset: usize, value: i32) -> Result<()> {
        self.check_active()?;
        self.concurrency.x_lock(block)?;
        let id = self.buffers.buffer(block)?;
        let lsn = self.recovery.set_int(id, offset, value)?;
        self.bm.write_page(id, |page| page.set_int(offset, value))?;
        self.bm.set_modified(id, self.txid, Some(lsn))
    }

    pub fn set_string(&mut self, block: &BlockId, offset: usize, value: &str) -> Result<()> {
        self.check_active()?;
        self.concurrency.x_lock(block)?;
        let id = self.buffers.buffer(block)?;
        let lsn = self.recovery.set_string(id, offset, value)?;
        self.bm.write_page(id, |page| page.set_string(offset, value))?;
        self.bm.set_modified(id, self.txid, Some(lsn))
    }

    /// Add a zero-filled block to `filename`. Concurrent appends to the same
    /// file are serialized through its end-of-file lock.
    pub fn append(&mut self, filename: &str) -> Result<BlockId> {
        self.check_active()?;
        self.concurrency.x_lock(&BlockId::end_of_file(filename))?;
        self.fm.append(filename)
    }

    /// Number of blocks in `filename`.
    pub fn size(&mut self, filename: &str) -> Result<u32> {
        self.check_active()?;
        self.concurrency.s_lock(&BlockId::end_of_file(filename))?;
        self.fm.length(filename)
    }

    pub fn block_size(&self) -> usize {
        self.fm.block_size()
    }

    pub fn available_buffers(&self) -> usize {
        self.bm.available()
    }

    /// Make every change durable, then release locks and pins. On error the
    /// transaction stays active and should be rolled back.
    pub fn commit(&mut self) -> Result<()> {
        self.check_active()?;
        self.recovery.commit()?;
        debug!(txid = self.txid, "transaction committed");
        self.finish(TxState::Committed)
    }

    /// Undo every change, then release locks and pins. If undo fails the
    /// transaction stays active with all its locks, so no other transaction
    /// sees the half-undone pages; call `rollback` again once the cause
    /// (usually a full buffer pool) is gone. Undo is idempotent.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_active()?;
        if let Err(e) = self.recovery.rollback() {
            warn!(txid = self.txid, error = %e, "rollback failed; locks kept");
            return Err(e);
        }
        debug!(txid = self.txid, "transaction rolled back");
        self.finish(TxState::RolledBack)
    }

    fn finish(&mut self, state: TxState) -> Result<()> {
        self.concurrency.release();
        let unpinned = self.buffers.unpin_all();
        self.state = state;
        self.gate.leave();
        unpinned
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            warn!(txid = self.txid, "active transaction dropped; rolling back");
            // Locks of a transaction that cannot be undone stay held until
            // restart recovery undoes it.
            if let Err(e) = self.rollback() {
                warn!(txid = self.txid, error = %e, "rollback on drop failed; locks stay held");
            }
        }
    }
}
