use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::manager::{BufferId, BufferManager};
use crate::error::{DbError, Result};
use crate::storage::block::BlockId;
use crate::storage::page::Page;
use crate::wal::log_manager::LogManager;
use crate::wal::record::{LogRecord, Lsn, TxId};

/// Log bookkeeping for one transaction.
///
/// Every update is logged with its before and after image before the page is
/// touched. Commit forces the transaction's pages and then its Commit record;
/// rollback walks the log backward restoring before-images.
pub struct RecoveryManager {
    txid: TxId,
    log: Arc<LogManager>,
    bm: Arc<BufferManager>,
}

impl RecoveryManager {
    /// Writes the transaction's Start record.
    pub fn new(txid: TxId, log: Arc<LogManager>, bm: Arc<BufferManager>) -> Result<Self> {
        log.append(&LogRecord::Start { txid }.serialize())?;
        Ok(RecoveryManager { txid, log, bm })
    }

    /// Log the change of the int at `offset` in pinned buffer `id` to
    /// `new_value`. Returns the LSN to stamp on the buffer.
    pub fn set_int(&self, id: BufferId, offset: usize, new_value: i32) -> Result<Lsn> {
        let block = self.pinned_block(id)?;
        let before = self.bm.read_page(id, |page| page.get_int(offset))?;
        self.append(&LogRecord::SetInt {
            txid: self.txid,
            block,
            offset: offset as u32,
            before,
            after: new_value,
        })
    }

    /// Log the change of the string at `offset` in pinned buffer `id` as an
    /// undo record followed by a redo record; returns the redo record's LSN.
    /// Fails without logging if `new_value` would not fit in the page, or if
    /// either record would not fit in a log block.
    pub fn set_string(&self, id: BufferId, offset: usize, new_value: &str) -> Result<Lsn> {
        let block = self.pinned_block(id)?;
        let before = self.bm.read_page(id, |page| {
            let needed = Page::encoded_len(new_value);
            if offset.checked_add(needed).map_or(true, |end| end > page.capacity()) {
                return Err(DbError::PageOutOfBounds {
                    offset,
                    len: needed,
                    capacity: page.capacity(),
                });
            }
            page.get_string(offset)
        })?;
        let undo = LogRecord::SetString {
            txid: self.txid,
            block: block.clone(),
            offset: offset as u32,
            before,
        }
        .serialize();
        let redo = LogRecord::RedoString {
            txid: self.txid,
            block,
            offset: offset as u32,
            after: new_value.to_string(),
        }
        .serialize();

        let max = self.log.max_record_len();
        if let Some(size) = [undo.len(), redo.len()].into_iter().find(|len| *len > max) {
            return Err(DbError::RecordTooLarge { size, max });
        }
        self.log.append(&undo)?;
        self.log.append(&redo)
    }

    pub fn commit(&self) -> Result<()> {
        self.bm.flush_all(self.txid)?;
        let lsn = self.append(&LogRecord::Commit { txid: self.txid })?;
        self.log.flush(lsn)
    }

    pub fn rollback(&self) -> Result<()> {
        let undone = self.undo_own_updates()?;
        debug!(txid = self.txid, undone, "undid updates");
        self.bm.flush_all(self.txid)?;
        let lsn = self.append(&LogRecord::Rollback { txid: self.txid })?;
        self.log.flush(lsn)
    }

    fn undo_own_updates(&self) -> Result<usize> {
        let mut undone = 0;
        for record in self.log.iterator()?.records() {
            let record = record?;
            if record.txid() != Some(self.txid) {
                continue;
            }
            if matches!(record, LogRecord::Start { .. }) {
                break;
            }
            if undo(&self.bm, self.txid, &record)? {
                undone += 1;
            }
        }
        Ok(undone)
    }

    fn pinned_block(&self, id: BufferId) -> Result<BlockId> {
        self.bm
            .block_of(id)?
            .ok_or(DbError::BufferNotPinned(id.index()))
    }

    fn append(&self, record: &LogRecord) -> Result<Lsn> {
        self.log.append(&record.serialize())
    }
}

/// Transactions found in the log since the last checkpoint.
#[derive(Debug, Clone, Default)]
pub struct LogAnalysis {
    /// Records newer than the checkpoint, newest first.
    pub records: Vec<LogRecord>,
    pub committed: BTreeSet<TxId>,
    pub rolled_back: BTreeSet<TxId>,
    pub incomplete: BTreeSet<TxId>,
    /// Highest transaction id anywhere in the log, checkpoint or not.
    pub max_txid: TxId,
    pub found_checkpoint: bool,
}

/// Classify every transaction after the most recent checkpoint.
pub fn analyze<I>(records: I) -> Result<LogAnalysis>
where
    I: IntoIterator<Item = Result<LogRecord>>,
{
    let mut analysis = LogAnalysis::default();
    let mut seen = BTreeSet::new();
    let mut iter = records.into_iter();

    for record in iter.by_ref() {
        let record = record?;
        if let Some(txid) = record.txid() {
            analysis.max_txid = analysis.max_txid.max(txid);
            seen.insert(txid);
        }
        match &record {
            LogRecord::Checkpoint => {
                analysis.found_checkpoint = true;
                break;
            }
            LogRecord::Commit { txid } => {
                analysis.committed.insert(*txid);
            }
            LogRecord::Rollback { txid } => {
                analysis.rolled_back.insert(*txid);
            }
            _ => {}
        }
        analysis.records.push(record);
    }

    // Older records only matter for keeping transaction ids unique.
    for record in iter {
        if let Some(txid) = record?.txid() {
            analysis.max_txid = analysis.max_txid.max(txid);
        }
    }

    analysis.incomplete = seen
        .into_iter()
        .filter(|t| !analysis.committed.contains(t) && !analysis.rolled_back.contains(t))
        .collect();
    Ok(analysis)
}

/// Outcome of restart recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub records_scanned: usize,
    pub committed: Vec<TxId>,
    pub rolled_back: Vec<TxId>,
    pub incomplete: Vec<TxId>,
    pub redone: usize,
    pub undone: usize,
    pub max_txid: TxId,
}

/// Restart recovery. Must run before any transaction starts.
///
/// Redoes the updates of committed transactions oldest first, then undoes the
/// updates of transactions with neither Commit nor Rollback newest first. The
/// repaired pages are written under `txid`, followed by a Checkpoint record.
pub fn recover(log: &LogManager, bm: &BufferManager, txid: TxId) -> Result<RecoveryReport> {
    let analysis = analyze(log.iterator()?.records())?;

    let mut redone = 0;
    for record in analysis.records.iter().rev() {
        if record.txid().is_some_and(|t| analysis.committed.contains(&t)) && redo(bm, txid, record)? {
            redone += 1;
        }
    }

    let mut undone = 0;
    for record in analysis.records.iter() {
        if record.txid().is_some_and(|t| analysis.incomplete.contains(&t)) && undo(bm, txid, record)? {
            undone += 1;
        }
    }

    bm.flush_all(txid)?;
    let lsn = log.append(&LogRecord::Checkpoint.serialize())?;
    log.flush(lsn)?;

    let report = RecoveryReport {
        records_scanned: analysis.records.len(),
        committed: analysis.committed.into_iter().collect(),
        rolled_back: analysis.rolled_back.into_iter().collect(),
        incomplete: analysis.incomplete.into_iter().collect(),
        redone,
        undone,
        max_txid: analysis.max_txid,
    };
    info!(
        records = report.records_scanned,
        committed = report.committed.len(),
        incomplete = report.incomplete.len(),
        redone,
        undone,
        "recovery complete"
    );
    Ok(report)
}

/// Restore the before-image of an update record. Returns false for records
/// that carry no update.
fn undo(bm: &BufferManager, txid: TxId, record: &LogRecord) -> Result<bool> {
    match record {
        LogRecord::SetInt {
            block,
            offset,
            before,
            ..
        } => write_through(bm, txid, block, |page| page.set_int(*offset as usize, *before))?,
        LogRecord::SetString {
            block,
            offset,
            before,
            ..
        } => write_through(bm, txid, block, |page| {
            page.set_string(*offset as usize, before)
        })?,
        LogRecord::Checkpoint
        | LogRecord::Start { .. }
        | LogRecord::Commit { .. }
        | LogRecord::Rollback { .. }
        | LogRecord::RedoString { .. } => return Ok(false),
    }
    Ok(true)
}

/// Re-apply the after-image of an update record.
fn redo(bm: &BufferManager, txid: TxId, record: &LogRecord) -> Result<bool> {
    match record {
        LogRecord::SetInt {
            block,
            offset,
            after,
            ..
        } => write_through(bm, txid, block, |page| page.set_int(*offset as usize, *after))?,
        LogRecord::RedoString {
            block,
            offset,
            after,
            ..
        } => write_through(bm, txid, block, |page| page.set_string(*offset as usize, after))?,
        LogRecord::Checkpoint
        | LogRecord::Start { .. }
        | LogRecord::Commit { .. }
        | LogRecord::Rollback { .. }
        | LogRecord::SetString { .. } => return Ok(false),
    }
    Ok(true)
}

/// Pin `block`, apply `f`, mark the buffer modified by `txid` without a new
/// LSN, and unpin.
fn write_through<F>(bm: &BufferManager, txid: TxId, block: &BlockId, f: F) -> Result<()>
where
    F: FnOnce(&mut Page) -> Result<()>,
{
    if block.is_end_of_file() {
        return Err(DbError::CorruptLog(format!("update record targets {}", block)));
    }
    let id = bm.pin(block)?;
    let result = bm
        .write_page(id, f)
        .and_then(|()| bm.set_modified(id, txid, None));
    bm.unpin(id)?;
    result
}
