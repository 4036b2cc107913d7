use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::storage::block::BlockId;
use crate::storage::file_manager::FileManager;
use crate::storage::page::{Page, INT_SIZE};
use crate::wal::iterator::LogIterator;
use crate::wal::record::Lsn;

struct LogState {
    page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

/// Append-only write-ahead log.
///
/// Each log block keeps a boundary pointer at offset 0; records are written
/// below it, from the end of the block toward the front, each as a
/// length-prefixed byte string. LSNs are an in-memory counter starting at 1
/// for every run and are never written to disk.
pub struct LogManager {
    fm: Arc<FileManager>,
    log_file: String,
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(fm: Arc<FileManager>, log_file: &str) -> Result<Self> {
        let block_size = fm.block_size();
        let mut page = Page::new(block_size);
        let len = fm.length(log_file)?;

        let current_block = if len == 0 {
            Self::append_new_block(&fm, log_file, &mut page)?
        } else {
            let block = BlockId::new(log_file, len - 1);
            fm.read(&block, &mut page)?;
            let boundary = page.get_int(0)?;
            if boundary < INT_SIZE as i32 || boundary as usize > block_size {
                return Err(DbError::CorruptLog(format!(
                    "boundary {} out of range in {}",
                    boundary, block
                )));
            }
            block
        };

        Ok(LogManager {
            fm,
            log_file: log_file.to_string(),
            state: Mutex::new(LogState {
                page,
                current_block,
                latest_lsn: 0,
                last_saved_lsn: 0,
            }),
        })
    }

    /// Append one record and return its LSN. The record is durable only after
    /// a `flush` covering that LSN.
    pub fn append(&self, record: &[u8]) -> Result<Lsn> {
        let block_size = self.fm.block_size();
        let max = self.max_record_len();
        if record.len() > max {
            return Err(DbError::RecordTooLarge {
                size: record.len(),
                max,
            });
        }
        let bytes_needed = record.len() + INT_SIZE;

        let mut state = self.state.lock();
        let mut boundary = state.page.get_int(0)? as usize;
        if boundary < bytes_needed + INT_SIZE {
            // Record does not fit below the boundary: move to a fresh block.
            self.flush_locked(&mut state)?;
            let LogState {
                page,
                current_block,
                ..
            } = &mut *state;
            *current_block = Self::append_new_block(&self.fm, &self.log_file, page)?;
            boundary = block_size;
        }

        let pos = boundary - bytes_needed;
        state.page.set_bytes(pos, record)?;
        state.page.set_int(0, pos as i32)?;
        state.latest_lsn += 1;
        Ok(state.latest_lsn)
    }

    /// Largest serialized record that fits one log block next to the
    /// boundary pointer and its own length prefix.
    pub fn max_record_len(&self) -> usize {
        self.fm.block_size() - 2 * INT_SIZE
    }

    /// Make every record up to `lsn` durable. No-op if already on disk.
    pub fn flush(&self, lsn: Lsn) -> Result<()> {
        let mut state = self.state.lock();
        if lsn > state.last_saved_lsn {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Flush the log, then iterate its records newest first.
    pub fn iterator(&self) -> Result<LogIterator> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        LogIterator::new(Arc::clone(&self.fm), state.current_block.clone())
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.state.lock().latest_lsn
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.state.lock().last_saved_lsn
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    fn flush_locked(&self, state: &mut LogState) -> Result<()> {
        self.fm.write(&state.current_block, &state.page)?;
        state.last_saved_lsn = state.latest_lsn;
        Ok(())
    }

    /// Write an empty block (boundary at the end) past the last log block.
    fn append_new_block(fm: &FileManager, log_file: &str, page: &mut Page) -> Result<BlockId> {
        let block = BlockId::new(log_file, fm.length(log_file)?);
        page.clear();
        page.set_int(0, fm.block_size() as i32)?;
        fm.write(&block, page)?;
        debug!(block = %block, "allocated log block");
        Ok(block)
    }
}
