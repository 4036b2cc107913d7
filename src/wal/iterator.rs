use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::storage::block::BlockId;
use crate::storage::file_manager::FileManager;
use crate::storage::page::{Page, INT_SIZE};
use crate::wal::record::LogRecord;

/// Walks the log from its most recent record back to the first one.
///
/// Reads blocks straight from disk, so it only sees records that were flushed
/// before it was created. Yields raw record bytes; see [`LogIterator::records`]
/// for decoded records. Stops after the first error.
pub struct LogIterator {
    fm: Arc<FileManager>,
    block: BlockId,
    page: Page,
    pos: usize,
    done: bool,
}

impl LogIterator {
    pub(crate) fn new(fm: Arc<FileManager>, block: BlockId) -> Result<Self> {
        let page = Page::new(fm.block_size());
        let mut iter = LogIterator {
            fm,
            block,
            page,
            pos: 0,
            done: false,
        };
        iter.move_to_block(iter.block.clone())?;
        Ok(iter)
    }

    /// Open the log file directly, without a `LogManager`. Used by offline
    /// tools that must not append to the log.
    pub fn open(fm: Arc<FileManager>, log_file: &str) -> Result<Self> {
        let len = fm.length(log_file)?;
        let mut iter = LogIterator {
            page: Page::new(fm.block_size()),
            block: BlockId::new(log_file, 0),
            fm,
            pos: 0,
            done: len == 0,
        };
        if len > 0 {
            iter.move_to_block(BlockId::new(log_file, len - 1))?;
        }
        Ok(iter)
    }

    /// Decoded records, newest first.
    pub fn records(self) -> impl Iterator<Item = Result<LogRecord>> {
        self.map(|bytes| bytes.and_then(|b| LogRecord::deserialize(&b)))
    }

    fn move_to_block(&mut self, block: BlockId) -> Result<()> {
        self.fm.read(&block, &mut self.page)?;
        let boundary = self.page.get_int(0)?;
        if boundary < INT_SIZE as i32 || boundary as usize > self.page.capacity() {
            return Err(DbError::CorruptLog(format!(
                "boundary {} out of range in {}",
                boundary, block
            )));
        }
        self.pos = boundary as usize;
        self.block = block;
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        while self.pos >= self.page.capacity() {
            if self.block.number() == 0 {
                return Ok(None);
            }
            let prev = BlockId::new(self.block.filename(), self.block.number() - 1);
            self.move_to_block(prev)?;
        }

        let record = self.page.get_bytes(self.pos).map_err(|_| {
            DbError::CorruptLog(format!(
                "unreadable record at offset {} in {}",
                self.pos, self.block
            ))
        })?;
        self.pos += INT_SIZE + record.len();
        Ok(Some(record))
    }
}

impl Iterator for LogIterator {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
