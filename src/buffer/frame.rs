use crate::error::Result;
use crate::storage::block::BlockId;
use crate::storage::file_manager::FileManager;
use crate::storage::page::Page;
use crate::wal::log_manager::LogManager;
use crate::wal::record::{Lsn, TxId};

/// One slot of the buffer pool: a page plus the block it currently mirrors.
pub struct Frame {
    page: Page,
    block: Option<BlockId>,
    pins: u32,
    modified_by: Option<TxId>,
    lsn: Option<Lsn>,
}

impl Frame {
    pub fn new(block_size: usize) -> Self {
        Frame {
            page: Page::new(block_size),
            block: None,
            pins: 0,
            modified_by: None,
            lsn: None,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }

    pub fn pins(&self) -> u32 {
        self.pins
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    pub fn is_dirty(&self) -> bool {
        self.modified_by.is_some()
    }

    pub fn modifying_tx(&self) -> Option<TxId> {
        self.modified_by
    }

    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    pub(crate) fn pin(&mut self) {
        self.pins += 1;
    }

    /// Returns the remaining pin count.
    pub(crate) fn unpin(&mut self) -> u32 {
        self.pins -= 1;
        self.pins
    }

    /// Mark the page as changed by `txid`. `lsn` is the log record covering
    /// the change; updates without one (recovery writes) keep the old LSN.
    pub(crate) fn set_modified(&mut self, txid: TxId, lsn: Option<Lsn>) {
        self.modified_by = Some(txid);
        if lsn.is_some() {
            self.lsn = lsn;
        }
    }

    /// Write the page back if dirty, forcing the log first.
    pub(crate) fn flush(&mut self, fm: &FileManager, log: &LogManager) -> Result<()> {
        if self.modified_by.is_none() {
            return Ok(());
        }
        if let Some(lsn) = self.lsn {
            log.flush(lsn)?;
        }
        if let Some(block) = &self.block {
            fm.write(block, &self.page)?;
        }
        self.modified_by = None;
        Ok(())
    }

    /// Load `block` into this frame. The frame must already be flushed.
    pub(crate) fn load(&mut self, block: BlockId, fm: &FileManager) -> Result<()> {
        self.block = None;
        self.lsn = None;
        self.pins = 0;
        if let Err(e) = fm.read(&block, &mut self.page) {
            self.page.clear();
            return Err(e);
        }
        self.block = Some(block);
        Ok(())
    }
}
