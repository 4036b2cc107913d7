use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::manager::{BufferId, BufferManager};
use crate::error::{DbError, Result};
use crate::storage::block::BlockId;

/// Blocks pinned by one transaction, with a per-transaction pin count so a
/// repeated pin does not touch the shared pool.
pub struct BufferList {
    bm: Arc<BufferManager>,
    pins: HashMap<BlockId, (BufferId, u32)>,
}

impl BufferList {
    pub fn new(bm: Arc<BufferManager>) -> Self {
        BufferList {
            bm,
            pins: HashMap::new(),
        }
    }

    pub fn pin(&mut self, block: &BlockId) -> Result<BufferId> {
        if let Some((id, count)) = self.pins.get_mut(block) {
            *count += 1;
            return Ok(*id);
        }
        let id = self.bm.pin(block)?;
        self.pins.insert(block.clone(), (id, 1));
        Ok(id)
    }

    /// Releases the pool pin when the last matching unpin arrives.
    pub fn unpin(&mut self, block: &BlockId) -> Result<()> {
        let (id, count) = self
            .pins
            .get_mut(block)
            .ok_or_else(|| DbError::BlockNotPinned(block.clone()))?;
        *count -= 1;
        if *count == 0 {
            let id = *id;
            self.pins.remove(block);
            self.bm.unpin(id)?;
        }
        Ok(())
    }

    pub fn buffer(&self, block: &BlockId) -> Result<BufferId> {
        self.pins
            .get(block)
            .map(|(id, _)| *id)
            .ok_or_else(|| DbError::BlockNotPinned(block.clone()))
    }

    /// Drop every pin. Keeps going after a failure and reports the first one.
    pub fn unpin_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for (_, (id, _)) in self.pins.drain() {
            if let Err(e) = self.bm.unpin(id) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of distinct blocks pinned.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
