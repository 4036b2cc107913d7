use std::collections::HashMap;
use std::sync::Arc;

use crate::concurrency::lock_table::LockTable;
use crate::error::Result;
use crate::storage::block::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Locks held by one transaction. Requests for a lock already held are free;
/// everything is released together at commit or rollback.
pub struct ConcurrencyManager {
    table: Arc<LockTable>,
    held: HashMap<BlockId, LockMode>,
}

impl ConcurrencyManager {
    pub fn new(table: Arc<LockTable>) -> Self {
        ConcurrencyManager {
            table,
            held: HashMap::new(),
        }
    }

    pub fn s_lock(&mut self, block: &BlockId) -> Result<()> {
        if !self.held.contains_key(block) {
            self.table.s_lock(block)?;
            self.held.insert(block.clone(), LockMode::Shared);
        }
        Ok(())
    }

    /// Takes a shared lock first if needed, then upgrades it.
    pub fn x_lock(&mut self, block: &BlockId) -> Result<()> {
        if self.mode(block) != Some(LockMode::Exclusive) {
            self.s_lock(block)?;
            self.table.x_lock(block)?;
            self.held.insert(block.clone(), LockMode::Exclusive);
        }
        Ok(())
    }

    pub fn release(&mut self) {
        for block in self.held.keys() {
            self.table.unlock(block);
        }
        self.held.clear();
    }

    pub fn mode(&self, block: &BlockId) -> Option<LockMode> {
        self.held.get(block).copied()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}
