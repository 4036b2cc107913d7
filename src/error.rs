use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::block::BlockId;
use crate::TxId;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer abort: no buffer available for {block} after {waited:?}")]
    BufferAbort { block: BlockId, waited: Duration },

    #[error("Lock abort: lock on {block} not granted after {waited:?}")]
    LockAbort { block: BlockId, waited: Duration },

    #[error("Checkpoint abort: transactions still active after {0:?}")]
    CheckpointAbort(Duration),

    #[error("Page access out of bounds: offset={offset}, len={len}, capacity={capacity}")]
    PageOutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("String field is not valid UTF-8")]
    InvalidString,

    #[error("Transaction {0} is no longer active")]
    TransactionFinished(TxId),

    #[error("Block {0} is not pinned by this transaction")]
    BlockNotPinned(BlockId),

    #[error("Buffer {0} is not pinned")]
    BufferNotPinned(usize),

    #[error("Invalid buffer handle: {0}")]
    InvalidBuffer(usize),

    #[error("Log record too large: {size} bytes, at most {max} fit in a log block")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Corrupt log: {0}")]
    CorruptLog(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database directory is locked by another process: {0}")]
    DirectoryLocked(PathBuf),
}

impl DbError {
    /// Timeouts the caller must answer by rolling back the owning transaction.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DbError::BufferAbort { .. } | DbError::LockAbort { .. } | DbError::CheckpointAbort(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
