use std::sync::atomic::{AtomicU32, Ordering};

use crate::wal::record::TxId;

/// Id under which restart recovery writes. Never handed to a user transaction.
pub const RECOVERY_TXID: TxId = 0;

/// Hands out increasing transaction ids for one open database.
#[derive(Debug)]
pub struct TxIdAllocator {
    next: AtomicU32,
}

impl TxIdAllocator {
    /// Ids start at `first`, or at 1 if `first` is the recovery id.
    pub fn new(first: TxId) -> Self {
        TxIdAllocator {
            next: AtomicU32::new(first.max(RECOVERY_TXID + 1)),
        }
    }

    /// First id after every id already present in the log.
    pub fn after(max_seen: TxId) -> Self {
        Self::new(max_seen.saturating_add(1))
    }

    pub fn next_id(&self) -> TxId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek(&self) -> TxId {
        self.next.load(Ordering::SeqCst)
    }
}
