//! Read-only queries over the log, newest record first.

use crate::error::Result;
use crate::storage::block::BlockId;
use crate::wal::iterator::LogIterator;
use crate::wal::record::{LogRecord, TxId};

/// Every update record (`SetInt`, `SetString`, `RedoString`) that touched `block`.
pub fn modifications_of_block(iter: LogIterator, block: &BlockId) -> Result<Vec<LogRecord>> {
    let mut out = Vec::new();
    for record in iter.records() {
        let record = record?;
        if record.block() == Some(block) {
            out.push(record);
        }
    }
    Ok(out)
}

/// Every record written by transaction `txid`.
pub fn activity_of_transaction(iter: LogIterator, txid: TxId) -> Result<Vec<LogRecord>> {
    let mut out = Vec::new();
    for record in iter.records() {
        let record = record?;
        if record.txid() == Some(txid) {
            let is_start = matches!(record, LogRecord::Start { .. });
            out.push(record);
            // Nothing of this transaction precedes its Start record.
            if is_start {
                break;
            }
        }
    }
    Ok(out)
}
