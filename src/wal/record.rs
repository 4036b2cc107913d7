//! Log record types.
//!
//! Record format inside a log block (all integers big-endian):
//!   [op: u32] [payload...]
//!
//! Payloads:
//!   Checkpoint                     -
//!   Start / Commit / Rollback      txid
//!   SetInt                         txid, filename, block, offset, before: i32, after: i32
//!   SetString                      txid, filename, block, offset, before: str
//!   RedoString                     txid, filename, block, offset, after: str
//!
//! A string update is logged as a SetString (undo) followed by a RedoString
//! (redo), so each image only has to fit a log block on its own.
//!
//! Strings are a u32 length followed by UTF-8 bytes.

use std::fmt;

use crate::error::{DbError, Result};
use crate::storage::block::BlockId;

pub type TxId = u32;
pub type Lsn = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Checkpoint,
    Start {
        txid: TxId,
    },
    Commit {
        txid: TxId,
    },
    Rollback {
        txid: TxId,
    },
    SetInt {
        txid: TxId,
        block: BlockId,
        offset: u32,
        before: i32,
        after: i32,
    },
    SetString {
        txid: TxId,
        block: BlockId,
        offset: u32,
        before: String,
    },
    RedoString {
        txid: TxId,
        block: BlockId,
        offset: u32,
        after: String,
    },
}

pub const OP_CHECKPOINT: u32 = 0;
pub const OP_START: u32 = 1;
pub const OP_COMMIT: u32 = 2;
pub const OP_ROLLBACK: u32 = 3;
pub const OP_SET_INT: u32 = 4;
pub const OP_SET_STRING: u32 = 5;
pub const OP_REDO_STRING: u32 = 6;

impl LogRecord {
    pub fn op(&self) -> u32 {
        match self {
            LogRecord::Checkpoint => OP_CHECKPOINT,
            LogRecord::Start { .. } => OP_START,
            LogRecord::Commit { .. } => OP_COMMIT,
            LogRecord::Rollback { .. } => OP_ROLLBACK,
            LogRecord::SetInt { .. } => OP_SET_INT,
            LogRecord::SetString { .. } => OP_SET_STRING,
            LogRecord::RedoString { .. } => OP_REDO_STRING,
        }
    }

    /// Owning transaction; `None` for checkpoints.
    pub fn txid(&self) -> Option<TxId> {
        match self {
            LogRecord::Checkpoint => None,
            LogRecord::Start { txid }
            | LogRecord::Commit { txid }
            | LogRecord::Rollback { txid }
            | LogRecord::SetInt { txid, .. }
            | LogRecord::SetString { txid, .. }
            | LogRecord::RedoString { txid, .. } => Some(*txid),
        }
    }

    /// Target block of an update record.
    pub fn block(&self) -> Option<&BlockId> {
        match self {
            LogRecord::SetInt { block, .. }
            | LogRecord::SetString { block, .. }
            | LogRecord::RedoString { block, .. } => Some(block),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        put_u32(&mut buf, self.op());
        match self {
            LogRecord::Checkpoint => {}
            LogRecord::Start { txid }
            | LogRecord::Commit { txid }
            | LogRecord::Rollback { txid } => put_u32(&mut buf, *txid),
            LogRecord::SetInt {
                txid,
                block,
                offset,
                before,
                after,
            } => {
                put_target(&mut buf, *txid, block, *offset);
                buf.extend_from_slice(&before.to_be_bytes());
                buf.extend_from_slice(&after.to_be_bytes());
            }
            LogRecord::SetString {
                txid,
                block,
                offset,
                before,
            } => {
                put_target(&mut buf, *txid, block, *offset);
                put_str(&mut buf, before);
            }
            LogRecord::RedoString {
                txid,
                block,
                offset,
                after,
            } => {
                put_target(&mut buf, *txid, block, *offset);
                put_str(&mut buf, after);
            }
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut r = Reader { data, pos: 0 };
        let record = match r.u32()? {
            OP_CHECKPOINT => LogRecord::Checkpoint,
            OP_START => LogRecord::Start { txid: r.u32()? },
            OP_COMMIT => LogRecord::Commit { txid: r.u32()? },
            OP_ROLLBACK => LogRecord::Rollback { txid: r.u32()? },
            OP_SET_INT => {
                let (txid, block, offset) = r.target()?;
                LogRecord::SetInt {
                    txid,
                    block,
                    offset,
                    before: r.u32()? as i32,
                    after: r.u32()? as i32,
                }
            }
            OP_SET_STRING => {
                let (txid, block, offset) = r.target()?;
                LogRecord::SetString {
                    txid,
                    block,
                    offset,
                    before: r.string()?,
                }
            }
            OP_REDO_STRING => {
                let (txid, block, offset) = r.target()?;
                LogRecord::RedoString {
                    txid,
                    block,
                    offset,
                    after: r.string()?,
                }
            }
            op => return Err(DbError::CorruptLog(format!("unknown record op {}", op))),
        };
        if r.pos != data.len() {
            return Err(DbError::CorruptLog(format!(
                "{} trailing bytes after {} record",
                data.len() - r.pos,
                record.kind()
            )));
        }
        Ok(record)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Checkpoint => "CHECKPOINT",
            LogRecord::Start { .. } => "START",
            LogRecord::Commit { .. } => "COMMIT",
            LogRecord::Rollback { .. } => "ROLLBACK",
            LogRecord::SetInt { .. } => "SETINT",
            LogRecord::SetString { .. } => "SETSTRING",
            LogRecord::RedoString { .. } => "REDOSTRING",
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::Start { txid } => write!(f, "<START {}>", txid),
            LogRecord::Commit { txid } => write!(f, "<COMMIT {}>", txid),
            LogRecord::Rollback { txid } => write!(f, "<ROLLBACK {}>", txid),
            LogRecord::SetInt {
                txid,
                block,
                offset,
                before,
                after,
            } => write!(
                f,
                "<SETINT {} {} {} {} -> {}>",
                txid, block, offset, before, after
            ),
            LogRecord::SetString {
                txid,
                block,
                offset,
                before,
            } => write!(f, "<SETSTRING {} {} {} {:?}>", txid, block, offset, before),
            LogRecord::RedoString {
                txid,
                block,
                offset,
                after,
            } => write!(f, "<REDOSTRING {} {} {} {:?}>", txid, block, offset, after),
        }
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_target(buf: &mut Vec<u8>, txid: TxId, block: &BlockId, offset: u32) {
    put_u32(buf, txid);
    put_str(buf, block.filename());
    put_u32(buf, block.number());
    put_u32(buf, offset);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                DbError::CorruptLog(format!(
                    "record truncated: need {} bytes at {}, have {}",
                    n,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(b))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes)
            .map_err(|_| DbError::CorruptLog("string field is not valid UTF-8".into()))
    }

    fn target(&mut self) -> Result<(TxId, BlockId, u32)> {
        let txid = self.u32()?;
        let filename = self.string()?;
        let number = self.u32()?;
        let offset = self.u32()?;
        Ok((txid, BlockId::new(filename, number), offset))
    }
}
