//! In-memory image of one block.
//!
//! Integers are 4-byte big-endian. Byte arrays and strings are stored as a
//! 4-byte length followed by the raw bytes (strings as UTF-8), with no
//! terminator. Every access is bounds-checked against the fixed capacity.

use crate::error::{DbError, Result};

pub const INT_SIZE: usize = 4;

#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    /// Zero-filled page of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Page {
            data: vec![0u8; capacity],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Page { data }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Bytes a string occupies once encoded: length prefix plus UTF-8 payload.
    pub fn encoded_len(s: &str) -> usize {
        INT_SIZE + s.len()
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(DbError::PageOutOfBounds {
                offset,
                len,
                capacity: self.data.len(),
            }),
        }
    }

    pub fn get_int(&self, offset: usize) -> Result<i32> {
        self.check(offset, INT_SIZE)?;
        let mut buf = [0u8; INT_SIZE];
        buf.copy_from_slice(&self.data[offset..offset + INT_SIZE]);
        Ok(i32::from_be_bytes(buf))
    }

    pub fn set_int(&mut self, offset: usize, value: i32) -> Result<()> {
        self.check(offset, INT_SIZE)?;
        self.data[offset..offset + INT_SIZE].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn get_bytes(&self, offset: usize) -> Result<Vec<u8>> {
        let raw_len = self.get_int(offset)?;
        let len = usize::try_from(raw_len).map_err(|_| DbError::PageOutOfBounds {
            offset,
            len: INT_SIZE,
            capacity: self.data.len(),
        })?;
        let start = offset + INT_SIZE;
        self.check(start, len)?;
        Ok(self.data[start..start + len].to_vec())
    }

    /// Writes the length prefix and payload; nothing is written if the pair
    /// does not fit.
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, INT_SIZE + bytes.len())?;
        let len = i32::try_from(bytes.len()).map_err(|_| DbError::PageOutOfBounds {
            offset,
            len: INT_SIZE + bytes.len(),
            capacity: self.data.len(),
        })?;
        self.set_int(offset, len)?;
        let start = offset + INT_SIZE;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_string(&self, offset: usize) -> Result<String> {
        String::from_utf8(self.get_bytes(offset)?).map_err(|_| DbError::InvalidString)
    }

    pub fn set_string(&mut self, offset: usize, s: &str) -> Result<()> {
        self.set_bytes(offset, s.as_bytes())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("capacity", &self.data.len())
            .finish()
    }
}
