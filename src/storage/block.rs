use std::fmt;

/// Block number reserved for the end-of-file lock target of a file.
pub const END_OF_FILE: u32 = u32::MAX;

/// Address of one fixed-size block: a file name relative to the database
/// directory plus the block's index within that file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    filename: String,
    number: u32,
}

impl BlockId {
    pub fn new(filename: impl Into<String>, number: u32) -> Self {
        BlockId {
            filename: filename.into(),
            number,
        }
    }

    /// Sentinel locked by `append`/`size` so file extension is serialized.
    /// Never read or written.
    pub fn end_of_file(filename: impl Into<String>) -> Self {
        BlockId::new(filename, END_OF_FILE)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn is_end_of_file(&self) -> bool {
        self.number == END_OF_FILE
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end_of_file() {
            write!(f, "[file {}, end-of-file]", self.filename)
        } else {
            write!(f, "[file {}, block {}]", self.filename, self.number)
        }
    }
}
