use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::storage::block::BlockId;
use crate::storage::page::Page;

/// Block I/O counters since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub blocks_read: u64,
    pub blocks_written: u64,
}

struct FileState {
    open_files: HashMap<String, File>,
    stats: FileStats,
}

/// Raw fixed-size block I/O against the files of one database directory.
///
/// One handle per file name, opened on first use and kept open. All calls are
/// serialized through a single mutex.
pub struct FileManager {
    dir: PathBuf,
    block_size: usize,
    is_new: bool,
    sync_writes: bool,
    state: Mutex<FileState>,
}

impl FileManager {
    /// Open (creating if needed) the database directory.
    pub fn new(dir: &Path, block_size: usize, sync_writes: bool) -> Result<Self> {
        let is_new = !dir.exists();
        if is_new {
            fs::create_dir_all(dir)?;
        }

        Ok(FileManager {
            dir: dir.to_path_buf(),
            block_size,
            is_new,
            sync_writes,
            state: Mutex::new(FileState {
                open_files: HashMap::new(),
                stats: FileStats::default(),
            }),
        })
    }

    /// Delete leftover `temp*` files from an earlier run. Returns how many
    /// were removed.
    pub fn remove_temp_files(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with("temp") && entry.file_type()?.is_file() {
                state.open_files.remove(name);
                fs::remove_file(entry.path())?;
                debug!(file = name, "removed temporary file");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read `block` into `page`. Bytes past the end of the file read as zero.
    pub fn read(&self, block: &BlockId, page: &mut Page) -> Result<()> {
        let mut state = self.state.lock();
        let offset = self.offset_of(block);
        let file = Self::file(&mut state.open_files, &self.dir, block.filename())?;
        file.seek(SeekFrom::Start(offset))?;

        let buf = page.as_bytes_mut();
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);

        state.stats.blocks_read += 1;
        Ok(())
    }

    pub fn write(&self, block: &BlockId, page: &Page) -> Result<()> {
        let mut state = self.state.lock();
        let offset = self.offset_of(block);
        let file = Self::file(&mut state.open_files, &self.dir, block.filename())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(page.as_bytes())?;
        if self.sync_writes {
            file.sync_data()?;
        }

        state.stats.blocks_written += 1;
        Ok(())
    }

    /// Extend `filename` by one zero-filled block and return its address.
    pub fn append(&self, filename: &str) -> Result<BlockId> {
        let mut state = self.state.lock();
        let file = Self::file(&mut state.open_files, &self.dir, filename)?;
        let number = (file.metadata()?.len() / self.block_size as u64) as u32;
        let block = BlockId::new(filename, number);

        file.seek(SeekFrom::Start(number as u64 * self.block_size as u64))?;
        file.write_all(&vec![0u8; self.block_size])?;
        if self.sync_writes {
            file.sync_data()?;
        }

        state.stats.blocks_written += 1;
        Ok(block)
    }

    /// Number of whole blocks in `filename`; a missing file is created empty.
    pub fn length(&self, filename: &str) -> Result<u32> {
        let mut state = self.state.lock();
        let file = Self::file(&mut state.open_files, &self.dir, filename)?;
        Ok((file.metadata()?.len() / self.block_size as u64) as u32)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The directory did not exist before this manager was created.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> FileStats {
        self.state.lock().stats
    }

    fn offset_of(&self, block: &BlockId) -> u64 {
        block.number() as u64 * self.block_size as u64
    }

    fn file<'a>(
        open_files: &'a mut HashMap<String, File>,
        dir: &Path,
        filename: &str,
    ) -> Result<&'a mut File> {
        match open_files.entry(filename.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(dir.join(filename))?;
                Ok(e.insert(file))
            }
        }
    }
}
