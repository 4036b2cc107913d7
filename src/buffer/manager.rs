use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::buffer::frame::Frame;
use crate::error::{DbError, Result};
use crate::storage::block::BlockId;
use crate::storage::file_manager::FileManager;
use crate::storage::page::Page;
use crate::wal::log_manager::LogManager;
use crate::wal::record::{Lsn, TxId};

/// Handle to a pinned frame. Only valid while the pin is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

impl BufferId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct PoolState {
    frames: Vec<Frame>,
    /// Block -> frame index for every frame that holds a block.
    resident: HashMap<BlockId, usize>,
    /// Frames with no pins, least recently unpinned first.
    unpinned: LruCache<usize, ()>,
}

impl PoolState {
    fn frame(&self, id: BufferId) -> Result<&Frame> {
        self.frames.get(id.0).ok_or(DbError::InvalidBuffer(id.0))
    }

    fn frame_mut(&mut self, id: BufferId) -> Result<&mut Frame> {
        self.frames.get_mut(id.0).ok_or(DbError::InvalidBuffer(id.0))
    }

    fn pinned_frame(&self, id: BufferId) -> Result<&Frame> {
        let frame = self.frame(id)?;
        if !frame.is_pinned() {
            return Err(DbError::BufferNotPinned(id.0));
        }
        Ok(frame)
    }

    fn pinned_frame_mut(&mut self, id: BufferId) -> Result<&mut Frame> {
        let frame = self.frame_mut(id)?;
        if !frame.is_pinned() {
            return Err(DbError::BufferNotPinned(id.0));
        }
        Ok(frame)
    }
}

/// Fixed pool of page frames shared by all transactions.
///
/// `pin` makes a block resident and keeps it there until the matching
/// `unpin`. When no frame holds the block, the least recently unpinned frame
/// is reused; if every frame is pinned the caller waits up to the configured
/// timeout and then gets `BufferAbort`. A dirty frame is written back, after
/// forcing the log up to its LSN, before it is reused.
pub struct BufferManager {
    fm: Arc<FileManager>,
    log: Arc<LogManager>,
    state: Mutex<PoolState>,
    available_cv: Condvar,
    timeout: Duration,
}

impl BufferManager {
    pub fn new(
        fm: Arc<FileManager>,
        log: Arc<LogManager>,
        buffer_count: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(buffer_count)
            .ok_or_else(|| DbError::Config("buffer pool needs at least one buffer".into()))?;

        let block_size = fm.block_size();
        let frames = (0..buffer_count).map(|_| Frame::new(block_size)).collect();
        let mut unpinned = LruCache::new(capacity);
        for idx in 0..buffer_count {
            unpinned.put(idx, ());
        }

        Ok(BufferManager {
            fm,
            log,
            state: Mutex::new(PoolState {
                frames,
                resident: HashMap::new(),
                unpinned,
            }),
            available_cv: Condvar::new(),
            timeout,
        })
    }

    /// Pin `block`, waiting for a free frame if necessary.
    pub fn pin(&self, block: &BlockId) -> Result<BufferId> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(id) = self.try_to_pin(&mut state, block)? {
                return Ok(id);
            }
            if self.available_cv.wait_until(&mut state, deadline).timed_out() {
                if let Some(id) = self.try_to_pin(&mut state, block)? {
                    return Ok(id);
                }
                let waited = started.elapsed();
                warn!(block = %block, ?waited, "buffer wait timed out");
                return Err(DbError::BufferAbort {
                    block: block.clone(),
                    waited,
                });
            }
        }
    }

    fn try_to_pin(&self, state: &mut PoolState, block: &BlockId) -> Result<Option<BufferId>> {
        if let Some(&idx) = state.resident.get(block) {
            if !state.frames[idx].is_pinned() {
                state.unpinned.pop(&idx);
            }
            state.frames[idx].pin();
            return Ok(Some(BufferId(idx)));
        }

        let Some((idx, ())) = state.unpinned.pop_lru() else {
            return Ok(None);
        };

        let frame = &mut state.frames[idx];
        if let Some(old) = frame.block() {
            debug!(victim = %old, dirty = frame.is_dirty(), frame = idx, "evicting buffer");
        }
        if let Err(e) = frame.flush(&self.fm, &self.log) {
            // Still holds its old block; leave it evictable.
            state.unpinned.put(idx, ());
            return Err(e);
        }
        if let Some(old) = frame.block().cloned() {
            state.resident.remove(&old);
        }
        if let Err(e) = frame.load(block.clone(), &self.fm) {
            state.unpinned.put(idx, ());
            return Err(e);
        }
        frame.pin();
        state.resident.insert(block.clone(), idx);
        Ok(Some(BufferId(idx)))
    }

    /// Drop one pin. The last unpin makes the frame evictable and wakes waiters.
    pub fn unpin(&self, id: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        let frame = state.pinned_frame_mut(id)?;
        if frame.unpin() == 0 {
            state.unpinned.put(id.0, ());
            self.available_cv.notify_all();
        }
        Ok(())
    }

    /// Write one frame back if dirty.
    pub fn flush(&self, id: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        let frame = state.frame_mut(id)?;
        frame.flush(&self.fm, &self.log)
    }

    /// Write back every frame last modified by `txid`.
    pub fn flush_all(&self, txid: TxId) -> Result<()> {
        let mut state = self.state.lock();
        for frame in state.frames.iter_mut() {
            if frame.modifying_tx() == Some(txid) {
                frame.flush(&self.fm, &self.log)?;
            }
        }
        Ok(())
    }

    /// Run `f` against the page of a pinned frame.
    pub fn read_page<R, F>(&self, id: BufferId, f: F) -> Result<R>
    where
        F: FnOnce(&Page) -> Result<R>,
    {
        let state = self.state.lock();
        f(state.pinned_frame(id)?.page())
    }

    /// Run `f` against the mutable page of a pinned frame. Callers stamp the
    /// change with `set_modified`.
    pub fn write_page<R, F>(&self, id: BufferId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Page) -> Result<R>,
    {
        let mut state = self.state.lock();
        f(state.pinned_frame_mut(id)?.page_mut())
    }

    pub fn set_modified(&self, id: BufferId, txid: TxId, lsn: Option<Lsn>) -> Result<()> {
        let mut state = self.state.lock();
        state.pinned_frame_mut(id)?.set_modified(txid, lsn);
        Ok(())
    }

    pub fn block_of(&self, id: BufferId) -> Result<Option<BlockId>> {
        Ok(self.state.lock().frame(id)?.block().cloned())
    }

    pub fn pin_count(&self, id: BufferId) -> Result<u32> {
        Ok(self.state.lock().frame(id)?.pins())
    }

    pub fn is_dirty(&self, id: BufferId) -> Result<bool> {
        Ok(self.state.lock().frame(id)?.is_dirty())
    }

    /// Frame currently holding `block`, pinned or not.
    pub fn resident(&self, block: &BlockId) -> Option<BufferId> {
        self.state.lock().resident.get(block).copied().map(BufferId)
    }

    /// Number of unpinned frames.
    pub fn available(&self) -> usize {
        self.state.lock().unpinned.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn block_size(&self) -> usize {
        self.fm.block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn setup(buffers: usize, timeout_ms: u64) -> (TempDir, Arc<FileManager>, Arc<LogManager>, BufferManager) {
        let dir = TempDir::new().unwrap();
        let fm = Arc::new(FileManager::new(dir.path(), 64, false).unwrap());
        let log = Arc::new(LogManager::new(Arc::clone(&fm), "bm.log").unwrap());
        let bm = BufferManager::new(
            Arc::clone(&fm),
            Arc::clone(&log),
            buffers,
            Duration::from_millis(timeout_ms),
        )
        .unwrap();
        (dir, fm, log, bm)
    }

    fn block(n: u32) -> BlockId {
        BlockId::new("t.tbl", n)
    }

    #[test]
    fn test_repeat_pin_shares_frame() {
        let (_dir, _fm, _log, bm) = setup(3, 100);
        let a = bm.pin(&block(0)).unwrap();
        let b = bm.pin(&block(0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(bm.pin_count(a).unwrap(), 2);
        assert_eq!(bm.available(), 2);

        bm.unpin(a).unwrap();
        assert_eq!(bm.available(), 2);
        bm.unpin(b).unwrap();
        assert_eq!(bm.available(), 3);
        assert!(matches!(bm.unpin(a), Err(DbError::BufferNotPinned(_))));
    }

    #[test]
    fn test_empty_frames_used_in_order() {
        let (_dir, _fm, _log, bm) = setup(3, 100);
        let ids: Vec<_> = (0..3).map(|n| bm.pin(&block(n)).unwrap().index()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_evicts_least_recently_unpinned() {
        let (_dir, _fm, _log, bm) = setup(3, 100);
        let ids: Vec<_> = (0..3).map(|n| bm.pin(&block(n)).unwrap()).collect();
        bm.unpin(ids[1]).unwrap();
        bm.unpin(ids[0]).unwrap();
        bm.unpin(ids[2]).unwrap();

        let id = bm.pin(&block(10)).unwrap();
        assert_eq!(id, ids[1]);
        assert_eq!(bm.resident(&block(1)), None);
        assert_eq!(bm.resident(&block(0)), Some(ids[0]));

        // Re-pinning block 0 takes it off the eviction list.
        bm.pin(&block(0)).unwrap();
        let id = bm.pin(&block(11)).unwrap();
        assert_eq!(id, ids[2]);
    }

    #[test]
    fn test_pool_exhaustion_aborts() {
        let (_dir, _fm, _log, bm) = setup(2, 50);
        bm.pin(&block(0)).unwrap();
        bm.pin(&block(1)).unwrap();
        let err = bm.pin(&block(2)).unwrap_err();
        assert!(err.is_abort());
        assert!(matches!(err, DbError::BufferAbort { .. }));
    }

    #[test]
    fn test_waiter_wakes_on_unpin() {
        let (_dir, _fm, _log, bm) = setup(1, 5_000);
        let bm = Arc::new(bm);
        let held = bm.pin(&block(0)).unwrap();

        let waiter = {
            let bm = Arc::clone(&bm);
            thread::spawn(move || bm.pin(&block(1)).map(|id| id.index()))
        };
        thread::sleep(Duration::from_millis(50));
        bm.unpin(held).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_dirty_victim_written_back() {
        let (_dir, fm, log, bm) = setup(1, 100);
        let id = bm.pin(&block(0)).unwrap();
        bm.write_page(id, |p| p.set_int(8, 77)).unwrap();
        let lsn = log.append(b"change").unwrap();
        bm.set_modified(id, 1, Some(lsn)).unwrap();
        bm.unpin(id).unwrap();

        bm.pin(&block(1)).unwrap();
        assert!(log.last_saved_lsn() >= lsn);

        let mut page = Page::new(64);
        fm.read(&block(0), &mut page).unwrap();
        assert_eq!(page.get_int(8).unwrap(), 77);
    }

    #[test]
    fn test_page_access_requires_pin() {
        let (_dir, _fm, _log, bm) = setup(2, 100);
        let id = bm.pin(&block(0)).unwrap();
        bm.unpin(id).unwrap();
        assert!(matches!(
            bm.read_page(id, |p| p.get_int(0)),
            Err(DbError::BufferNotPinned(_))
        ));
        assert!(matches!(
            bm.read_page(BufferId(9), |p| p.get_int(0)),
            Err(DbError::InvalidBuffer(9))
        ));
    }

    #[test]
    fn test_flush_all_only_touches_own_frames() {
        let (_dir, fm, _log, bm) = setup(3, 100);
        let a = bm.pin(&block(0)).unwrap();
        let b = bm.pin(&block(1)).unwrap();
        bm.write_page(a, |p| p.set_int(0, 1)).unwrap();
        bm.set_modified(a, 1, None).unwrap();
        bm.write_page(b, |p| p.set_int(0, 2)).unwrap();
        bm.set_modified(b, 2, None).unwrap();

        let before = fm.stats().blocks_written;
        bm.flush_all(1).unwrap();
        assert_eq!(fm.stats().blocks_written, before + 1);
        assert!(!bm.is_dirty(a).unwrap());
        assert!(bm.is_dirty(b).unwrap());
    }
}
