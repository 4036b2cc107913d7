use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{DbError, Result};
use crate::storage::block::BlockId;

const EXCLUSIVE: i32 = -1;

/// Current grant on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    Free,
    Shared(u32),
    Exclusive,
}

/// Block-level shared/exclusive locks for every transaction in the process.
///
/// Each entry is the number of shared holders, or -1 for one exclusive
/// holder. Waits are bounded; an expired wait is a `LockAbort` and the
/// caller is expected to roll back. Deadlocks are only broken by that
/// timeout.
pub struct LockTable {
    locks: Mutex<HashMap<BlockId, i32>>,
    released: Condvar,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        LockTable {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Wait until no exclusive grant exists on `block`, then add a shared one.
    pub fn s_lock(&self, block: &BlockId) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut locks = self.locks.lock();

        while locks.get(block).copied() == Some(EXCLUSIVE) {
            if self.released.wait_until(&mut locks, deadline).timed_out()
                && locks.get(block).copied() == Some(EXCLUSIVE)
            {
                return Err(self.abort(block, started));
            }
        }

        let holders = locks.entry(block.clone()).or_insert(0);
        *holders += 1;
        trace!(block = %block, holders = *holders, "shared lock granted");
        Ok(())
    }

    /// Upgrade the caller's shared grant to exclusive once it is the only
    /// holder. The caller must already hold a shared lock on `block`.
    pub fn x_lock(&self, block: &BlockId) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut locks = self.locks.lock();

        while locks.get(block).copied().unwrap_or(0) > 1 {
            if self.released.wait_until(&mut locks, deadline).timed_out()
                && locks.get(block).copied().unwrap_or(0) > 1
            {
                return Err(self.abort(block, started));
            }
        }

        locks.insert(block.clone(), EXCLUSIVE);
        trace!(block = %block, "exclusive lock granted");
        Ok(())
    }

    /// Drop one grant on `block` and wake every waiter.
    pub fn unlock(&self, block: &BlockId) {
        let mut locks = self.locks.lock();
        match locks.get_mut(block) {
            Some(holders) if *holders > 1 => *holders -= 1,
            Some(_) => {
                locks.remove(block);
            }
            None => return,
        }
        self.released.notify_all();
    }

    pub fn grant(&self, block: &BlockId) -> LockGrant {
        match self.locks.lock().get(block).copied() {
            None | Some(0) => LockGrant::Free,
            Some(EXCLUSIVE) => LockGrant::Exclusive,
            Some(n) => LockGrant::Shared(n as u32),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn abort(&self, block: &BlockId, started: Instant) -> DbError {
        let waited = started.elapsed();
        warn!(block = %block, ?waited, "lock wait timed out");
        DbError::LockAbort {
            block: block.clone(),
            waited,
        }
    }
}
