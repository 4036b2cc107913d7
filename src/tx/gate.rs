use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{DbError, Result};

struct GateState {
    active: usize,
    checkpointing: bool,
}

/// Registry of active transactions used to take quiescent checkpoints.
///
/// Transactions `enter` when they begin and `leave` when they finish. A
/// checkpoint closes the gate, waits for the active count to reach zero, runs
/// its work, then reopens the gate.
pub struct CheckpointGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl CheckpointGate {
    pub fn new() -> Self {
        CheckpointGate {
            state: Mutex::new(GateState {
                active: 0,
                checkpointing: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Register a new transaction; blocks while a checkpoint is running.
    pub fn enter(&self) {
        let mut state = self.state.lock();
        while state.checkpointing {
            self.changed.wait(&mut state);
        }
        state.active += 1;
    }

    pub fn leave(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.changed.notify_all();
    }

    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Run `f` once no transaction is active, keeping new ones out meanwhile.
    /// Gives up with `CheckpointAbort` if transactions are still active after
    /// `timeout`. `f` runs with the gate locked and must not call back into it.
    pub fn quiesce<R, F>(&self, timeout: Duration, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.state.lock();

        while state.checkpointing {
            if self.changed.wait_until(&mut state, deadline).timed_out() && state.checkpointing {
                return Err(DbError::CheckpointAbort(started.elapsed()));
            }
        }
        state.checkpointing = true;

        while state.active > 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() && state.active > 0 {
                state.checkpointing = false;
                self.changed.notify_all();
                return Err(DbError::CheckpointAbort(started.elapsed()));
            }
        }

        let result = f();
        state.checkpointing = false;
        self.changed.notify_all();
        result
    }
}

impl Default for CheckpointGate {
    fn default() -> Self {
        Self::new()
    }
}
