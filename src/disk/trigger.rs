//! Completion trigger
//!
//! Counts outstanding asynchronous operations. `wait()` blocks the calling
//! thread until the count drops to zero, then reports the first failure.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SabotError};

/// Shared handle; clones track the same set of operations
#[derive(Debug, Clone, Default)]
pub struct CompletionTrigger {
    inner: Arc<TriggerInner>,
}

#[derive(Debug, Default)]
struct TriggerInner {
    state: Mutex<TriggerState>,
    done: Condvar,
}

#[derive(Debug, Default)]
struct TriggerState {
    outstanding: usize,
    failure: Option<String>,
}

impl CompletionTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more outstanding operation
    pub fn begin(&self) {
        self.inner.state.lock().outstanding += 1;
    }

    /// Mark one operation finished
    pub fn complete(&self, result: Result<()>) {
        let mut state = self.inner.state.lock();
        if let Err(e) = result {
            state.failure.get_or_insert_with(|| e.to_string());
        }
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.inner.done.notify_all();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    /// Block until nothing is outstanding. A recorded failure is returned
    /// once and then cleared.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while state.outstanding > 0 {
            self.inner.done.wait(&mut state);
        }
        match state.failure.take() {
            Some(msg) => Err(SabotError::Storage(msg)),
            None => Ok(()),
        }
    }
}
