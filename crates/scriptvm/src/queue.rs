use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::{
    codec::CompletionResult,
    error::{Error, Result},
    script::Script,
};

pub(crate) type OnComplete = Box<dyn FnOnce(CompletionResult) + Send + 'static>;

pub(crate) struct WorkItem {
    pub seq: u64,
    pub script: Script,
    pub on_complete: OnComplete,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    next_seq: u64,
    closed: bool,
}

/// FIFO of pending work items consumed by a single worker.
#[derive(Default)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    pub fn push(&self, script: Script, on_complete: OnComplete) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::DestroyedSession);
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.items.push_back(WorkItem {
            seq,
            script,
            on_complete,
        });
        drop(state);
        self.ready.notify_one();
        Ok(seq)
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn pop(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Stops accepting work. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = !state.closed;
        state.closed = true;
        drop(state);
        self.ready.notify_all();
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}
