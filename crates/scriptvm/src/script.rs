use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::error::{Error, Result};

static NEXT_SCRIPT_ID: AtomicU64 = AtomicU64::new(1);

/// An immutable unit of source text.
///
/// Cloning a `Script` is cheap and shares the same content and lifecycle
/// state. A script may sit in any number of session queues at once; it can
/// only be destroyed once none of them still hold it.
#[derive(Clone)]
pub struct Script {
    inner: Arc<ScriptInner>,
}

struct ScriptInner {
    id: u64,
    source: Box<str>,
    state: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    destroyed: bool,
    pending: usize,
}

impl Script {
    /// Creates a script from its source text.
    ///
    /// Empty or whitespace-only content is rejected.
    pub fn from_content(content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(Error::EmptyScript);
        }
        Ok(Self {
            inner: Arc::new(ScriptInner {
                id: NEXT_SCRIPT_ID.fetch_add(1, Ordering::Relaxed),
                source: content.into_boxed_str(),
                state: Mutex::default(),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Number of queued or executing work items referencing this script.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }

    /// Destroys the script. Idempotent.
    ///
    /// Fails with [`Error::ScriptBusy`] while work items still reference it.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.destroyed {
            return Ok(());
        }
        if state.pending > 0 {
            return Err(Error::ScriptBusy);
        }
        state.destroyed = true;
        Ok(())
    }

    pub(crate) fn acquire(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.destroyed {
            return Err(Error::DestroyedScript);
        }
        state.pending += 1;
        Ok(())
    }

    pub(crate) fn release(&self) {
        let mut state = self.inner.state.lock();
        state.pending = state.pending.saturating_sub(1);
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("id", &self.inner.id)
            .field("len", &self.inner.source.len())
            .finish_non_exhaustive()
    }
}
