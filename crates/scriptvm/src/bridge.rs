//! Handle-based facade for hosts that cannot hold Rust values directly.
//!
//! Sessions, scripts and pending completion callbacks live in
//! generation-checked tables. Callers keep only [`Handle`]s; a completion is
//! delivered by request id rather than by a closure crossing the boundary.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::{
    codec::CompletionResult,
    config::SessionConfig,
    error::{Error, Result},
    handle::{Handle, HandleTable},
    relay::LogListener,
    script::Script,
    session::Session,
};

type Callback = Box<dyn FnOnce(Handle, CompletionResult) + Send + 'static>;

/// A callback that can fire at most once.
pub(crate) struct OneShot {
    callback: Mutex<Option<Callback>>,
}

impl OneShot {
    fn new(callback: Callback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    fn fire(&self, request: Handle, result: CompletionResult) -> Result<()> {
        let callback = self
            .callback
            .lock()
            .take()
            .ok_or(Error::CallbackAlreadyFired)?;
        callback(request, result);
        Ok(())
    }
}

#[derive(Default)]
pub struct Bridge {
    sessions: HandleTable<Session>,
    scripts: HandleTable<Script>,
    callbacks: Arc<HandleTable<OneShot>>,
}

impl Bridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(
        &self,
        config: SessionConfig,
        listener: Arc<dyn LogListener>,
    ) -> Result<Handle> {
        let session = Session::create(config, listener)?;
        Ok(self.sessions.register(session))
    }

    /// Registers an existing session.
    pub fn adopt_session(&self, session: Session) -> Handle {
        self.sessions.register(session)
    }

    pub fn create_script(&self, content: impl Into<String>) -> Result<Handle> {
        let script = Script::from_content(content)?;
        Ok(self.scripts.register(script))
    }

    /// Resolves a session. A handle released by [`Bridge::destroy_session`]
    /// reports [`Error::DestroyedSession`] until its slot is reused.
    pub fn session(&self, handle: Handle) -> Result<Arc<Session>> {
        self.sessions.resolve(handle).map_err(|e| {
            if self.sessions.is_retired(handle) {
                Error::DestroyedSession
            } else {
                e
            }
        })
    }

    /// Resolves a script. A handle released by [`Bridge::destroy_script`]
    /// reports [`Error::DestroyedScript`] until its slot is reused.
    pub fn script(&self, handle: Handle) -> Result<Arc<Script>> {
        self.scripts.resolve(handle).map_err(|e| {
            if self.scripts.is_retired(handle) {
                Error::DestroyedScript
            } else {
                e
            }
        })
    }

    /// Enqueues a script on a session. Returns the request id passed to
    /// `on_complete` when the script finishes.
    ///
    /// On error no request is registered and `on_complete` is never called.
    pub fn enqueue<F>(&self, session: Handle, script: Handle, on_complete: F) -> Result<Handle>
    where
        F: FnOnce(Handle, CompletionResult) + Send + 'static,
    {
        let session = self.session(session)?;
        let script = self.script(script)?;
        let request = self.callbacks.register(OneShot::new(Box::new(on_complete)));
        let callbacks = self.callbacks.clone();
        let queued = session.enqueue(&script, move |result| {
            if let Err(e) = complete(&callbacks, request, result) {
                warn!(request = request.to_raw(), error = %e, "Completion not delivered");
            }
        });
        if let Err(e) = queued {
            self.callbacks.release(request);
            return Err(e);
        }
        Ok(request)
    }

    /// Delivers a completion for `request`. The request handle is released
    /// as it fires, so a second delivery is rejected.
    pub fn complete(&self, request: Handle, result: CompletionResult) -> Result<()> {
        complete(&self.callbacks, request, result)
    }

    /// Destroys and releases a session. Unknown or released handles are
    /// ignored.
    pub fn destroy_session(&self, handle: Handle) {
        if let Some(session) = self.sessions.release(handle) {
            session.destroy();
        }
    }

    /// Destroys and releases a script. Unknown or released handles are
    /// ignored. A script with queued work stays registered and
    /// [`Error::ScriptBusy`] is returned.
    pub fn destroy_script(&self, handle: Handle) -> Result<()> {
        let Ok(script) = self.scripts.resolve(handle) else {
            return Ok(());
        };
        script.destroy()?;
        self.scripts.release(handle);
        Ok(())
    }

    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn live_scripts(&self) -> usize {
        self.scripts.len()
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.callbacks.len()
    }
}

fn complete(
    callbacks: &HandleTable<OneShot>,
    request: Handle,
    result: CompletionResult,
) -> Result<()> {
    let shot = callbacks.release(request).ok_or(Error::InvalidHandle)?;
    shot.fire(request, result)
}
