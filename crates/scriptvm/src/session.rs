//! Sessions: one interpreter runtime plus the queue feeding it.
//!
//! Each session owns a dedicated worker thread. The interpreter is created
//! on that thread and never leaves it, so scripts of one session never run
//! concurrently and complete in the order they were enqueued.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle, ThreadId},
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::{
    codec::CompletionResult,
    config::SessionConfig,
    error::{Error, Result},
    interpreter::{Interpreter, LuaInterpreter, ScriptError},
    queue::{WorkItem, WorkQueue},
    relay::{LogListener, Relay},
    runtime::{Runtime, next_session_id},
    script::Script,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no work accepted yet.
    Created,
    /// At least one script has been accepted.
    Running,
    Destroyed,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Destroyed,
        }
    }
}

/// Handle to a session. Clones share the same session; dropping the last
/// clone destroys it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    queue: Arc<WorkQueue>,
    relay: Relay,
    state: AtomicU8,
    worker_thread: ThreadId,
    stopped: Arc<Stopped>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Set once the worker has drained its queue and released the interpreter.
#[derive(Default)]
struct Stopped {
    done: Mutex<bool>,
    changed: Condvar,
}

impl Stopped {
    fn set(&self) {
        *self.done.lock() = true;
        self.changed.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.changed.wait(&mut done);
        }
    }
}

/// Marks the worker stopped when dropped, including on unwind.
struct StopGuard(Arc<Stopped>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

impl Session {
    /// Creates a session backed by a Lua interpreter.
    ///
    /// Blocks until the interpreter has initialized on the worker thread.
    pub fn create(config: SessionConfig, listener: Arc<dyn LogListener>) -> Result<Self> {
        Self::create_with(config, listener, |config, relay, id| {
            let interpreter = LuaInterpreter::new(config, relay, id)?;
            Ok(Box::new(interpreter) as Box<dyn Interpreter>)
        })
    }

    /// Creates a session whose interpreter is built by `factory` on the
    /// worker thread.
    pub fn create_with<F>(
        config: SessionConfig,
        listener: Arc<dyn LogListener>,
        factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(&SessionConfig, Relay, u64) -> Result<Box<dyn Interpreter>> + Send + 'static,
    {
        let id = next_session_id();
        let relay = Relay::new(listener);
        let queue = Arc::new(WorkQueue::default());
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let stopped = Arc::new(Stopped::default());

        let worker = {
            let relay = relay.clone();
            let queue = queue.clone();
            let guard = StopGuard(stopped.clone());
            thread::Builder::new()
                .name(format!("scriptvm-session-{id}"))
                .spawn(move || {
                    let _guard = guard;
                    let runtime = match factory(&config, relay.clone(), id) {
                        Ok(interpreter) => {
                            _ = ready_tx.send(Ok(()));
                            Runtime::with_interpreter(id, relay, interpreter)
                        }
                        Err(e) => {
                            _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    run_worker(&queue, runtime);
                })
                .map_err(|e| Error::Creation(format!("failed to spawn session worker: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                _ = worker.join();
                return Err(Error::Creation(
                    "session worker exited during startup".to_owned(),
                ));
            }
        }

        debug!(session = id, "Session created");
        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                queue,
                relay,
                state: AtomicU8::new(SessionState::Created as u8),
                worker_thread: worker.thread().id(),
                stopped,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    /// Number of work items waiting to start.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Appends `script` to the queue without blocking.
    ///
    /// `on_complete` runs exactly once on the worker thread after the script
    /// finished and its output was delivered. Returns the item's sequence
    /// number. On error the callback is dropped without being called.
    pub fn enqueue<F>(&self, script: &Script, on_complete: F) -> Result<u64>
    where
        F: FnOnce(CompletionResult) + Send + 'static,
    {
        if self.inner.queue.is_closed() {
            return Err(Error::DestroyedSession);
        }
        script.acquire()?;
        match self.inner.queue.push(script.clone(), Box::new(on_complete)) {
            Ok(seq) => {
                _ = self.inner.state.compare_exchange(
                    SessionState::Created as u8,
                    SessionState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                Ok(seq)
            }
            Err(e) => {
                script.release();
                Err(e)
            }
        }
    }

    /// Enqueues `script` and resolves once it has completed.
    pub fn run(
        &self,
        script: &Script,
    ) -> Result<impl Future<Output = CompletionResult> + Send + use<>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(script, move |result| {
            _ = tx.send(result);
        })?;
        Ok(async move { rx.await.unwrap_or(CompletionResult::Error) })
    }

    /// Routes output to the listener (`true`, the default) or to this
    /// process's own stdout and stderr.
    pub fn set_log_capture(&self, capture: bool) {
        self.inner.relay.set_capture(capture);
    }

    /// The last unhandled script error reported by this session.
    #[must_use]
    pub fn last_error(&self) -> Option<ScriptError> {
        self.inner.relay.last_error()
    }

    /// Destroys the session. Idempotent.
    ///
    /// New work is rejected immediately. Work already queued still runs and
    /// its callbacks fire before the interpreter is released. Unless called
    /// from the session's own worker (inside a completion callback), this
    /// blocks until that has happened, for every concurrent caller.
    pub fn destroy(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn shutdown(&self) {
        if self.queue.close() {
            self.state
                .store(SessionState::Destroyed as u8, Ordering::Release);
            debug!(session = self.id, pending = self.queue.len(), "Session destroy requested");
        }
        if self.worker_thread == thread::current().id() {
            return;
        }
        self.stopped.wait();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            error!(session = self.id, "Session worker panicked");
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(queue: &WorkQueue, mut runtime: Runtime) {
    let session = runtime.id();
    debug!(session, "Session worker started");
    while let Some(item) = queue.pop() {
        let WorkItem {
            seq,
            script,
            on_complete,
        } = item;
        let result = runtime.execute(&script).unwrap_or_else(|e| {
            warn!(session, seq, error = %e, "Work item rejected");
            CompletionResult::Error
        });
        script.release();
        drop(script);
        if std::panic::catch_unwind(AssertUnwindSafe(|| on_complete(result))).is_err() {
            error!(session, seq, "Completion callback panicked");
        }
    }
    runtime.destroy();
    debug!(session, "Session worker stopped");
}
