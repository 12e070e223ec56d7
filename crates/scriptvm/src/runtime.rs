use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tracing::{debug, warn};

use crate::{
    codec::CompletionResult,
    config::SessionConfig,
    error::{Error, Result},
    interpreter::{Interpreter, LuaInterpreter, ScriptError},
    relay::{LogListener, Relay},
    script::Script,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One owned interpreter plus its output relay.
///
/// A `Runtime` runs scripts synchronously on the thread that owns it.
/// [`Session`](crate::Session) wraps it with a worker thread and a queue.
pub struct Runtime {
    id: u64,
    interpreter: Option<Box<dyn Interpreter>>,
    relay: Relay,
    executed: u64,
}

impl Runtime {
    /// Creates a Lua runtime. Initialization errors are returned as
    /// [`Error::Creation`].
    pub fn create(config: &SessionConfig, listener: Arc<dyn LogListener>) -> Result<Self> {
        let id = next_session_id();
        let relay = Relay::new(listener);
        let interpreter = LuaInterpreter::new(config, relay.clone(), id)?;
        Ok(Self::with_interpreter(id, relay, Box::new(interpreter)))
    }

    pub fn with_interpreter(id: u64, relay: Relay, interpreter: Box<dyn Interpreter>) -> Self {
        debug!(session = id, "Runtime created");
        Self {
            id,
            interpreter: Some(interpreter),
            relay,
            executed: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn relay(&self) -> &Relay {
        &self.relay
    }

    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.interpreter.is_none()
    }

    /// Runs `script` to completion.
    ///
    /// Script errors are reported through the relay and yield
    /// [`CompletionResult::Error`]; output is flushed before this returns.
    pub fn execute(&mut self, script: &Script) -> Result<CompletionResult> {
        let interpreter = self.interpreter.as_mut().ok_or(Error::DestroyedSession)?;
        if script.is_destroyed() {
            return Err(Error::DestroyedScript);
        }

        self.executed += 1;
        let start = Instant::now();
        let outcome = interpreter.eval(script.source(), &format!("script#{}", script.id()));
        self.relay.flush();

        let result = match outcome {
            Ok(()) => CompletionResult::Success,
            Err(error) => {
                self.relay.report(&error);
                CompletionResult::Error
            }
        };
        debug!(
            session = self.id,
            script = script.id(),
            result = result.code(),
            elapsed_us = start.elapsed().as_micros(),
            "Script executed"
        );
        Ok(result)
    }

    /// Runs raw source bytes, reporting content errors through the relay.
    pub fn execute_source(&mut self, source: &[u8]) -> CompletionResult {
        let script = match std::str::from_utf8(source)
            .map_err(|e| ScriptError::new("EncodingError", e.to_string()))
            .and_then(|text| {
                Script::from_content(text).map_err(|e| ScriptError::new("ArgumentError", e.to_string()))
            }) {
            Ok(script) => script,
            Err(error) => {
                self.relay.report(&error);
                return CompletionResult::Error;
            }
        };
        match self.execute(&script) {
            Ok(result) => result,
            Err(e) => {
                warn!(session = self.id, error = %e, "Script rejected");
                CompletionResult::Error
            }
        }
    }

    /// Releases the interpreter. Idempotent.
    pub fn destroy(&mut self) {
        if self.interpreter.take().is_some() {
            self.relay.flush();
            debug!(session = self.id, executed = self.executed, "Runtime destroyed");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.destroy();
    }
}
