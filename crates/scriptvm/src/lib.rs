//! Embedded script execution engine.
//!
//! A [`Session`] owns one Lua interpreter and a FIFO of [`Script`]s that a
//! dedicated worker runs one at a time. Interpreter output is delivered line
//! by line to a [`LogListener`]; every accepted script completes with a
//! [`CompletionResult`] through a one-shot callback.
//!
//! The same runtime can run out of process: [`transport::Engine`] serves
//! length-prefixed script frames over a byte stream and
//! [`transport::EngineClient`] drives it from the host side.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod interpreter;
pub mod overlay;
mod queue;
pub mod relay;
pub mod runtime;
pub mod script;
pub mod session;
pub mod transport;

pub const TRACE_TARGET_SCRIPT: &str = "scriptvm::script";

pub use bridge::Bridge;
pub use codec::{CompletionResult, FrameError};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use handle::{Handle, HandleTable};
pub use interpreter::{Interpreter, ScriptError};
pub use overlay::{AssetResolver, DirectoryResolver, MemoryResolver};
#[cfg(feature = "archive")]
pub use overlay::ArchiveResolver;
pub use relay::{LogListener, NullListener, Relay, StdioListener, Stream, TracingListener};
pub use runtime::Runtime;
pub use script::Script;
pub use session::{Session, SessionState};
