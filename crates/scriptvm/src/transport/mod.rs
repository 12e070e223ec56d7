//! Out-of-process transport: the engine side of the framed protocol and the
//! host-side client that drives it.

#[cfg(unix)]
mod client;
mod engine;

#[cfg(unix)]
pub use client::EngineClient;
pub use engine::{Engine, EngineState, EngineStats, Executor};
