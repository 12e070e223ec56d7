use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The interpreter runtime could not be initialized.
    #[error("failed to create session: {0}")]
    Creation(String),

    /// Operation attempted on a session after `destroy`.
    #[error("session has been destroyed")]
    DestroyedSession,

    /// Operation attempted on a script after `destroy`.
    #[error("script has been destroyed")]
    DestroyedScript,

    /// The script still has queued or executing work items.
    #[error("script is queued or executing")]
    ScriptBusy,

    /// Script content was empty or whitespace-only.
    #[error("script content is empty")]
    EmptyScript,

    /// Handle was never issued, or its slot has been released or reused.
    #[error("invalid handle")]
    InvalidHandle,

    /// A one-shot completion callback was fired a second time.
    #[error("completion callback already fired")]
    CallbackAlreadyFired,

    /// Wire framing error.
    #[error(transparent)]
    Frame(#[from] crate::codec::FrameError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
