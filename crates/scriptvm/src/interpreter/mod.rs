//! Interpreter backends.

mod lua;

pub use lua::LuaInterpreter;

/// Diagnostic for an error raised by a script and not handled by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub class: String,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl ScriptError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for ScriptError {}

/// A live interpreter runtime.
///
/// Implementations are owned by a single thread for their whole life; all
/// output goes through the [`Relay`](crate::relay::Relay) they were built
/// with.
pub trait Interpreter {
    /// Compiles and runs `source`. `name` identifies the chunk in
    /// diagnostics.
    fn eval(&mut self, source: &str, name: &str) -> Result<(), ScriptError>;
}

impl<T: Interpreter + ?Sized> Interpreter for Box<T> {
    fn eval(&mut self, source: &str, name: &str) -> Result<(), ScriptError> {
        (**self).eval(source, name)
    }
}
