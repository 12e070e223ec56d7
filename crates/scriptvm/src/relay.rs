//! Forwards interpreter output to a [`LogListener`] one line at a time.

use std::{
    borrow::Cow,
    io::Write,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::event;

use crate::{TRACE_TARGET_SCRIPT, interpreter::ScriptError};

/// Receives interpreter output, one line per call, without the trailing
/// newline.
///
/// Calls are made from the session worker thread in the order the
/// interpreter produced them.
pub trait LogListener: Send + Sync + 'static {
    fn on_log(&self, line: &str);
    fn on_error(&self, line: &str);
}

impl<T: LogListener + ?Sized> LogListener for Arc<T> {
    fn on_log(&self, line: &str) {
        (**self).on_log(line);
    }

    fn on_error(&self, line: &str) {
        (**self).on_error(line);
    }
}

impl<T: LogListener + ?Sized> LogListener for Box<T> {
    fn on_log(&self, line: &str) {
        (**self).on_log(line);
    }

    fn on_error(&self, line: &str) {
        (**self).on_error(line);
    }
}

/// Interpreter output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl LogListener for NullListener {
    fn on_log(&self, _line: &str) {}
    fn on_error(&self, _line: &str) {}
}

/// Emits script output as `tracing` events on [`TRACE_TARGET_SCRIPT`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl LogListener for TracingListener {
    fn on_log(&self, line: &str) {
        event!(
            name: "log",
            target: TRACE_TARGET_SCRIPT,
            tracing::Level::INFO,
            log.output = line,
            log.stream = "stdout",
        );
    }

    fn on_error(&self, line: &str) {
        event!(
            name: "log",
            target: TRACE_TARGET_SCRIPT,
            tracing::Level::WARN,
            log.output = line,
            log.stream = "stderr",
        );
    }
}

/// Writes lines to the current process's stdout and stderr, flushing after
/// each one.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioListener;

impl LogListener for StdioListener {
    fn on_log(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        _ = writeln!(out, "{line}");
        _ = out.flush();
    }

    fn on_error(&self, line: &str) {
        let mut err = std::io::stderr().lock();
        _ = writeln!(err, "{line}");
        _ = err.flush();
    }
}

#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8], lines: &mut Vec<String>) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(line_text(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
    }

    fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = line_text(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

fn line_text(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes.strip_suffix(b"\r").unwrap_or(bytes))
}

fn trim_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

struct RelayState {
    stdout: LineBuffer,
    stderr: LineBuffer,
    capture: bool,
    last_error: Option<ScriptError>,
}

/// Line-splitting relay between one interpreter and one listener.
///
/// Cloning shares the same buffers. The listener is never invoked while the
/// relay's lock is held, so it may call back into the owning session.
#[derive(Clone)]
pub struct Relay {
    listener: Arc<dyn LogListener>,
    state: Arc<Mutex<RelayState>>,
}

impl Relay {
    pub fn new(listener: Arc<dyn LogListener>) -> Self {
        Self {
            listener,
            state: Arc::new(Mutex::new(RelayState {
                stdout: LineBuffer::default(),
                stderr: LineBuffer::default(),
                capture: true,
                last_error: None,
            })),
        }
    }

    /// Appends raw interpreter output. Complete lines are forwarded
    /// immediately; a trailing partial line waits for more data or a flush.
    pub fn write(&self, stream: Stream, bytes: &[u8]) {
        let mut lines = Vec::new();
        let capture = {
            let mut state = self.state.lock();
            match stream {
                Stream::Stdout => state.stdout.push(bytes, &mut lines),
                Stream::Stderr => state.stderr.push(bytes, &mut lines),
            }
            state.capture
        };
        for line in &lines {
            self.emit(capture, stream, line);
        }
    }

    /// Forwards any partial lines still buffered.
    pub fn flush(&self) {
        let (capture, out, err) = {
            let mut state = self.state.lock();
            (state.capture, state.stdout.take(), state.stderr.take())
        };
        if let Some(line) = out {
            self.emit(capture, Stream::Stdout, &line);
        }
        if let Some(line) = err {
            self.emit(capture, Stream::Stderr, &line);
        }
    }

    /// Flushes pending output, then forwards a script error as its summary
    /// lines followed by one indented line per backtrace frame.
    ///
    /// A multi-line message is split so each listener call still carries a
    /// single line.
    pub fn report(&self, error: &ScriptError) {
        self.flush();
        let capture = {
            let mut state = self.state.lock();
            state.last_error = Some(error.clone());
            state.capture
        };
        for line in error.to_string().lines() {
            self.emit(capture, Stream::Stderr, trim_cr(line));
        }
        for line in error.backtrace.iter().flat_map(|frame| frame.lines()) {
            self.emit(capture, Stream::Stderr, &format!("  {}", trim_cr(line)));
        }
    }

    /// When capture is off, output goes to this process's own stdio instead
    /// of the listener.
    pub fn set_capture(&self, capture: bool) {
        self.state.lock().capture = capture;
    }

    #[must_use]
    pub fn capture(&self) -> bool {
        self.state.lock().capture
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ScriptError> {
        self.state.lock().last_error.clone()
    }

    fn emit(&self, capture: bool, stream: Stream, line: &str) {
        match (capture, stream) {
            (true, Stream::Stdout) => self.listener.on_log(line),
            (true, Stream::Stderr) => self.listener.on_error(line),
            (false, Stream::Stdout) => StdioListener.on_log(line),
            (false, Stream::Stderr) => StdioListener.on_error(line),
        }
    }
}
