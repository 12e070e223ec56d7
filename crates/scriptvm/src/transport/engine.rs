use std::{
    io::{self, BufRead, Write},
    mem,
};

use tracing::{debug, warn};

use crate::{
    codec::{self, CompletionResult, FrameError, Header},
    runtime::Runtime,
};

/// Runs the body of one script frame.
pub trait Executor {
    fn run_frame(&mut self, body: &[u8]) -> CompletionResult;
}

impl Executor for Runtime {
    fn run_frame(&mut self, body: &[u8]) -> CompletionResult {
        self.execute_source(body)
    }
}

impl<F: FnMut(&[u8]) -> CompletionResult> Executor for F {
    fn run_frame(&mut self, body: &[u8]) -> CompletionResult {
        self(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    WaitingForHeader,
    ReadingBody(usize),
    Executing,
    Closed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub succeeded: u64,
    pub failed: u64,
    pub protocol_errors: u64,
}

/// Request loop of the engine process: reads script frames, runs them one at
/// a time and answers each with a result frame.
///
/// Protocol errors are answered with result `1` and never end the loop. End
/// of input while waiting for a header closes it cleanly.
pub struct Engine<R, W, X> {
    reader: R,
    writer: W,
    executor: X,
    state: EngineState,
    body: Vec<u8>,
    stats: EngineStats,
}

impl<R: BufRead, W: Write, X: Executor> Engine<R, W, X> {
    pub const fn new(reader: R, writer: W, executor: X) -> Self {
        Self {
            reader,
            writer,
            executor,
            state: EngineState::WaitingForHeader,
            body: Vec::new(),
            stats: EngineStats {
                succeeded: 0,
                failed: 0,
                protocol_errors: 0,
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub const fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Serves frames until the peer closes the connection.
    pub fn serve(mut self) -> io::Result<EngineStats> {
        while self.state != EngineState::Closed {
            self.step()?;
        }
        debug!(
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            protocol_errors = self.stats.protocol_errors,
            "Engine connection closed"
        );
        Ok(self.stats)
    }

    /// Performs one state transition.
    pub fn step(&mut self) -> io::Result<EngineState> {
        self.state = match self.state {
            EngineState::WaitingForHeader => match codec::read_header(&mut self.reader) {
                Ok(Header::Eof) => EngineState::Closed,
                Ok(Header::Length(len)) => EngineState::ReadingBody(len),
                Ok(Header::Malformed(line)) => {
                    warn!(header = %line, "Invalid length prefix");
                    self.stats.protocol_errors += 1;
                    self.respond(CompletionResult::Error)?
                }
                Err(e) => closed_if_gone(e, "reading a header")?,
            },
            EngineState::ReadingBody(len) => match codec::read_body(&mut self.reader, len) {
                Ok(body) => {
                    self.body = body;
                    EngineState::Executing
                }
                Err(FrameError::Truncated { expected, received }) => {
                    warn!(expected, received, "Incomplete script body");
                    self.stats.protocol_errors += 1;
                    self.respond(CompletionResult::Error)?
                }
                Err(FrameError::Io(e)) => closed_if_gone(e, "reading a body")?,
                Err(other) => return Err(io::Error::other(other)),
            },
            EngineState::Executing => {
                let body = mem::take(&mut self.body);
                let result = self.executor.run_frame(&body);
                if result.is_success() {
                    self.stats.succeeded += 1;
                } else {
                    self.stats.failed += 1;
                }
                self.respond(result)?
            }
            EngineState::Closed => EngineState::Closed,
        };
        Ok(self.state)
    }

    fn respond(&mut self, result: CompletionResult) -> io::Result<EngineState> {
        // Script output must reach the host before the result does.
        _ = io::stdout().flush();
        let written = self
            .writer
            .write_all(&codec::encode_result(result))
            .and_then(|()| self.writer.flush());
        match written {
            Ok(()) => Ok(EngineState::WaitingForHeader),
            Err(e) => closed_if_gone(e, "writing a result"),
        }
    }
}

/// Maps errors meaning the peer has gone to [`EngineState::Closed`].
fn closed_if_gone(e: io::Error, during: &'static str) -> io::Result<EngineState> {
    if matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    ) {
        debug!(error = %e, during, "Peer went away");
        Ok(EngineState::Closed)
    } else {
        Err(e)
    }
}
