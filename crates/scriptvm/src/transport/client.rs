use std::{
    io::{self, BufRead, BufReader, Write},
    net::Shutdown,
    os::{fd::AsRawFd, unix::net::UnixStream, unix::process::CommandExt},
    process::{Child, Command, ExitStatus},
};

use tracing::debug;

use crate::{
    codec::{self, CompletionResult},
    error::{Error, Result},
};

/// Host side of the engine connection.
pub struct EngineClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    child: Option<Child>,
}

impl EngineClient {
    /// Wraps an already connected stream.
    pub fn connect(stream: UnixStream) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
            child: None,
        })
    }

    /// Spawns an engine process connected through a fresh socket pair. The
    /// child's end of the pair is passed as the last argument.
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        let (local, remote) = UnixStream::pair()?;
        let fd = remote.as_raw_fd();
        command.arg(fd.to_string());
        // SAFETY: only `fcntl`, which is async-signal-safe, runs between fork
        // and exec.
        unsafe {
            command.pre_exec(move || {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let child = command.spawn()?;
        drop(remote);
        debug!(pid = child.id(), fd, "Engine spawned");

        let mut client = Self::connect(local)?;
        client.child = Some(child);
        Ok(client)
    }

    /// Sends `source` as one script frame and waits for its result.
    pub fn run(&mut self, source: &str) -> Result<CompletionResult> {
        self.send_raw(&codec::encode(source.as_bytes()))?;
        self.read_result()
    }

    /// Writes bytes to the engine unframed.
    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Reads one result frame.
    pub fn read_result(&mut self) -> Result<CompletionResult> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "engine closed the connection",
            )));
        }
        Ok(codec::decode_result(&line)?)
    }

    pub const fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Closes the connection and waits for a spawned engine to exit.
    pub fn shutdown(mut self) -> Result<Option<ExitStatus>> {
        self.close();
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status = child.wait()?;
        debug!(%status, "Engine exited");
        Ok(Some(status))
    }

    fn close(&self) {
        if let Err(e) = self.writer.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            debug!(error = %e, "Engine connection shutdown failed");
        }
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            self.close();
            _ = child.wait();
        }
    }
}
