use std::{
    env::args,
    io::BufReader,
    os::{
        fd::{FromRawFd, RawFd},
        unix::net::UnixStream,
    },
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, bail};
use scriptvm::{Runtime, SessionConfig, StdioListener, transport::Engine};

mod logging;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let fd = match parse_fd(args().nth(1).as_deref()) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("scriptvm-engine: {e:#}");
            eprintln!("usage: scriptvm-engine <fd>");
            return ExitCode::FAILURE;
        }
    };

    logging::init_tracing();
    match serve(fd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("scriptvm-engine: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn parse_fd(arg: Option<&str>) -> anyhow::Result<RawFd> {
    let arg = arg.context("missing connection descriptor argument")?;
    let fd: i64 = arg
        .trim()
        .parse()
        .with_context(|| format!("invalid connection descriptor {arg:?}"))?;
    if fd <= 0 {
        bail!("connection descriptor must be positive, got {fd}");
    }
    RawFd::try_from(fd).with_context(|| format!("connection descriptor out of range: {fd}"))
}

fn serve(fd: RawFd) -> anyhow::Result<()> {
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        bail!(
            "connection descriptor {fd} cannot be wrapped: {}",
            std::io::Error::last_os_error()
        );
    }
    // SAFETY: the descriptor is open and handed to this process for its sole
    // use; nothing else in the process closes it.
    let stream = unsafe { UnixStream::from_raw_fd(fd) };
    let reader = BufReader::new(
        stream
            .try_clone()
            .with_context(|| format!("connection descriptor {fd} cannot be wrapped"))?,
    );

    let config = SessionConfig::from_env();
    let runtime = Runtime::create(&config, Arc::new(StdioListener))
        .context("failed to initialize interpreter")?;
    tracing::info!(fd, session = runtime.id(), "Engine started");

    let stats = Engine::new(reader, stream, runtime)
        .serve()
        .context("connection failed")?;
    tracing::info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        protocol_errors = stats.protocol_errors,
        "Engine shutting down"
    );
    Ok(())
}
