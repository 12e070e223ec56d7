//! C ABI over the scriptvm handle bridge.
//!
//! Sessions, scripts and pending requests are addressed by 64-bit
//! generation-checked handles; `0` is never a valid handle. Completion
//! callbacks run on the session's worker thread.

use std::{
    ffi::{CStr, c_char, c_int, c_void},
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use scriptvm::{Bridge, CompletionResult, Handle, LogListener, NullListener, SessionConfig};

use crate::error::{Error, ErrorCode, Result};

mod error;

pub use error::scriptvm_last_error;

macro_rules! c_try {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => {
                let e = $crate::error::Error::from(e);
                let code = $crate::error::ErrorCode::from(&e);
                $crate::error::set_last_error(e);
                return code;
            }
        }
    };
}

static BRIDGE: LazyLock<Bridge> = LazyLock::new(Bridge::new);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout = 0,
    Stderr = 1,
}

/// Receives one line of interpreter output without its trailing newline.
/// The line is not NUL-terminated.
pub type LogCallback = extern "C" fn(LogStream, *const u8, usize, *mut c_void);

/// Receives the request id returned by `scriptvm_session_enqueue` and the
/// exit code (`0` success, `1` error).
pub type CompletionCallback = extern "C" fn(u64, c_int, *mut c_void);

struct LogSink {
    callback: LogCallback,
    user_data: *mut c_void,
}

unsafe impl Send for LogSink {}
unsafe impl Sync for LogSink {}

impl LogSink {
    fn emit(&self, stream: LogStream, line: &str) {
        (self.callback)(stream, line.as_ptr(), line.len(), self.user_data);
    }
}

impl LogListener for LogSink {
    fn on_log(&self, line: &str) {
        self.emit(LogStream::Stdout, line);
    }

    fn on_error(&self, line: &str) {
        self.emit(LogStream::Stderr, line);
    }
}

struct Completion {
    callback: CompletionCallback,
    user_data: *mut c_void,
}

unsafe impl Send for Completion {}

impl Completion {
    fn fire(self, request: Handle, result: CompletionResult) {
        (self.callback)(request.to_raw(), result.code(), self.user_data);
    }
}

/// Reads an optional path argument; null means "not configured".
unsafe fn path_arg(ptr: *const c_char, what: &'static str) -> Result<PathBuf> {
    if ptr.is_null() {
        return Ok(PathBuf::new());
    }
    let value = unsafe { CStr::from_ptr(ptr) };
    value
        .to_str()
        .map(PathBuf::from)
        .map_err(|_| Error::InvalidArgument(what))
}

fn handle_arg(raw: u64) -> Result<Handle> {
    if raw == 0 {
        return Err(Error::InvalidHandle);
    }
    Ok(Handle::from_raw(raw))
}

/// Creates a session and writes its handle to `out_session`.
///
/// `stdlib_dir` and `native_dir` may be null. `on_log` may be null to
/// discard interpreter output.
///
/// # Safety
///
/// Non-null string arguments must be valid, null-terminated C strings.
/// `out_session` must be a valid pointer to a `uint64_t`. `user_data` must
/// stay valid until the session is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scriptvm_session_create(
    app_path: *const c_char,
    stdlib_dir: *const c_char,
    native_dir: *const c_char,
    on_log: Option<LogCallback>,
    user_data: *mut c_void,
    out_session: *mut u64,
) -> ErrorCode {
    if app_path.is_null() {
        c_try!(Err::<(), _>(Error::InvalidArgument("Application path is null")));
    }
    if out_session.is_null() {
        c_try!(Err::<(), _>(Error::InvalidArgument("Output pointer is null")));
    }
    let app_path = c_try!(unsafe { path_arg(app_path, "Invalid application path string") });
    let stdlib_dir = c_try!(unsafe { path_arg(stdlib_dir, "Invalid stdlib path string") });
    let native_dir = c_try!(unsafe { path_arg(native_dir, "Invalid native path string") });

    let listener: Arc<dyn LogListener> = match on_log {
        Some(callback) => Arc::new(LogSink {
            callback,
            user_data,
        }),
        None => Arc::new(NullListener),
    };
    let handle = c_try!(BRIDGE.create_session(
        SessionConfig::new(app_path, stdlib_dir, native_dir),
        listener
    ));
    unsafe { out_session.write(handle.to_raw()) };
    ErrorCode::Ok
}

/// Creates a script from `len` bytes of UTF-8 source.
///
/// # Safety
///
/// `content` must point to `len` readable bytes. `out_script` must be a
/// valid pointer to a `uint64_t`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scriptvm_script_create(
    content: *const u8,
    len: usize,
    out_script: *mut u64,
) -> ErrorCode {
    if content.is_null() || out_script.is_null() {
        c_try!(Err::<(), _>(Error::InvalidArgument("Null pointer argument")));
    }
    let bytes = unsafe { std::slice::from_raw_parts(content, len) };
    let source = c_try!(
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidArgument("Script is not valid UTF-8"))
    );
    let handle = c_try!(BRIDGE.create_script(source));
    unsafe { out_script.write(handle.to_raw()) };
    ErrorCode::Ok
}

/// Enqueues a script on a session without blocking.
///
/// On success `on_complete` is called exactly once, from the session's
/// worker thread, with the request id also written to `out_request`. On
/// failure it is never called.
///
/// A session or script handle that has been destroyed yields `Destroyed`;
/// a handle that was never issued yields `InvalidHandle`. Once a destroyed
/// handle's slot is reused by a later create it reads as `InvalidHandle`.
///
/// # Safety
///
/// `out_request` must be null or a valid pointer to a `uint64_t`.
/// `user_data` must stay valid until `on_complete` has run.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scriptvm_session_enqueue(
    session: u64,
    script: u64,
    on_complete: CompletionCallback,
    user_data: *mut c_void,
    out_request: *mut u64,
) -> ErrorCode {
    let session = c_try!(handle_arg(session));
    let script = c_try!(handle_arg(script));
    let completion = Completion {
        callback: on_complete,
        user_data,
    };
    let request = c_try!(BRIDGE.enqueue(session, script, move |request, result| {
        completion.fire(request, result);
    }));
    if !out_request.is_null() {
        unsafe { out_request.write(request.to_raw()) };
    }
    ErrorCode::Ok
}

/// Destroys a session after its queued scripts have completed. Unknown or
/// already destroyed handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn scriptvm_session_destroy(session: u64) -> ErrorCode {
    if let Ok(handle) = handle_arg(session) {
        BRIDGE.destroy_session(handle);
    }
    ErrorCode::Ok
}

/// Destroys a script. Unknown or already destroyed handles are ignored.
/// Returns `Busy` while the script is still queued or executing.
#[unsafe(no_mangle)]
pub extern "C" fn scriptvm_script_destroy(script: u64) -> ErrorCode {
    let Ok(handle) = handle_arg(script) else {
        return ErrorCode::Ok;
    };
    c_try!(BRIDGE.destroy_script(handle));
    ErrorCode::Ok
}
