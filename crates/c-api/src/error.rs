use std::{
    borrow::Cow,
    cell::RefCell,
    ffi::{CStr, CString, c_char},
};

thread_local! {
    static LAST_ERROR: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Message of the last error returned on the calling thread, or null.
///
/// The pointer stays valid until the next failing call on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn scriptvm_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow_mut()
            .as_mut()
            .map_or(std::ptr::null(), Error::c_error)
    })
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid handle")]
    InvalidHandle,

    #[error("{0}")]
    Destroyed(String),

    #[error("Script is queued or executing")]
    Busy,

    #[error("Creation failed: {0}")]
    Creation(String),

    #[error("C Error")]
    C(ErrorCode, Cow<'static, CStr>),
}

impl From<scriptvm::Error> for Error {
    fn from(err: scriptvm::Error) -> Self {
        match err {
            scriptvm::Error::Creation(msg) => Self::Creation(msg),
            scriptvm::Error::DestroyedSession | scriptvm::Error::DestroyedScript => {
                Self::Destroyed(err.to_string())
            }
            scriptvm::Error::ScriptBusy => Self::Busy,
            scriptvm::Error::EmptyScript => Self::InvalidArgument("Script content is empty"),
            scriptvm::Error::InvalidHandle => Self::InvalidHandle,
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok = 0,
    InvalidArgument = 1,
    Internal = 2,
    InvalidHandle = 3,
    Destroyed = 4,
    Busy = 5,
    Creation = 6,
}

trait IntoCStr {
    fn into_cstr(self) -> Cow<'static, CStr>;
}

impl IntoCStr for String {
    fn into_cstr(self) -> Cow<'static, CStr> {
        CString::new(self).map_or_else(
            |_| c"invalid utf-8 error string".into(),
            std::convert::Into::into,
        )
    }
}

impl Error {
    fn c_error(&mut self) -> *const c_char {
        match self {
            Self::C(_, msg) => msg.as_ptr(),
            other => {
                let code = ErrorCode::from(&*other);
                let msg = other.to_string().into_cstr();
                *other = Self::C(code, msg);
                other.c_error()
            }
        }
    }
}

pub fn set_last_error(err: Error) {
    tracing::debug!(error = %err, "C API call failed");
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(err);
    });
}

impl From<&Error> for ErrorCode {
    fn from(result: &Error) -> Self {
        match &result {
            Error::InvalidArgument(_) => Self::InvalidArgument,
            Error::Internal(_) => Self::Internal,
            Error::InvalidHandle => Self::InvalidHandle,
            Error::Destroyed(_) => Self::Destroyed,
            Error::Busy => Self::Busy,
            Error::Creation(_) => Self::Creation,
            Error::C(code, _) => *code,
        }
    }
}
