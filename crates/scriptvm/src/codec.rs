//! Length-prefixed framing shared by the engine and its clients.
//!
//! A script frame is the ASCII decimal byte length of the body, a newline,
//! then exactly that many bytes. A result frame is a single ASCII digit
//! followed by a newline.

use std::io::{self, BufRead, Read};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest body a script frame may announce.
pub const MAX_FRAME_LEN: usize = 10_000_000;

#[derive(Error, Debug)]
pub enum FrameError {
    /// Header was not a strictly positive base-10 integer within bounds.
    #[error("malformed length header: {0:?}")]
    MalformedLength(String),

    /// The stream ended before the announced number of bytes arrived.
    #[error("truncated body: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    /// A result frame was not a single digit line.
    #[error("malformed result frame: {0:?}")]
    MalformedResult(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of executing one script.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionResult {
    Success = 0,
    Error = 1,
}

impl CompletionResult {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<CompletionResult> for i32 {
    fn from(value: CompletionResult) -> Self {
        value.code()
    }
}

/// A header line as seen by the reader.
#[derive(Debug, PartialEq, Eq)]
pub enum Header {
    /// The stream ended before any header byte.
    Eof,
    Length(usize),
    Malformed(String),
}

/// Encodes `payload` as a script frame.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    let prefix = format!("{}\n", payload.len());
    let mut buf = BytesMut::with_capacity(prefix.len() + payload.len());
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

#[must_use]
pub fn encode_result(result: CompletionResult) -> [u8; 2] {
    match result {
        CompletionResult::Success => *b"0\n",
        CompletionResult::Error => *b"1\n",
    }
}

/// Parses one length header line. Surrounding whitespace is ignored.
pub fn decode_header(line: &str) -> Result<usize, FrameError> {
    let trimmed = line.trim();
    let malformed = || FrameError::MalformedLength(trimmed.to_owned());
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    match trimmed.parse::<usize>() {
        Ok(len) if len > 0 && len <= MAX_FRAME_LEN => Ok(len),
        _ => Err(malformed()),
    }
}

/// Parses a result frame line.
pub fn decode_result(line: &str) -> Result<CompletionResult, FrameError> {
    match line.strip_suffix('\n').unwrap_or(line) {
        "0" => Ok(CompletionResult::Success),
        "1" => Ok(CompletionResult::Error),
        other => Err(FrameError::MalformedResult(other.to_owned())),
    }
}

/// Longest header line accepted, newline excluded. Far above the eight
/// digits of [`MAX_FRAME_LEN`] so surrounding whitespace still fits.
pub const MAX_HEADER_LEN: usize = 64;

/// Reads the next non-empty header line.
///
/// Blank lines between frames are skipped. A final line without a trailing
/// newline is still treated as a header. A line longer than
/// [`MAX_HEADER_LEN`] is discarded up to its newline without being buffered
/// and reported as malformed.
pub fn read_header<R: BufRead>(reader: &mut R) -> io::Result<Header> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let limit = MAX_HEADER_LEN as u64 + 1;
        if reader.by_ref().take(limit).read_until(b'\n', &mut line)? == 0 {
            return Ok(Header::Eof);
        }
        if line.len() > MAX_HEADER_LEN && line.last() != Some(&b'\n') {
            skip_line(reader)?;
            let prefix = String::from_utf8_lossy(&line[..16]);
            return Ok(Header::Malformed(format!("{}...", prefix.trim())));
        }
        let text = String::from_utf8_lossy(&line);
        if text.trim().is_empty() {
            continue;
        }
        return Ok(match decode_header(&text) {
            Ok(len) => Header::Length(len),
            Err(_) => Header::Malformed(text.trim().to_owned()),
        });
    }
}

fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = buf.len();
        reader.consume(len);
    }
}

/// Reads exactly `len` body bytes.
pub fn read_body<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, FrameError> {
    let mut body = Vec::with_capacity(len.min(64 * 1024));
    let received = reader.take(len as u64).read_to_end(&mut body)?;
    if received < len {
        return Err(FrameError::Truncated {
            expected: len,
            received,
        });
    }
    Ok(body)
}
