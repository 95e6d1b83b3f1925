//! Wire protocol: request envelopes, replies and line framing.
//!
//! A request is one line of compact JSON `{"action": ..., "prompt": ...}`.
//! A response is zero or more body lines followed by a line containing
//! exactly `END`. Body lines that would read as the terminator or as an
//! error indication are escaped with a leading backslash, so an unescaped
//! single `ERROR: ` line can only come from an error reply.
//!
//! Bodies are split on `\n` alone, so carriage returns and trailing newlines
//! survive the trip. Every line, request or response, is capped at
//! [`MAX_LINE_BYTES`].
//!
//! `FrameReader` and `FrameWriter` are the only types that know about lines
//! and the terminator; everything above them works with `Envelope` and
//! `Reply` values.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Line marking the end of a response frame.
pub const TERMINATOR: &str = "END";

/// Prefix of a body that carries an error indication.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Longest accepted line, newline excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const ESCAPE: char = '\\';

/// Errors from encoding, decoding or framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed request envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Connection closed before the end of the response")]
    UnexpectedEof,

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl ProtocolError {
    /// Whether the offending line was consumed whole, leaving the stream
    /// positioned at the start of the next line.
    pub fn is_line_error(&self) -> bool {
        matches!(self, ProtocolError::InvalidUtf8 | ProtocolError::LineTooLong(_))
    }
}

/// Requested operation.
///
/// Unknown action names are kept verbatim so they can be reported back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    CreateStory,
    ExtractStory,
    Unsupported(String),
}

impl Action {
    pub fn wire_name(&self) -> &str {
        match self {
            Action::CreateStory => "CREATE_STORY",
            Action::ExtractStory => "EXTRACT_STORY",
            Action::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Action::Unsupported(_))
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        match name.as_str() {
            "CREATE_STORY" => Action::CreateStory,
            "EXTRACT_STORY" => Action::ExtractStory,
            _ => Action::Unsupported(name),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Unsupported(name) => name,
            other => other.wire_name().to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One decoded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    pub prompt: String,
}

impl Envelope {
    pub fn new(action: Action, prompt: impl Into<String>) -> Self {
        Self {
            action,
            prompt: prompt.into(),
        }
    }

    pub fn create_story(prompt: impl Into<String>) -> Self {
        Self::new(Action::CreateStory, prompt)
    }

    pub fn extract_story(text: impl Into<String>) -> Self {
        Self::new(Action::ExtractStory, text)
    }

    /// Encode as a single line (no trailing newline).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Outcome of one request, as carried in a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Successful response text.
    Body(String),
    /// Error indication, sent as a single `ERROR: <message>` line.
    Error(String),
}

impl Reply {
    pub fn error(message: impl fmt::Display) -> Self {
        Reply::Error(message.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// The response text as the client will observe it.
    pub fn to_body(&self) -> String {
        match self {
            Reply::Body(body) => body.clone(),
            // Error replies always fit on one line.
            Reply::Error(message) => {
                format!("{ERROR_PREFIX}{}", message.replace(['\r', '\n'], " "))
            }
        }
    }
}

/// Reads request lines (server side) or response frames (client side).
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_line: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_line: MAX_LINE_BYTES,
        }
    }

    /// Override the line length cap.
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Read one request line. `None` when the peer has closed the stream.
    ///
    /// A trailing `\r` is dropped so `\r\n`-terminated requests are accepted.
    /// [`ProtocolError::InvalidUtf8`] and [`ProtocolError::LineTooLong`]
    /// leave the reader ready for the next line.
    pub async fn read_request(&mut self) -> Result<Option<String>, ProtocolError> {
        Ok(self
            .next_line()
            .await?
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string()))
    }

    /// Read one response frame up to and including the terminator.
    pub async fn read_reply(&mut self) -> Result<Reply, ProtocolError> {
        let mut lines: Vec<String> = Vec::new();
        loop {
            let line = self
                .next_line()
                .await?
                .ok_or(ProtocolError::UnexpectedEof)?;
            if line == TERMINATOR {
                break;
            }
            lines.push(line.to_string());
        }

        // Body lines starting with the error prefix are always escaped.
        if let [line] = lines.as_slice() {
            if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
                return Ok(Reply::Error(message.to_string()));
            }
        }
        let body: Vec<&str> = lines.iter().map(|line| unescape_line(line)).collect();
        Ok(Reply::Body(body.join("\n")))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Next line without its `\n`. Overlong lines are drained up to their
    /// newline without being buffered.
    async fn next_line(&mut self) -> Result<Option<&str>, ProtocolError> {
        self.buf.clear();
        let mut read_any = false;
        let mut overflow = false;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !read_any {
                    return Ok(None);
                }
                break;
            }
            read_any = true;

            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..end], true),
                None => (available, false),
            };
            if !overflow {
                if self.buf.len() + chunk.len() > self.max_line {
                    overflow = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(chunk);
                }
            }
            let used = chunk.len() + usize::from(done);
            self.inner.consume(used);
            if done {
                break;
            }
        }

        if overflow {
            return Err(ProtocolError::LineTooLong(self.max_line));
        }
        std::str::from_utf8(&self.buf)
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Writes request lines (client side) or response frames (server side).
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_request(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let mut line = envelope.encode()?;
        line.push('\n');
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a complete response frame in a single buffered write.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), ProtocolError> {
        let mut frame = String::new();
        match reply {
            Reply::Body(body) => {
                frame.reserve(body.len() + TERMINATOR.len() + 8);
                if !body.is_empty() {
                    for line in body.split('\n') {
                        frame.push_str(&escape_line(line));
                        frame.push('\n');
                    }
                }
            }
            Reply::Error(_) => {
                frame.push_str(&reply.to_body());
                frame.push('\n');
            }
        }
        frame.push_str(TERMINATOR);
        frame.push('\n');

        self.inner.write_all(frame.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn escape_line(line: &str) -> Cow<'_, str> {
    if line == TERMINATOR || line.starts_with(ESCAPE) || line.starts_with(ERROR_PREFIX) {
        Cow::Owned(format!("{ESCAPE}{line}"))
    } else {
        Cow::Borrowed(line)
    }
}

fn unescape_line(line: &str) -> &str {
    line.strip_prefix(ESCAPE).unwrap_or(line)
}
