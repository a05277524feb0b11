//! # Line Protocol Encoding and Decoding
//!
//! Purpose: Encode client commands and decode server responses and stream
//! frames for the CRLF-delimited PUB/SUB protocol.
//!
//! ## Design Principles
//! 1. **Single Dispatch Point**: Every leading token is classified in one place.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe Payloads**: Message payloads are returned as raw bytes.
//! 4. **Fail Fast**: Unknown tokens surface as `InvalidOperation` immediately.
//!
//! ## Wire Grammar
//!
//! ```text
//! client -> server   PUB / <channel> / <payload>
//!                    SUB / <channel>
//! server -> client   ACK
//!                    ERR / <description>
//!                    MSG / <payload>        (subscriptions only)
//! ```

use std::io::{self, BufRead};

use crate::client::{ClientError, ClientResult};

/// Leading token of a publish command.
pub const PUBLISH: &str = "PUB";
/// Leading token of a subscribe command.
pub const SUBSCRIBE: &str = "SUB";
/// Leading token of a pushed message frame.
pub const MSG: &str = "MSG";
/// Acknowledgement token.
pub const ACK: &str = "ACK";
/// Leading token of an error frame.
pub const ERR: &str = "ERR";

/// Line terminator used on the wire.
pub const CRLF: &[u8] = b"\r\n";

/// A client command, borrowed from the caller for the duration of one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Publish `payload` to every subscriber of `channel`.
    Publish { channel: &'a str, payload: &'a [u8] },
    /// Subscribe the sending connection to `channel`.
    Subscribe { channel: &'a str },
    /// Arbitrary text sent verbatim. Used to probe malformed input.
    Raw { text: &'a str },
}

impl Command<'_> {
    /// Returns the leading token, or `None` for raw text.
    pub fn token(&self) -> Option<&'static str> {
        match self {
            Command::Publish { .. } => Some(PUBLISH),
            Command::Subscribe { .. } => Some(SUBSCRIBE),
            Command::Raw { .. } => None,
        }
    }
}

/// Reply to a request operation or to a subscribe command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `ACK`
    Ack,
    /// `ERR` followed by the server's description.
    Err(String),
}

impl Response {
    /// Returns true when the server rejected the command.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Err(_))
    }

    /// Returns the server's error description, if any.
    pub fn description(&self) -> Option<&str> {
        match self {
            Response::Ack => None,
            Response::Err(description) => Some(description),
        }
    }

    /// Converts an `ERR` response into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<()> {
        match self {
            Response::Ack => Ok(()),
            Response::Err(description) => Err(ClientError::Server(description)),
        }
    }
}

/// Unit read off a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alive; carries nothing.
    Ack,
    /// Message pushed by the server.
    Msg(Vec<u8>),
    /// Server-side termination of the stream.
    Err(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Ack,
    Err,
    Msg,
    Unknown,
}

fn classify(line: &[u8]) -> Token {
    match line {
        l if l == ACK.as_bytes() => Token::Ack,
        l if l == ERR.as_bytes() => Token::Err,
        l if l == MSG.as_bytes() => Token::Msg,
        _ => Token::Unknown,
    }
}

/// Encodes a command into `out` without the final terminator.
///
/// The lines of a command are joined with CRLF so the whole command goes out
/// as one write; `Connection::write_line` appends the closing CRLF. Encoding
/// is deterministic: equal commands always produce identical bytes.
pub fn encode_command(command: &Command<'_>, out: &mut Vec<u8>) {
    match *command {
        Command::Publish { channel, payload } => {
            out.extend_from_slice(PUBLISH.as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(channel.as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(payload);
        }
        Command::Subscribe { channel } => {
            out.extend_from_slice(SUBSCRIBE.as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(channel.as_bytes());
        }
        Command::Raw { text } => out.extend_from_slice(text.as_bytes()),
    }
}

/// Reads exactly one response (`ACK` or `ERR` + description).
///
/// Any other leading token is a protocol violation. The decoder never loops.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Response> {
    read_line(reader, line_buf)?;
    match classify(line_buf) {
        Token::Ack => Ok(Response::Ack),
        Token::Err => {
            read_line(reader, line_buf)?;
            Ok(Response::Err(lossy(line_buf)))
        }
        Token::Msg | Token::Unknown => Err(invalid_operation(line_buf)),
    }
}

/// Reads one complete stream frame, header line plus payload line when present.
pub fn read_frame<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Frame> {
    read_line(reader, line_buf)?;
    match classify(line_buf) {
        Token::Ack => Ok(Frame::Ack),
        Token::Msg => {
            read_line(reader, line_buf)?;
            Ok(Frame::Msg(line_buf.clone()))
        }
        Token::Err => {
            read_line(reader, line_buf)?;
            Ok(Frame::Err(lossy(line_buf)))
        }
        Token::Unknown => Err(invalid_operation(line_buf)),
    }
}

/// Reads one line into `buf` and strips its terminator.
///
/// Accepts `\r\n` and a bare `\n`. EOF before a complete line is reported as
/// `UnexpectedEof` so a closed peer looks like any other transport failure.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).map_err(ClientError::Read)?;
    if bytes == 0 {
        return Err(ClientError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    if buf.last() != Some(&b'\n') {
        return Err(ClientError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        )));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(())
}

fn invalid_operation(line: &[u8]) -> ClientError {
    ClientError::InvalidOperation {
        line: lossy(line),
        peer: None,
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
