//! # Framed Connection
//!
//! Purpose: Own one TCP socket and expose CRLF line framing on top of it.
//!
//! ## Design Principles
//! 1. **Exclusive Ownership**: A connection belongs to exactly one request
//!    operation or one subscription and is never handed off.
//! 2. **Close Exactly Once**: `close` consumes the connection; `Drop` covers
//!    every path that never reached it.
//! 3. **Buffer Reuse**: Each connection keeps its own line and write buffers.
//! 4. **Atomic Commands**: A multi-line command goes out in a single write.

use std::fmt;
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use tracing::{debug, trace};

use crate::client::{ClientError, ClientResult};
use crate::proto::{encode_command, read_frame, read_line, read_response, Command, Frame, Response, CRLF};

/// Single TCP connection speaking the line protocol.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    peer: SocketAddr,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    closed: bool,
}

impl Connection {
    /// Dials `addr` (`host:port`, resolved through DNS when needed).
    pub fn open(addr: &str) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let peer = stream.peer_addr().map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        // Disable Nagle so short command lines are not delayed.
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %err, "failed to disable nagle");
        }

        debug!(peer = %peer, "connection opened");
        Ok(Connection {
            reader: BufReader::new(stream),
            peer,
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            closed: false,
        })
    }

    /// Remote address this connection is bound to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Writes `line` followed by one CRLF.
    ///
    /// `line` may itself contain CRLF pairs; the whole buffer is written at
    /// once so the remote sees the component lines back to back.
    pub fn write_line(&mut self, line: &[u8]) -> ClientResult<()> {
        self.write_buf.clear();
        self.write_buf.extend_from_slice(line);
        self.flush_line()
    }

    /// Encodes `command` and writes it as one line.
    pub fn send(&mut self, command: &Command<'_>) -> ClientResult<()> {
        self.write_buf.clear();
        encode_command(command, &mut self.write_buf);
        trace!(peer = %self.peer, token = ?command.token(), "sending command");
        self.flush_line()
    }

    /// Blocks until a full line is available and returns it without its terminator.
    pub fn read_line(&mut self) -> ClientResult<&[u8]> {
        read_line(&mut self.reader, &mut self.line_buf)?;
        Ok(&self.line_buf)
    }

    /// Decodes exactly one response.
    pub fn read_response(&mut self) -> ClientResult<Response> {
        read_response(&mut self.reader, &mut self.line_buf).map_err(|err| err.with_peer(self.peer))
    }

    /// Decodes one complete stream frame.
    pub fn read_frame(&mut self) -> ClientResult<Frame> {
        read_frame(&mut self.reader, &mut self.line_buf).map_err(|err| err.with_peer(self.peer))
    }

    /// Duplicates the socket handle so another thread can shut it down.
    pub(crate) fn try_clone_stream(&self) -> io::Result<TcpStream> {
        self.reader.get_ref().try_clone()
    }

    /// Shuts the socket down in both directions and releases it.
    pub fn close(mut self) -> io::Result<()> {
        self.closed = true;
        debug!(peer = %self.peer, "connection closed");
        shutdown(self.reader.get_ref())
    }

    /// Closes the connection, logging instead of returning a close failure.
    pub(crate) fn discard(self) {
        let peer = self.peer;
        if let Err(err) = self.close() {
            debug!(peer = %peer, error = %err, "close failed");
        }
    }

    fn flush_line(&mut self) -> ClientResult<()> {
        self.write_buf.extend_from_slice(CRLF);
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf).map_err(ClientError::Write)?;
        stream.flush().map_err(ClientError::Write)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            trace!(peer = %self.peer, "connection dropped without close");
            let _ = shutdown(self.reader.get_ref());
        }
    }
}

/// Full shutdown; a peer that already went away is not an error.
pub(crate) fn shutdown(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}
