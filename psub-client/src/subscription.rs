//! # Subscription Stream
//!
//! Purpose: Hold a subscribed connection open and turn its frames into
//! message payloads for a single consumer.
//!
//! ## Frame Handling
//!
//! ```text
//! waiting ──MSG + payload──> done     (payload returned)
//!    │ ▲
//!    └─┘ ACK                          (keep-alive, absorbed)
//! waiting ──ERR + desc────> failed    (connection closed)
//! waiting ──unknown / io──> failed    (connection closed)
//! ```
//!
//! After `failed` the connection is gone and `read` returns `Closed`.
//! A blocked `read` has no cancellation signal; use an [`Interrupter`]
//! from another thread to shut the socket down and wake it.

use std::io;
use std::net::{SocketAddr, TcpStream};

use tracing::{debug, trace, warn};

use crate::client::{ClientError, ClientResult};
use crate::conn::{shutdown, Connection};
use crate::proto::Frame;

/// Live subscription to one channel over one dedicated connection.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    conn: Option<Connection>,
}

impl Subscription {
    pub(crate) fn new(conn: Connection, channel: &str) -> Self {
        Subscription {
            channel: channel.to_string(),
            conn: Some(conn),
        }
    }

    /// Channel this stream is bound to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns false once the stream has terminated.
    pub fn is_active(&self) -> bool {
        self.conn.is_some()
    }

    /// Blocks until the next message and returns its payload.
    ///
    /// Keep-alive `ACK` frames are skipped. An `ERR` frame, an unknown token
    /// or any I/O failure closes the connection and is returned as the error.
    pub fn read(&mut self) -> ClientResult<Vec<u8>> {
        let conn = self.conn.as_mut().ok_or(ClientError::Closed)?;
        let outcome = loop {
            match conn.read_frame() {
                Ok(Frame::Msg(payload)) => break Ok(payload),
                Ok(Frame::Ack) => {
                    trace!(channel = %self.channel, "keep-alive absorbed");
                }
                Ok(Frame::Err(description)) => break Err(ClientError::Server(description)),
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = &outcome {
            self.terminate(err);
        }
        outcome
    }

    /// Returns a handle that can wake a blocked `read` from another thread.
    pub fn interrupter(&self) -> ClientResult<Interrupter> {
        let conn = self.conn.as_ref().ok_or(ClientError::Closed)?;
        let stream = conn.try_clone_stream().map_err(ClientError::Handle)?;
        Ok(Interrupter {
            stream,
            peer: conn.peer_addr(),
        })
    }

    /// Closes the underlying connection. A terminated stream closes as a no-op.
    pub fn close(mut self) -> ClientResult<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(ClientError::Close),
            None => Ok(()),
        }
    }

    fn terminate(&mut self, cause: &ClientError) {
        if let Some(conn) = self.conn.take() {
            if cause.is_protocol() {
                warn!(channel = %self.channel, error = %cause, "subscription terminated");
            } else {
                debug!(channel = %self.channel, error = %cause, "subscription terminated");
            }
            conn.discard();
        }
    }
}

/// Shuts down a subscription's socket from another thread.
///
/// Holds a duplicate of the socket handle. Shutting it down makes a pending
/// `read` fail with a connection error; releasing the socket stays with the
/// subscription.
#[derive(Debug)]
pub struct Interrupter {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Interrupter {
    /// Wakes any blocked reader. Safe to call after the stream terminated.
    pub fn interrupt(&self) -> io::Result<()> {
        debug!(peer = %self.peer, "interrupting subscription");
        shutdown(&self.stream)
    }
}
