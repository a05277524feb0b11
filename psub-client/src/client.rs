//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for publishing, subscribing and
//! sending raw commands to a PUB/SUB server.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `PubSubClient` hides framing and decoding details.
//! 2. **Connection per Operation**: Every call dials its own socket, so calls
//!    never share mutable state and are safe from any number of threads.
//! 3. **Fail Fast**: Nothing is retried; every failure reaches the caller.
//! 4. **Typed Failures**: Transport, protocol and server errors stay apart.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::debug;

use crate::conn::Connection;
use crate::proto::{Command, Response};
use crate::subscription::Subscription;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// Writing a command failed.
    #[error("failed to write to connection: {0}")]
    Write(#[source] io::Error),
    /// Reading a line failed, including EOF before a complete line.
    #[error("failed to read from connection: {0}")]
    Read(#[source] io::Error),
    /// Closing the socket failed.
    #[error("failed to close connection: {0}")]
    Close(#[source] io::Error),
    /// The socket handle could not be duplicated for interruption.
    #[error("failed to duplicate socket handle: {0}")]
    Handle(#[source] io::Error),
    /// The server sent a line that is not a recognised token.
    #[error("invalid operation type {line:?}{}", describe_peer(.peer))]
    InvalidOperation {
        line: String,
        peer: Option<SocketAddr>,
    },
    /// The server rejected the command with an `ERR` frame.
    #[error("error from server: {0}")]
    Server(String),
    /// The subscription stream already terminated.
    #[error("subscription is closed")]
    Closed,
}

impl ClientError {
    /// True for failures of the underlying socket (server down, reset, EOF).
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::Write(_)
                | ClientError::Read(_)
                | ClientError::Close(_)
                | ClientError::Handle(_)
        )
    }

    /// True when the server spoke something outside the grammar.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::InvalidOperation { .. })
    }

    /// True when the server explicitly rejected the command.
    pub fn is_server(&self) -> bool {
        matches!(self, ClientError::Server(_))
    }

    /// The server's description for `Server` errors.
    pub fn server_description(&self) -> Option<&str> {
        match self {
            ClientError::Server(description) => Some(description),
            _ => None,
        }
    }

    pub(crate) fn with_peer(self, addr: SocketAddr) -> Self {
        match self {
            ClientError::InvalidOperation { line, peer: None } => ClientError::InvalidOperation {
                line,
                peer: Some(addr),
            },
            other => other,
        }
    }
}

fn describe_peer(peer: &Option<SocketAddr>) -> String {
    match peer {
        Some(addr) => format!(" from {}", addr),
        None => String::new(),
    }
}

/// Configuration for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address, e.g. "localhost:8081".
    pub addr: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "localhost:8081".to_string(),
        }
    }
}

/// Blocking PUB/SUB client.
///
/// Cloning is cheap and clones are independent; share one per thread freely.
#[derive(Debug, Clone)]
pub struct PubSubClient {
    config: ClientConfig,
}

impl PubSubClient {
    /// Creates a client for the server at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_config(ClientConfig { addr: addr.into() })
    }

    /// Creates a client from an explicit configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        PubSubClient { config }
    }

    /// Server address this client dials.
    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    /// Publishes `payload` to `channel`.
    ///
    /// An `ERR` reply becomes `ClientError::Server` carrying the description.
    pub fn publish(&self, channel: &str, payload: &[u8]) -> ClientResult<()> {
        self.request(&Command::Publish { channel, payload })?
            .into_result()
    }

    /// Sends `text` verbatim and returns the full response.
    ///
    /// `ERR` replies are returned as `Ok(Response::Err(..))` so callers can
    /// assert on the server's wording.
    pub fn raw(&self, text: &str) -> ClientResult<Response> {
        self.request(&Command::Raw { text })
    }

    /// Subscribes to `channel` and returns a stream bound to a dedicated connection.
    ///
    /// **Logic**:
    /// 1. Open a connection and send `SUB`.
    /// 2. Decode the single confirming response.
    /// 3. On `ACK` hand the live connection to the subscription; otherwise
    ///    close it and fail.
    pub fn subscribe(&self, channel: &str) -> ClientResult<Subscription> {
        let mut conn = Connection::open(&self.config.addr)?;
        let response = match exchange(&mut conn, &Command::Subscribe { channel }) {
            Ok(response) => response,
            Err(err) => {
                conn.discard();
                return Err(err);
            }
        };

        match response {
            Response::Ack => {
                debug!(peer = %conn.peer_addr(), channel, "subscription active");
                Ok(Subscription::new(conn, channel))
            }
            Response::Err(description) => {
                debug!(channel, %description, "subscription rejected");
                conn.discard();
                Err(ClientError::Server(description))
            }
        }
    }

    /// Open, send, decode one response, close. Runs once per call.
    fn request(&self, command: &Command<'_>) -> ClientResult<Response> {
        let mut conn = Connection::open(&self.config.addr)?;
        let outcome = exchange(&mut conn, command);
        conn.discard();
        outcome
    }
}

fn exchange(conn: &mut Connection, command: &Command<'_>) -> ClientResult<Response> {
    conn.send(command)?;
    let response = conn.read_response()?;
    debug!(peer = %conn.peer_addr(), error = response.is_error(), "response decoded");
    Ok(response)
}
