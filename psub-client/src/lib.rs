//! # PUB/SUB Sync Client
//!
//! Purpose: Speak the line-delimited PUB/SUB protocol over TCP with a small
//! blocking API: one-shot publish and raw requests, plus long-lived
//! subscription streams.
//!
//! ## Design Principles
//! 1. **Connection per Operation**: No pooling; nothing shared between calls.
//! 2. **Sum-Typed Grammar**: Commands, responses and frames are enums decoded
//!    at a single dispatch point.
//! 3. **Minimal Allocation**: Reuse line and write buffers per connection.
//! 4. **No Leaks**: Every connection is closed on every exit path.

mod client;
mod conn;
mod proto;
mod subscription;

pub use client::{ClientConfig, ClientError, ClientResult, PubSubClient};
pub use conn::Connection;
pub use proto::{encode_command, Command, Frame, Response, ACK, CRLF, ERR, MSG, PUBLISH, SUBSCRIBE};
pub use subscription::{Interrupter, Subscription};
