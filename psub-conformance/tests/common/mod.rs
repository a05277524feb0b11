//! In-process PUB/SUB broker used as the server under test.
//!
//! Runs on its own tokio runtime so the blocking client and scenarios can
//! drive it from plain `#[test]` functions. Tracks open connections so tests
//! can check that the client releases every socket it opens.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Broker handle; dropping it shuts the runtime and every connection down.
pub struct TestBroker {
    addr: String,
    state: Arc<BrokerState>,
    _runtime: Runtime,
}

struct BrokerState {
    channels: Mutex<HashMap<String, Vec<UnboundedSender<Vec<u8>>>>>,
    open: AtomicUsize,
    keepalive: bool,
}

impl BrokerState {
    fn subscribe(&self, channel: &str) -> UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().expect("channels mutex poisoned");
        channels.entry(channel.to_string()).or_default().push(tx);
        rx
    }

    fn publish(&self, channel: &str, payload: &[u8]) {
        let mut channels = self.channels.lock().expect("channels mutex poisoned");
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|tx| tx.send(payload.to_vec()).is_ok());
        }
    }
}

impl TestBroker {
    /// Starts a broker on a random loopback port.
    pub fn start() -> Self {
        Self::start_with(false)
    }

    /// Starts a broker that sends an `ACK` keep-alive before every `MSG`.
    pub fn start_with_keepalive() -> Self {
        Self::start_with(true)
    }

    fn start_with(keepalive: bool) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("addr").to_string();

        let state = Arc::new(BrokerState {
            channels: Mutex::new(HashMap::new()),
            open: AtomicUsize::new(0),
            keepalive,
        });
        runtime.spawn(accept_loop(listener, state.clone()));

        TestBroker {
            addr,
            state,
            _runtime: runtime,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections the broker currently holds open.
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Polls until no connection is open; false if `within` elapses first.
    pub fn wait_for_idle(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.open_connections() == 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.open_connections() == 0
    }
}

async fn accept_loop(listener: std::net::TcpListener, state: Arc<BrokerState>) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(_) => return,
    };

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(_) => continue,
        };
        state.open.fetch_add(1, Ordering::SeqCst);
        let state = state.clone();
        tokio::spawn(async move {
            let _ = handle_connection(stream, &state).await;
            state.open.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

enum Request {
    Publish { channel: String, payload: Vec<u8> },
    Subscribe { channel: String },
    Unknown(String),
}

/// Accumulates lines until a whole command is available.
#[derive(Default)]
struct RequestParser {
    pending: Vec<Vec<u8>>,
}

impl RequestParser {
    fn parse(&mut self, buffer: &mut BytesMut) -> Option<Request> {
        while let Some(line) = take_line(buffer) {
            self.pending.push(line);
            let needed = match self.pending[0].as_slice() {
                b"PUB" => 3,
                b"SUB" => 2,
                _ => 1,
            };
            if self.pending.len() < needed {
                continue;
            }

            let mut lines = std::mem::take(&mut self.pending).into_iter();
            let token = lines.next().unwrap_or_default();
            let mut text = || String::from_utf8_lossy(&lines.next().unwrap_or_default()).into_owned();
            return Some(match token.as_slice() {
                b"PUB" => {
                    let channel = text();
                    Request::Publish {
                        channel,
                        payload: text().into_bytes(),
                    }
                }
                b"SUB" => Request::Subscribe { channel: text() },
                other => Request::Unknown(String::from_utf8_lossy(other).into_owned()),
            });
        }
        None
    }
}

fn take_line(buffer: &mut BytesMut) -> Option<Vec<u8>> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let mut line = buffer.split_to(end + 1).to_vec();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

async fn handle_connection(mut stream: TcpStream, state: &BrokerState) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RequestParser::default();

    loop {
        while let Some(request) = parser.parse(&mut buffer) {
            match request {
                Request::Publish { channel, payload } => {
                    state.publish(&channel, &payload);
                    stream.write_all(b"ACK\r\n").await?;
                }
                Request::Subscribe { channel } => {
                    // Register before acknowledging so a publish that follows the
                    // ACK is always delivered.
                    let rx = state.subscribe(&channel);
                    stream.write_all(b"ACK\r\n").await?;
                    return stream_messages(stream, rx, state.keepalive).await;
                }
                Request::Unknown(token) => {
                    let reply = format!("ERR\r\nunknown operation {}\r\n", token);
                    stream.write_all(reply.as_bytes()).await?;
                }
            }
        }

        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }
    }
}

async fn stream_messages(
    mut stream: TcpStream,
    mut rx: UnboundedReceiver<Vec<u8>>,
    keepalive: bool,
) -> io::Result<()> {
    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(payload) = message else { return Ok(()) };
                let mut frame = Vec::with_capacity(payload.len() + 16);
                if keepalive {
                    frame.extend_from_slice(b"ACK\r\n");
                }
                frame.extend_from_slice(b"MSG\r\n");
                frame.extend_from_slice(&payload);
                frame.extend_from_slice(b"\r\n");
                stream.write_all(&frame).await?;
            }
            read = stream.read(&mut scratch) => {
                if read? == 0 {
                    return Ok(());
                }
            }
        }
    }
}
