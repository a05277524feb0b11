//! # Conformance Scenarios
//!
//! Purpose: Exercise delivery, isolation, fan-out, repeat delivery and error
//! signalling of a PUB/SUB server through the public client API.
//!
//! Every wait inside a scenario is bounded. Reader threads are interrupted
//! and joined before a scenario returns, so in-scenario work never outlives
//! the scenario unless the runner itself gives up on it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context};
use psub_client::{ClientResult, Interrupter, PubSubClient, Subscription};
use tracing::debug;

use crate::runner::Scenario;

/// How long an isolation check listens for a stray message.
pub const ISOLATION_WAIT: Duration = Duration::from_secs(1);

/// Upper bound on waiting for any single expected message.
pub const DELIVERY_WAIT: Duration = Duration::from_secs(10);

const PAYLOAD: &[u8] = b"Hello";

/// The scenario set, in run order.
pub fn catalogue() -> Vec<Scenario<PubSubClient>> {
    vec![
        Scenario::new("subscribe to `foo` / publish to `foo`", deliver_to_subscriber),
        Scenario::new("subscribe to `foo` / publish to `bar`", isolate_channels),
        Scenario::new("3 subscriptions to `foo` / publish to `foo`", three_subscribers),
        Scenario::new("subscribe to `foo` / 3 publishes to `foo`", three_publishes),
        Scenario::new("invalid input", invalid_input),
        Scenario::new("subscribe to `foo` / 100 publishes to `foo`", hundred_publishes),
        Scenario::new("200 subscriptions to unique channels / publish to each", unique_channels),
    ]
}

pub fn deliver_to_subscriber(client: &PubSubClient) -> anyhow::Result<()> {
    let mut sub = client.subscribe("foo")?;
    client.publish("foo", PAYLOAD)?;

    let msg = sub.read()?;
    ensure!(
        msg == PAYLOAD,
        "Expected message to be `Hello`, but got `{}`",
        String::from_utf8_lossy(&msg)
    );
    sub.close()?;
    Ok(())
}

pub fn isolate_channels(client: &PubSubClient) -> anyhow::Result<()> {
    let sub = client.subscribe("foo")?;
    client.publish("bar", PAYLOAD)?;

    if let Some(msg) = read_within(sub, ISOLATION_WAIT)? {
        bail!(
            "Expected to not receive a message on channel `foo`, but got `{}`",
            String::from_utf8_lossy(&msg)
        );
    }
    Ok(())
}

pub fn three_subscribers(client: &PubSubClient) -> anyhow::Result<()> {
    fan_out(client, "foo", 3)
}

pub fn three_publishes(client: &PubSubClient) -> anyhow::Result<()> {
    repeat_delivery(client, "foo", 3)
}

pub fn hundred_publishes(client: &PubSubClient) -> anyhow::Result<()> {
    repeat_delivery(client, "foo", 100)
}

pub fn invalid_input(client: &PubSubClient) -> anyhow::Result<()> {
    let response = client.raw("FOO\r\nchannel")?;
    ensure!(
        response.is_error(),
        "Expected an error from the server, but got none"
    );
    debug!(description = ?response.description(), "server rejected unknown command");
    Ok(())
}

pub fn unique_channels(client: &PubSubClient) -> anyhow::Result<()> {
    let count = 200;
    let channels: Vec<String> = (0..count).map(|idx| format!("chan{}", idx)).collect();

    let subs = subscribe_all(client, &channels)?;
    let (tx, rx) = mpsc::channel();
    let readers = spawn_readers(subs, 1, &tx)?;
    drop(tx);

    let publishes = channels
        .iter()
        .enumerate()
        .map(|(idx, channel)| (channel.clone(), idx.to_string().into_bytes()))
        .collect();
    let outcome = publish_all(client, publishes).and_then(|()| {
        let received = receive(&rx, count)?;
        for (channel, payload) in received {
            let expected = channel.trim_start_matches("chan").as_bytes();
            ensure!(
                payload == expected,
                "Expected `{}` to receive `{}`, but got `{}`",
                channel,
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&payload)
            );
        }
        Ok(())
    });

    stop_all(readers);
    outcome
}

/// `subscribers` connections subscribe to `channel`; one publish must reach all of them.
pub fn fan_out(client: &PubSubClient, channel: &str, subscribers: usize) -> anyhow::Result<()> {
    let channels = vec![channel.to_string(); subscribers];
    let subs = subscribe_all(client, &channels)?;

    let (tx, rx) = mpsc::channel();
    let readers = spawn_readers(subs, 1, &tx)?;
    drop(tx);

    let outcome = client
        .publish(channel, PAYLOAD)
        .map_err(anyhow::Error::from)
        .and_then(|()| expect_payloads(&rx, subscribers));

    stop_all(readers);
    outcome
}

/// One subscriber to `channel` must see each of `publishes` sequential publishes
/// exactly once.
pub fn repeat_delivery(client: &PubSubClient, channel: &str, publishes: usize) -> anyhow::Result<()> {
    let sub = client.subscribe(channel)?;
    let (tx, rx) = mpsc::channel();
    // One read past the expected count catches duplicate deliveries.
    let reader = Reader::spawn(sub, publishes + 1, tx)?;

    let outcome = (0..publishes)
        .try_for_each(|_| client.publish(channel, PAYLOAD))
        .map_err(anyhow::Error::from)
        .and_then(|()| expect_payloads(&rx, publishes))
        .and_then(|()| expect_no_surplus(&rx, publishes));

    reader.stop();
    outcome
}

/// Reads one message, giving up after `wait`. `Ok(None)` means nothing arrived.
pub fn read_within(sub: Subscription, wait: Duration) -> anyhow::Result<Option<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    let reader = Reader::spawn(sub, 1, tx)?;

    let outcome = match rx.recv_timeout(wait) {
        Ok((_, Ok(payload))) => Ok(Some(payload)),
        Ok((_, Err(err))) => Err(err.into()),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("reader exited without a result")),
    };

    reader.stop();
    outcome
}

type Delivery = (String, ClientResult<Vec<u8>>);

/// Dedicated thread draining one subscription.
struct Reader {
    interrupter: Interrupter,
    handle: JoinHandle<()>,
}

impl Reader {
    /// Reads up to `reads` messages, forwarding each (or the first error) to `tx`.
    fn spawn(sub: Subscription, reads: usize, tx: Sender<Delivery>) -> anyhow::Result<Self> {
        let interrupter = sub.interrupter()?;
        let handle = thread::Builder::new()
            .name(format!("reader:{}", sub.channel()))
            .spawn(move || drain(sub, reads, tx))
            .context("failed to spawn reader thread")?;
        Ok(Reader {
            interrupter,
            handle,
        })
    }

    /// Wakes the reader if it is still blocked and waits for it to exit.
    fn stop(self) {
        if let Err(err) = self.interrupter.interrupt() {
            debug!(error = %err, "interrupt failed");
        }
        let _ = self.handle.join();
    }
}

fn drain(mut sub: Subscription, reads: usize, tx: Sender<Delivery>) {
    let channel = sub.channel().to_string();
    for _ in 0..reads {
        let result = sub.read();
        let failed = result.is_err();
        if tx.send((channel.clone(), result)).is_err() || failed {
            break;
        }
    }
    if let Err(err) = sub.close() {
        debug!(%channel, error = %err, "close failed");
    }
}

/// Spawns one reader per subscription. On failure the readers already
/// running are stopped and the remaining subscriptions are released.
fn spawn_readers(subs: Vec<Subscription>, reads: usize, tx: &Sender<Delivery>) -> anyhow::Result<Vec<Reader>> {
    let mut readers = Vec::with_capacity(subs.len());
    for sub in subs {
        match Reader::spawn(sub, reads, tx.clone()) {
            Ok(reader) => readers.push(reader),
            Err(err) => {
                stop_all(readers);
                return Err(err);
            }
        }
    }
    Ok(readers)
}

fn stop_all(readers: Vec<Reader>) {
    for reader in &readers {
        let _ = reader.interrupter.interrupt();
    }
    for reader in readers {
        let _ = reader.handle.join();
    }
}

/// Subscribes to every entry of `channels` concurrently.
fn subscribe_all(client: &PubSubClient, channels: &[String]) -> anyhow::Result<Vec<Subscription>> {
    let handles: Vec<JoinHandle<ClientResult<Subscription>>> = channels
        .iter()
        .map(|channel| {
            let client = client.clone();
            let channel = channel.clone();
            thread::spawn(move || client.subscribe(&channel))
        })
        .collect();

    let mut subs = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(sub)) => subs.push(sub),
            Ok(Err(err)) => {
                first_err.get_or_insert_with(|| anyhow::Error::from(err));
            }
            Err(_) => {
                first_err.get_or_insert_with(|| anyhow!("subscribe thread panicked"));
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(subs),
    }
}

/// Publishes every `(channel, payload)` pair concurrently.
fn publish_all(client: &PubSubClient, publishes: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
    let handles: Vec<JoinHandle<ClientResult<()>>> = publishes
        .into_iter()
        .map(|(channel, payload)| {
            let client = client.clone();
            thread::spawn(move || client.publish(&channel, &payload))
        })
        .collect();

    let mut outcome = Ok(());
    for handle in handles {
        let result = match handle.join() {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(_) => Err(anyhow!("publish thread panicked")),
        };
        if outcome.is_ok() {
            outcome = result;
        }
    }
    outcome
}

/// Waits for `expected` deliveries, failing on the first read error.
fn receive(rx: &Receiver<Delivery>, expected: usize) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let mut received = Vec::with_capacity(expected);
    while received.len() < expected {
        match rx.recv_timeout(DELIVERY_WAIT) {
            Ok((channel, Ok(payload))) => received.push((channel, payload)),
            Ok((channel, Err(err))) => {
                return Err(anyhow::Error::from(err).context(format!("reading `{}`", channel)))
            }
            Err(_) => bail!(
                "Expected {} messages to be received, but got {}",
                expected,
                received.len()
            ),
        }
    }
    Ok(received)
}

/// Waits for `expected` deliveries that all carry the scenario payload.
fn expect_payloads(rx: &Receiver<Delivery>, expected: usize) -> anyhow::Result<()> {
    for (channel, payload) in receive(rx, expected)? {
        ensure!(
            payload == PAYLOAD,
            "Expected `{}` to receive `Hello`, but got `{}`",
            channel,
            String::from_utf8_lossy(&payload)
        );
    }
    Ok(())
}

/// Fails if another delivery shows up within the isolation window.
fn expect_no_surplus(rx: &Receiver<Delivery>, expected: usize) -> anyhow::Result<()> {
    match rx.recv_timeout(ISOLATION_WAIT) {
        Ok((_, Ok(payload))) => bail!(
            "Expected exactly {} messages, but got an extra `{}`",
            expected,
            String::from_utf8_lossy(&payload)
        ),
        Ok((channel, Err(err))) => Err(anyhow::Error::from(err).context(format!("reading `{}`", channel))),
        Err(RecvTimeoutError::Timeout) => Ok(()),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("reader exited without a result")),
    }
}
