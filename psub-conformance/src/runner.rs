//! # Scenario Runner
//!
//! Purpose: Run named scenarios one after another, each under a wall-clock
//! timeout, and record whether it passed, failed or timed out.
//!
//! ## Design Principles
//! 1. **One Thread per Scenario**: The scenario body runs on its own thread
//!    so the supervisor can stop waiting without cooperation from the body.
//! 2. **Sequential Supervision**: A scenario finishes (or times out) before
//!    the next one starts.
//! 3. **Abandon, Don't Kill**: A timed-out scenario thread is detached and
//!    left to finish or leak on its own.
//! 4. **Generic over the Client**: The runner only clones and hands out the
//!    capability; it never calls into it.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::report::{RunReport, ScenarioReport};

/// Supervision timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Scenario body. Returns `Ok(())` on success or a descriptive failure.
pub type ScenarioFn<C> = fn(&C) -> anyhow::Result<()>;

/// A named scenario.
pub struct Scenario<C> {
    pub name: &'static str,
    pub run: ScenarioFn<C>,
}

impl<C> Scenario<C> {
    pub const fn new(name: &'static str, run: ScenarioFn<C>) -> Self {
        Scenario { name, run }
    }
}

impl<C> Clone for Scenario<C> {
    fn clone(&self) -> Self {
        Scenario {
            name: self.name,
            run: self.run,
        }
    }
}

/// Result of supervising one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { reason: String },
    TimedOut { after_ms: u64 },
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

/// Sequential scenario supervisor.
pub struct Runner<C> {
    client: C,
    timeout: Duration,
    scenarios: Vec<Scenario<C>>,
}

impl<C> Runner<C>
where
    C: Clone + Send + 'static,
{
    /// Creates a runner with no scenarios.
    pub fn new(client: C, timeout: Duration) -> Self {
        Runner {
            client,
            timeout,
            scenarios: Vec::new(),
        }
    }

    /// Appends `scenarios` in order.
    pub fn with_scenarios(mut self, scenarios: impl IntoIterator<Item = Scenario<C>>) -> Self {
        self.scenarios.extend(scenarios);
        self
    }

    /// Appends one scenario.
    pub fn add(&mut self, name: &'static str, run: ScenarioFn<C>) {
        self.scenarios.push(Scenario::new(name, run));
    }

    /// Keeps only scenarios whose name contains `pattern`.
    pub fn retain_matching(&mut self, pattern: &str) {
        self.scenarios.retain(|scenario| scenario.name.contains(pattern));
    }

    /// Names of the registered scenarios, in run order.
    pub fn names(&self) -> Vec<&'static str> {
        self.scenarios.iter().map(|scenario| scenario.name).collect()
    }

    /// Runs every scenario in order and collects the results.
    pub fn run(&self) -> RunReport {
        let results = self
            .scenarios
            .iter()
            .map(|scenario| {
                info!(scenario = scenario.name, "running scenario");
                let started = Instant::now();
                let outcome = self.run_one(scenario);
                let elapsed = started.elapsed();
                match &outcome {
                    Outcome::Passed => info!(scenario = scenario.name, ?elapsed, "scenario passed"),
                    Outcome::Failed { reason } => {
                        warn!(scenario = scenario.name, %reason, "scenario failed")
                    }
                    Outcome::TimedOut { .. } => {
                        warn!(scenario = scenario.name, timeout = ?self.timeout, "scenario timed out")
                    }
                }
                ScenarioReport {
                    name: scenario.name.to_string(),
                    outcome,
                    elapsed_ms: millis(elapsed),
                }
            })
            .collect();
        RunReport::new(results)
    }

    /// Runs a single scenario under the timeout.
    ///
    /// **Logic**:
    /// 1. Spawn the body on a named thread with a one-slot result channel.
    /// 2. Wait on the channel for at most `timeout`.
    /// 3. A dropped sender without a result means the body panicked.
    pub fn run_one(&self, scenario: &Scenario<C>) -> Outcome {
        // One slot so the body never blocks on send after we stopped waiting.
        let (tx, rx) = mpsc::sync_channel(1);
        let client = self.client.clone();
        let run = scenario.run;

        let spawned = thread::Builder::new()
            .name(format!("scenario:{}", scenario.name))
            .spawn(move || {
                let _ = tx.send(run(&client));
            });
        if let Err(err) = spawned {
            return Outcome::Failed {
                reason: format!("failed to spawn scenario thread: {}", err),
            };
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(err)) => Outcome::Failed {
                reason: format!("{:#}", err),
            },
            Err(RecvTimeoutError::Timeout) => Outcome::TimedOut {
                after_ms: millis(self.timeout),
            },
            Err(RecvTimeoutError::Disconnected) => Outcome::Failed {
                reason: "scenario panicked".to_string(),
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
