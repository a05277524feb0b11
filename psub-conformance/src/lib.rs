//! Conformance harness for PUB/SUB servers.
//!
//! Drives a fixed set of scenarios through [`psub_client::PubSubClient`]
//! and reports each one as passed, failed or timed out.

pub mod cli;
pub mod report;
pub mod runner;
pub mod scenarios;

pub use cli::Cli;
pub use report::{RunReport, ScenarioReport};
pub use runner::{Outcome, Runner, Scenario, ScenarioFn, DEFAULT_TIMEOUT};
