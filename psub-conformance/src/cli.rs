//! Command-line interface definition.

use std::time::Duration;

use clap::Parser;

use crate::runner::DEFAULT_TIMEOUT;

/// Run PUB/SUB conformance scenarios against a live server
#[derive(Debug, Parser)]
#[command(name = "psub-conformance")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Host running the PUB/SUB TCP server
    #[arg(long, short, env = "PSUB_ADDRESS", default_value = "localhost:8081")]
    pub address: String,

    /// Seconds to wait for each scenario before giving up on it
    #[arg(long, short, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Only run scenarios whose name contains this text
    #[arg(long, short)]
    pub filter: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,
}

impl Cli {
    /// Per-scenario supervision timeout.
    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
