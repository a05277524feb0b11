//! psub-conformance entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use psub_client::PubSubClient;
use psub_conformance::scenarios::catalogue;
use psub_conformance::{Cli, Runner};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let client = PubSubClient::new(cli.address.clone());
    let mut runner = Runner::new(client, cli.scenario_timeout()).with_scenarios(catalogue());
    if let Some(pattern) = &cli.filter {
        runner.retain_matching(pattern);
    }
    if runner.names().is_empty() {
        anyhow::bail!("no scenario matches the filter");
    }

    let report = runner.run();
    if cli.json {
        println!("{}", report.generate_json()?);
    } else {
        print!("{}", report.generate_text());
    }
    Ok(report.all_passed())
}
