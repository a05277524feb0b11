//! Run report: per-scenario outcomes with text and JSON renderings.

use std::fmt;

use serde::Serialize;

use crate::runner::Outcome;

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

/// Outcomes of a whole run, in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub results: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn new(results: Vec<ScenarioReport>) -> Self {
        RunReport { results }
    }

    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed { .. }))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::TimedOut { .. }))
    }

    /// True when every scenario passed. An empty run counts as passing.
    pub fn all_passed(&self) -> bool {
        self.passed() == self.results.len()
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Human-readable report, one block per scenario plus a summary line.
    pub fn generate_text(&self) -> String {
        self.to_string()
    }

    /// Machine-readable report.
    pub fn generate_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "Running scenario -> ({})", result.name)?;
            match &result.outcome {
                Outcome::Passed => writeln!(f, "  passed ({} ms)", result.elapsed_ms)?,
                Outcome::Failed { reason } => writeln!(f, "  failed ({})", reason)?,
                Outcome::TimedOut { after_ms } => {
                    writeln!(f, "  timed out after waiting for {} ms", after_ms)?
                }
            }
        }
        writeln!(
            f,
            "{} passed, {} failed, {} timed out",
            self.passed(),
            self.failed(),
            self.timed_out()
        )
    }
}
