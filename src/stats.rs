//! Per-run statistics: how time was split between generating and running.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::outcome::{CaseOutcome, CaseSource, Outcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub generation_time: Duration,
    pub execution_time: Duration,
    pub cases: u64,
    pub passed: u64,
    pub failed: u64,
    pub gave_up: u64,
    pub database_replays: u64,
    pub shrink_attempts: u64,
    pub shrinks: u64,
    /// Distinct `event` features seen across the run, with how often.
    pub events: Vec<(String, u64)>,
}

impl RunStatistics {
    pub fn record(&mut self, case: &CaseOutcome) {
        self.generation_time += case.timing.generation;
        self.execution_time += case.timing.execution;
        self.cases += 1;
        match case.outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::GaveUp(_) => self.gave_up += 1,
        }
        if case.source == CaseSource::Database {
            self.database_replays += 1;
        }
        for (name, value) in &case.features {
            let label = format!("{}: {}", name, value);
            match self.events.iter_mut().find(|(l, _)| *l == label) {
                Some((_, count)) => *count += 1,
                None => self.events.push((label, 1)),
            }
        }
    }

    /// Share of measured time spent generating data, in percent.
    pub fn generation_percentage(&self) -> f64 {
        let total = self.generation_time + self.execution_time;
        if total.is_zero() {
            0.0
        } else {
            100.0 * self.generation_time.as_secs_f64() / total.as_secs_f64()
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "generation_ms": self.generation_time.as_secs_f64() * 1000.0,
            "execution_ms": self.execution_time.as_secs_f64() * 1000.0,
            "generation_percentage": self.generation_percentage(),
            "cases": self.cases,
            "passed": self.passed,
            "failed": self.failed,
            "gave_up": self.gave_up,
            "database_replays": self.database_replays,
            "shrink_attempts": self.shrink_attempts,
            "shrinks": self.shrinks,
        })
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  - {} passing, {} failing, {} invalid examples ({} from the database)",
            self.passed, self.failed, self.gave_up, self.database_replays
        )?;
        writeln!(
            f,
            "  - {:.0}% of time spent in data generation ({:.2}ms generating, {:.2}ms executing)",
            self.generation_percentage(),
            self.generation_time.as_secs_f64() * 1000.0,
            self.execution_time.as_secs_f64() * 1000.0
        )?;
        if self.shrink_attempts > 0 {
            writeln!(
                f,
                "  - Tried {} shrinks of which {} were successful",
                self.shrink_attempts, self.shrinks
            )?;
        }
        if !self.events.is_empty() {
            writeln!(f, "  - Events:")?;
            for (label, count) in &self.events {
                writeln!(
                    f,
                    "    * {:.2}%, {}",
                    100.0 * *count as f64 / self.cases.max(1) as f64,
                    label
                )?;
            }
        }
        Ok(())
    }
}
