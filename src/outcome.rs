//! Outcomes of single executions and of whole runs.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::data::{DrawSequence, PredicateCounts};
use crate::health::HealthCheck;
use crate::strategy::Value;

/// Where the draws for an execution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseSource {
    Database,
    Generated,
    Shrink,
    FinalReplay,
    Reproduction,
}

impl CaseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseSource::Database => "database",
            CaseSource::Generated => "generated",
            CaseSource::Shrink => "shrinking",
            CaseSource::FinalReplay => "final_replay",
            CaseSource::Reproduction => "reproduction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The body returned a failure or panicked.
    Body(String),
    /// Execution took longer than the deadline in force.
    DeadlineExceeded { measured: Duration, bound: Duration },
    /// A failure seen earlier could not be reproduced.
    Flaky(String),
}

impl FailureReason {
    /// Identity used to decide whether a shrink candidate fails "the same way".
    ///
    /// Messages of body failures often embed the failing values, so only the
    /// kind of failure is compared.
    pub fn origin(&self) -> &'static str {
        match self {
            FailureReason::Body(_) => "body",
            FailureReason::DeadlineExceeded { .. } => "deadline",
            FailureReason::Flaky(_) => "flaky",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Body(message) => write!(f, "{}", message),
            FailureReason::DeadlineExceeded { measured, bound } => write!(
                f,
                "deadline exceeded: test took {:.2}ms, which exceeds the deadline of {:.2}ms",
                measured.as_secs_f64() * 1000.0,
                bound.as_secs_f64() * 1000.0
            ),
            FailureReason::Flaky(message) => write!(f, "flaky: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GaveUpReason {
    Rejected(String),
    Overrun { limit: usize },
    InvalidArgument(String),
    TooMuchFiltering { rejected: u64, valid: u64 },
    HealthCheck { check: HealthCheck, message: String },
    Interrupted,
}

impl fmt::Display for GaveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GaveUpReason::Rejected(message) => write!(f, "rejected: {}", message),
            GaveUpReason::Overrun { limit } => write!(f, "overrun: more than {} draws", limit),
            GaveUpReason::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
            GaveUpReason::TooMuchFiltering { rejected, valid } => write!(
                f,
                "too much filtering: {} cases were rejected while only {} valid cases were found",
                rejected, valid
            ),
            GaveUpReason::HealthCheck { check, message } => {
                write!(f, "health check {} failed: {}", check, message)
            }
            GaveUpReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(FailureReason),
    GaveUp(GaveUpReason),
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed(_) => "failed",
            Outcome::GaveUp(_) => "gave_up",
        }
    }

    /// Human readable reason, empty for passing outcomes.
    pub fn reason(&self) -> String {
        match self {
            Outcome::Passed => String::new(),
            Outcome::Failed(reason) => reason.to_string(),
            Outcome::GaveUp(reason) => reason.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Split of one execution's wall-clock time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub generation: Duration,
    pub execution: Duration,
}

/// The immutable result of executing the body once.
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub outcome: Outcome,
    pub timing: Timing,
    pub draws: DrawSequence,
    pub source: CaseSource,
    pub arguments: Vec<(String, Value)>,
    pub notes: Vec<String>,
    pub features: BTreeMap<String, String>,
    /// Accept and reject counts of every filter evaluated in this case.
    pub predicates: BTreeMap<String, PredicateCounts>,
    /// Message of a panic raised by the body, if any.
    pub panic: Option<String>,
}

impl CaseOutcome {
    /// `name=value` pairs joined the way the falsifying example is printed.
    pub fn representation(&self) -> String {
        let parts: Vec<String> = self
            .arguments
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtering_reason_mentions_filtering() {
        let outcome = Outcome::GaveUp(GaveUpReason::TooMuchFiltering { rejected: 100, valid: 1 });
        assert_eq!(outcome.status(), "gave_up");
        assert!(outcome.reason().contains("filtering"));
    }

    #[test]
    fn test_deadline_reason() {
        let reason = FailureReason::DeadlineExceeded {
            measured: Duration::from_millis(2000),
            bound: Duration::from_millis(1000),
        };
        assert!(reason.to_string().starts_with("deadline exceeded"));
        assert_eq!(reason.origin(), "deadline");
    }

    #[test]
    fn test_representation() {
        let outcome = CaseOutcome {
            outcome: Outcome::Passed,
            timing: Timing::default(),
            draws: DrawSequence::default(),
            source: CaseSource::Generated,
            arguments: vec![
                ("x".to_string(), Value::Integer(3)),
                ("ys".to_string(), Value::List(vec![Value::Boolean(true)])),
            ],
            notes: Vec::new(),
            features: BTreeMap::new(),
            predicates: BTreeMap::new(),
            panic: None,
        };
        assert_eq!(outcome.representation(), "(x=3, ys=[true])");
    }
}
