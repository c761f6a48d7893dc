//! # Health checks
//!
//! The monitor watches the real test body while fresh cases are generated
//! and flags patterns that make a run useless or painfully slow:
//!
//! - `filter_too_much`: most generated cases are rejected by filters or
//!   assumptions before enough valid ones are found.
//! - `data_too_large`: generated cases keep exceeding the size ceiling or the
//!   draw budget.
//! - `too_slow`: the body keeps taking longer than the slow threshold.
//!
//! Only [`CaseSource::Generated`] cases are sampled. Database replays,
//! shrinking and reproduction runs are ignored, so whether a check fires
//! depends on the seed alone. Sampling stops once enough valid cases have
//! been seen.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::encoded_len;
use crate::error::SettingsError;
use crate::outcome::{CaseOutcome, CaseSource, GaveUpReason, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    FilterTooMuch,
    DataTooLarge,
    TooSlow,
}

impl HealthCheck {
    pub fn name(&self) -> &'static str {
        match self {
            HealthCheck::FilterTooMuch => "filter_too_much",
            HealthCheck::DataTooLarge => "data_too_large",
            HealthCheck::TooSlow => "too_slow",
        }
    }

    pub fn all() -> [HealthCheck; 3] {
        [HealthCheck::FilterTooMuch, HealthCheck::DataTooLarge, HealthCheck::TooSlow]
    }
}

impl fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HealthCheck {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HealthCheck::all()
            .into_iter()
            .find(|check| check.name() == s.trim())
            .ok_or_else(|| SettingsError::InvalidValue {
                key: "suppress_health_check".to_string(),
                value: s.to_string(),
                reason: "unknown health check".to_string(),
            })
    }
}

/// Thresholds the monitor flags at.
#[derive(Debug, Clone)]
pub struct HealthCheckLimits {
    /// Sampling stops after this many valid cases.
    pub valid_window: u64,
    pub max_rejected: u64,
    pub max_large: u64,
    pub max_slow: u64,
    /// Encoded size (bytes) above which a case counts as large.
    pub size_ceiling: usize,
    pub slow_threshold: Duration,
}

impl Default for HealthCheckLimits {
    fn default() -> Self {
        HealthCheckLimits {
            valid_window: 10,
            max_rejected: 50,
            max_large: 10,
            max_slow: 5,
            size_ceiling: 8 * 1024,
            slow_threshold: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckFailure {
    pub check: HealthCheck,
    pub message: String,
}

impl HealthCheckFailure {
    pub fn into_reason(self) -> GaveUpReason {
        GaveUpReason::HealthCheck {
            check: self.check,
            message: self.message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckMonitor {
    limits: HealthCheckLimits,
    suppressed: BTreeSet<HealthCheck>,
    valid: u64,
    rejected: u64,
    large: u64,
    slow: u64,
    flagged: bool,
}

impl HealthCheckMonitor {
    pub fn new(limits: HealthCheckLimits, suppressed: BTreeSet<HealthCheck>) -> Self {
        HealthCheckMonitor {
            limits,
            suppressed,
            valid: 0,
            rejected: 0,
            large: 0,
            slow: 0,
            flagged: false,
        }
    }

    /// Still sampling: no check has fired and the valid window is not full.
    pub fn is_active(&self) -> bool {
        !self.flagged && self.valid < self.limits.valid_window
    }

    /// Feed one execution; returns a failure the first time a check fires.
    pub fn observe(&mut self, case: &CaseOutcome) -> Option<HealthCheckFailure> {
        if case.source != CaseSource::Generated || !self.is_active() {
            return None;
        }

        match &case.outcome {
            Outcome::GaveUp(GaveUpReason::Rejected(_)) => self.rejected += 1,
            Outcome::GaveUp(GaveUpReason::Overrun { .. }) => self.large += 1,
            Outcome::GaveUp(_) => {}
            Outcome::Passed | Outcome::Failed(_) => {
                self.valid += 1;
                if encoded_len(&case.draws) > self.limits.size_ceiling {
                    self.large += 1;
                }
            }
        }
        if case.timing.execution >= self.limits.slow_threshold {
            self.slow += 1;
        }

        let failure = self.check();
        if failure.is_some() {
            self.flagged = true;
        }
        failure
    }

    fn check(&self) -> Option<HealthCheckFailure> {
        let enabled = |check: HealthCheck| !self.suppressed.contains(&check);

        if enabled(HealthCheck::FilterTooMuch) && self.rejected >= self.limits.max_rejected {
            return Some(HealthCheckFailure {
                check: HealthCheck::FilterTooMuch,
                message: format!(
                    "too much filtering: only {} valid cases were generated while {} were rejected",
                    self.valid, self.rejected
                ),
            });
        }
        if enabled(HealthCheck::DataTooLarge) && self.large >= self.limits.max_large {
            return Some(HealthCheckFailure {
                check: HealthCheck::DataTooLarge,
                message: format!(
                    "{} generated cases exceeded the size limit of {} bytes",
                    self.large, self.limits.size_ceiling
                ),
            });
        }
        if enabled(HealthCheck::TooSlow) && self.slow >= self.limits.max_slow {
            return Some(HealthCheckFailure {
                check: HealthCheck::TooSlow,
                message: format!(
                    "{} cases took longer than {:.0}ms to execute",
                    self.slow,
                    self.limits.slow_threshold.as_secs_f64() * 1000.0
                ),
            });
        }
        None
    }
}
