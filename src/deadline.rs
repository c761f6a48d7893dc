//! Deadline enforcement for test-body execution.
//!
//! Only the time spent inside the body counts; time spent drawing values is
//! subtracted by the caller before [`DeadlineEnforcer::check`] is called.
//! While generating and shrinking the enforcer runs in [`DeadlineMode::Relaxed`]
//! and allows a quarter more than the configured deadline, so a case sitting
//! right on the boundary is not flagged one run and missed the next. The
//! configured deadline is applied only to the final replay.

use std::time::{Duration, Instant};

use crate::outcome::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineMode {
    Configured,
    Relaxed,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct DeadlineEnforcer {
    deadline: Option<Duration>,
    mode: DeadlineMode,
    started: Option<Instant>,
}

impl DeadlineEnforcer {
    pub fn new(deadline: Option<Duration>) -> Self {
        DeadlineEnforcer {
            deadline,
            mode: if deadline.is_some() {
                DeadlineMode::Configured
            } else {
                DeadlineMode::Disabled
            },
            started: None,
        }
    }

    /// Switch modes. A missing deadline keeps the enforcer disabled.
    pub fn set_mode(&mut self, mode: DeadlineMode) {
        self.mode = if self.deadline.is_some() {
            mode
        } else {
            DeadlineMode::Disabled
        };
    }

    pub fn mode(&self) -> DeadlineMode {
        self.mode
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Bound in force under the current mode.
    pub fn effective_bound(&self) -> Option<Duration> {
        match (self.mode, self.deadline) {
            (DeadlineMode::Configured, Some(d)) => Some(d),
            (DeadlineMode::Relaxed, Some(d)) => Some(d * 5 / 4),
            _ => None,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Time since [`start`](Self::start); zero if it was never called.
    pub fn stop(&mut self) -> Duration {
        self.started
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Fails when `execution` exceeds the bound in force. The configured
    /// deadline is what gets reported, whatever the mode.
    pub fn check(&self, execution: Duration) -> Result<(), FailureReason> {
        match (self.effective_bound(), self.deadline) {
            (Some(bound), Some(configured)) if execution > bound => Err(FailureReason::DeadlineExceeded {
                measured: execution,
                bound: configured,
            }),
            _ => Ok(()),
        }
    }
}
