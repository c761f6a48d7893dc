//! The context object handed to a test body.
//!
//! A [`TestCase`] owns the [`DataSource`] for one execution. Draws made from
//! inside the body go through the same source as top-level arguments, so a
//! recorded [`DrawSequence`] rebuilds interactive draws exactly as well.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::data::{DataSource, DrawSequence, PredicateCounts};
use crate::error::FailedDraw;
use crate::strategy::{booleans, integers, Strategy, Value};

/// How a test body stops early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseError {
    /// The case could not be generated; it counts as invalid, not failing.
    #[error(transparent)]
    Draw(#[from] FailedDraw),

    /// The property does not hold for this input.
    #[error("{0}")]
    Failed(String),
}

impl CaseError {
    pub fn fail<S: Into<String>>(message: S) -> CaseError {
        CaseError::Failed(message.into())
    }
}

pub type CaseResult = Result<(), CaseError>;

pub struct TestCase {
    source: DataSource,
    filter_attempts: u32,
    draw_time: Duration,
    arguments: Vec<(String, Value)>,
    notes: Vec<String>,
    features: BTreeMap<String, String>,
}

/// Everything an execution leaves behind once the body has returned.
#[derive(Debug, Clone)]
pub(crate) struct CaseTrace {
    pub draws: DrawSequence,
    pub draw_time: Duration,
    pub arguments: Vec<(String, Value)>,
    pub notes: Vec<String>,
    pub features: BTreeMap<String, String>,
    pub predicates: BTreeMap<String, PredicateCounts>,
}

impl TestCase {
    pub(crate) fn new(source: DataSource, filter_attempts: u32) -> TestCase {
        TestCase {
            source,
            filter_attempts,
            draw_time: Duration::ZERO,
            arguments: Vec::new(),
            notes: Vec::new(),
            features: BTreeMap::new(),
        }
    }

    /// Draw a value; it is reported as `draw_<n>` in the falsifying example.
    pub fn draw(&mut self, strategy: &Strategy) -> Result<Value, CaseError> {
        let name = format!("draw_{}", self.arguments.len() + 1);
        self.draw_named(&name, strategy)
    }

    pub fn draw_named(&mut self, name: &str, strategy: &Strategy) -> Result<Value, CaseError> {
        let start = Instant::now();
        let result = strategy.generate(&mut self.source, self.filter_attempts);
        self.draw_time += start.elapsed();
        let value = result?;
        self.arguments.push((name.to_string(), value.clone()));
        Ok(value)
    }

    pub fn draw_integer(&mut self, min: i64, max: i64) -> Result<i64, CaseError> {
        let value = self.draw(&integers(min, max))?;
        value
            .as_integer()
            .ok_or_else(|| CaseError::Draw(FailedDraw::InvalidArgument("integers produced a non-integer".to_string())))
    }

    pub fn draw_bool(&mut self) -> Result<bool, CaseError> {
        let value = self.draw(&booleans())?;
        value
            .as_bool()
            .ok_or_else(|| CaseError::Draw(FailedDraw::InvalidArgument("booleans produced a non-boolean".to_string())))
    }

    /// Discard this case unless `condition` holds.
    pub fn assume(&mut self, condition: bool) -> CaseResult {
        if condition {
            Ok(())
        } else {
            self.reject()
        }
    }

    pub fn reject(&mut self) -> CaseResult {
        Err(CaseError::Draw(FailedDraw::Rejected("assumption failed".to_string())))
    }

    /// Attach a message to the report if this case turns out to fail.
    pub fn note<S: Into<String>>(&mut self, message: S) {
        self.notes.push(message.into());
    }

    /// Record a feature of this case. Passing cases with features not seen
    /// before are kept in the database for coverage.
    pub fn event<S: Into<String>>(&mut self, name: S, value: S) {
        self.features.insert(name.into(), value.into());
    }

    pub fn draw_time(&self) -> Duration {
        self.draw_time
    }

    pub fn draw_count(&self) -> usize {
        self.source.draw_count()
    }

    pub(crate) fn finish(self) -> CaseTrace {
        let predicates = self.source.predicates().clone();
        CaseTrace {
            draws: self.source.into_sequence(),
            draw_time: self.draw_time,
            arguments: self.arguments,
            notes: self.notes,
            features: self.features,
            predicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::lists;

    #[test]
    fn test_interactive_draws_replay() {
        let run = |source: DataSource| {
            let mut case = TestCase::new(source, 3);
            let n = case.draw_integer(0, 5).unwrap();
            let items = case.draw(&lists(integers(0, n)).sized(0, 4)).unwrap();
            let flag = case.draw_bool().unwrap();
            (n, items, flag, case.finish())
        };

        let (n, items, flag, trace) = run(DataSource::new(42));
        let (n2, items2, flag2, trace2) = run(DataSource::for_replay(&trace.draws, 7));
        assert_eq!((n, items, flag), (n2, items2, flag2));
        assert_eq!(trace.draws, trace2.draws);
        assert_eq!(trace.arguments.len(), 3);
        assert_eq!(trace.arguments[0].0, "draw_1");
    }

    #[test]
    fn test_assume_rejects() {
        let mut case = TestCase::new(DataSource::new(0), 3);
        assert!(case.assume(true).is_ok());
        assert!(matches!(case.assume(false), Err(CaseError::Draw(FailedDraw::Rejected(_)))));
    }

    #[test]
    fn test_notes_and_events_are_kept() {
        let mut case = TestCase::new(DataSource::new(0), 3);
        case.note("x was large");
        case.event("branch", "left");
        let trace = case.finish();
        assert_eq!(trace.notes, vec!["x was large".to_string()]);
        assert_eq!(trace.features.get("branch").map(String::as_str), Some("left"));
    }

    #[test]
    fn test_filter_evaluations_are_counted() {
        let mut case = TestCase::new(DataSource::new(0), 3);
        case.draw(&integers(0, 10).filter("anything", |_| true)).unwrap();
        case.draw(&integers(0, 10).filter("anything", |_| true)).unwrap();
        assert!(case.draw(&integers(0, 10).filter("nothing", |_| false)).is_err());
        let trace = case.finish();

        let anything = trace.predicates["anything"];
        assert_eq!((anything.satisfied, anything.unsatisfied), (2, 0));
        let nothing = trace.predicates["nothing"];
        assert_eq!((nothing.satisfied, nothing.unsatisfied), (0, 3));
    }
}
