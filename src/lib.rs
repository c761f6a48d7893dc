//! # Conjecture Engine
//!
//! A property-based testing engine. Every random decision a test makes is
//! drawn from a [`DataSource`] and recorded as a sequence of fixed-width
//! draws, so any test case can be replayed, stored, shrunk or shared as a
//! short reproduction token.
//!
//! ```no_run
//! use conjecture_engine::{integers, CaseError, ConjectureRunner, Settings};
//!
//! let mut runner = ConjectureRunner::new("sum_is_small", Settings::default());
//! let result = runner
//!     .run(|case| {
//!         let a = case.draw_named("a", &integers(0, 100))?;
//!         let b = case.draw_named("b", &integers(0, 100))?;
//!         let sum = a.as_integer().unwrap_or(0) + b.as_integer().unwrap_or(0);
//!         if sum > 150 {
//!             return Err(CaseError::fail(format!("sum was {}", sum)));
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//! println!("{}", result.report());
//! ```

pub mod data;
pub mod deadline;
pub mod distributions;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod health;
pub mod ints;
pub mod observability;
pub mod outcome;
pub mod persistence;
pub mod settings;
pub mod shrinking;
pub mod stats;
pub mod strategy;
pub mod testcase;

pub use data::{DataSource, DrawRecord, DrawSequence, PredicateCounts};
pub use deadline::{DeadlineEnforcer, DeadlineMode};
pub use encoding::{decode_token, encode_token};
pub use engine::{ConjectureRunner, Counterexample, InterruptHandle, RunResult};
pub use error::{DatabaseError, EngineError, FailedDraw, SettingsError, TokenError};
pub use health::{HealthCheck, HealthCheckFailure, HealthCheckLimits, HealthCheckMonitor};
pub use observability::{CollectingSink, JsonLinesSink, Observation, ObservationSink};
pub use outcome::{CaseOutcome, CaseSource, FailureReason, GaveUpReason, Outcome};
pub use persistence::{DatabaseKey, DirectoryDatabase, ExampleDatabase, ExampleStore, InMemoryDatabase};
pub use settings::{Phase, Settings, Verbosity};
pub use shrinking::{ShrinkBudget, ShrinkReport, Shrinker};
pub use stats::RunStatistics;
pub use strategy::{any_integer, booleans, frequencies, integers, just, lists, one_of, tuples, Strategy, Value};
pub use testcase::{CaseError, CaseResult, TestCase};
