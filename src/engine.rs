//! ConjectureRunner - the test execution engine
//!
//! The runner drives one property through its phases:
//!
//! 1. **Reuse**: replay the failing entries saved for this test (to catch
//!    regressions), then its covering entries. Failing entries that no longer
//!    fail are demoted to covering.
//! 2. **Generate**: run fresh cases, each from its own seed derived from the
//!    run seed, under the relaxed deadline. The health check monitor watches
//!    these cases, and only these.
//! 3. **Shrink**: minimize the first failure, still under the relaxed
//!    deadline, keeping only candidates that fail the same way.
//! 4. **Final replay**: run the minimal case once more under the configured
//!    deadline. If it no longer fails, the original failure is replayed; if
//!    that passes too the failure is reported as flaky.
//!
//! A reproduction token in [`Settings::reproduce`] skips all of this and
//! replays exactly that one case under the configured deadline.
//!
//! Failing cases are written to the database as soon as they are found and
//! replaced by their shrunk form afterwards. Database problems are logged and
//! never abort a run.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use byteorder::{BigEndian, ByteOrder};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::{DataSource, DrawSequence};
use crate::deadline::{DeadlineEnforcer, DeadlineMode};
use crate::encoding::{decode_token, encode_token};
use crate::error::{DatabaseResult, EngineError, FailedDraw};
use crate::health::{HealthCheckFailure, HealthCheckMonitor};
use crate::observability::{
    unix_timestamp, CaseMetadata, MessageObservation, Observation, ObservationSink, TestCaseObservation,
};
use crate::outcome::{CaseOutcome, CaseSource, FailureReason, GaveUpReason, Outcome, Timing};
use crate::persistence::{DatabaseKey, DirectoryDatabase, EntryKind, ExampleDatabase, ExampleStore};
use crate::settings::{Phase, Settings, Verbosity};
use crate::shrinking::Shrinker;
use crate::stats::RunStatistics;
use crate::strategy::{Strategy, Value};
use crate::testcase::{CaseError, CaseResult, TestCase};

/// Fallback seed for draws past the end of a replayed sequence.
const REPLAY_SEED: u64 = 0;

/// Stops a run between two test cases.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The minimal failing case of a run and how to get it back.
#[derive(Debug, Clone)]
pub struct Counterexample {
    pub draws: DrawSequence,
    pub arguments: Vec<(String, Value)>,
    pub representation: String,
    pub notes: Vec<String>,
    pub reason: FailureReason,
    pub panic: Option<String>,
    /// Reproduction token, unless `print_blob` is off.
    pub token: Option<String>,
    /// Seed that finds this failure again. `None` when the failure came from
    /// the database, where the seed alone would not reproduce it.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub property: String,
    pub outcome: Outcome,
    pub counterexample: Option<Counterexample>,
    pub statistics: RunStatistics,
    pub health_check: Option<HealthCheckFailure>,
    pub seed: Option<u64>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// Text for the test-framework adapter to show the user.
    pub fn report(&self) -> String {
        let mut out = String::new();
        match &self.outcome {
            Outcome::Passed => {
                let _ = writeln!(out, "{} passed {} examples", self.property, self.statistics.passed);
            }
            Outcome::GaveUp(reason) => {
                let _ = writeln!(out, "{} gave up: {}", self.property, reason);
            }
            Outcome::Failed(reason) => {
                if let Some(example) = &self.counterexample {
                    let _ = writeln!(out, "Falsifying example: {}{}", self.property, example.representation);
                    for note in &example.notes {
                        let _ = writeln!(out, "{}", note);
                    }
                }
                let _ = writeln!(out, "{}", reason);
                if let Some(example) = &self.counterexample {
                    if let Some(token) = &example.token {
                        let _ = writeln!(
                            out,
                            "You can reproduce this example by setting CONJECTURE_REPRODUCE={}",
                            token
                        );
                    }
                    if let Some(seed) = example.seed {
                        let _ = writeln!(out, "You can find this failure again with CONJECTURE_SEED={}", seed);
                    }
                }
            }
        }
        let _ = write!(out, "{}", self.statistics);
        out
    }
}

/// How the generation phase ended.
enum GenerationEnd {
    Exhausted,
    Failed(CaseOutcome),
    GaveUp(GaveUpReason),
    HealthCheck(HealthCheckFailure),
}

pub struct ConjectureRunner {
    name: String,
    settings: Settings,
    key: DatabaseKey,
    store: Option<ExampleStore>,
    enforcer: DeadlineEnforcer,
    sinks: Vec<Box<dyn ObservationSink>>,
    interrupted: Arc<AtomicBool>,
    stats: RunStatistics,
    run_start: f64,
    seen_features: HashSet<(String, String)>,
    covering_saved: usize,
}

impl ConjectureRunner {
    /// Runner for the property identified by `name`.
    pub fn new(name: &str, settings: Settings) -> Self {
        ConjectureRunner {
            name: name.to_string(),
            key: DatabaseKey::from_function(name, &[]),
            enforcer: DeadlineEnforcer::new(settings.deadline),
            settings,
            store: None,
            sinks: Vec::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            stats: RunStatistics::default(),
            run_start: 0.0,
            seen_features: HashSet::new(),
            covering_saved: 0,
        }
    }

    /// Use `db` instead of the directory named in the settings.
    pub fn with_database(mut self, db: Box<dyn ExampleDatabase>) -> Self {
        self.store = Some(ExampleStore::new(db));
        self
    }

    pub fn with_observer(mut self, sink: Box<dyn ObservationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flag: self.interrupted.clone(),
        }
    }

    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run a property whose values come from a single strategy.
    pub fn run_given<F>(&mut self, strategy: &Strategy, mut body: F) -> Result<RunResult, EngineError>
    where
        F: FnMut(&Value) -> CaseResult,
    {
        self.run(|case| {
            let value = case.draw_named("value", strategy)?;
            body(&value)
        })
    }

    pub fn run<F>(&mut self, mut test: F) -> Result<RunResult, EngineError>
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        self.settings.validate()?;
        self.stats = RunStatistics::default();
        self.run_start = unix_timestamp(SystemTime::now());
        self.open_database();

        if let Some(token) = self.settings.reproduce.clone() {
            return self.reproduce(&token, &mut test);
        }

        let seed = self.resolve_seed();
        self.log_phase(format_args!("running {} with seed {}", self.name, seed));

        let mut failure = None;
        let mut from_database = false;
        if self.settings.has_phase(Phase::Reuse) {
            failure = self.reuse_phase(&mut test)?;
            from_database = failure.is_some();
        }
        if failure.is_none() && self.interrupted.load(Ordering::SeqCst) {
            return Ok(self.finish(Outcome::GaveUp(GaveUpReason::Interrupted), None, None, Some(seed)));
        }

        if failure.is_none() && self.settings.has_phase(Phase::Generate) {
            match self.generate_phase(seed, &mut test)? {
                GenerationEnd::Exhausted => {}
                GenerationEnd::Failed(case) => failure = Some(case),
                GenerationEnd::GaveUp(reason) => {
                    return Ok(self.finish(Outcome::GaveUp(reason), None, None, Some(seed)));
                }
                GenerationEnd::HealthCheck(check) => {
                    let outcome = Outcome::GaveUp(check.clone().into_reason());
                    return Ok(self.finish(outcome, None, Some(check), Some(seed)));
                }
            }
        }

        let initial = match failure {
            Some(case) => case,
            None => return Ok(self.finish(Outcome::Passed, None, None, Some(seed))),
        };

        let best = if self.settings.has_phase(Phase::Shrink) {
            self.shrink_phase(&initial, &mut test)
        } else {
            initial.draws.clone()
        };

        let (outcome, example) = self.final_replay(&initial, &best, &mut test);
        let counterexample = self.counterexample(example, &outcome, if from_database { None } else { Some(seed) });
        Ok(self.finish(outcome, Some(counterexample), None, Some(seed)))
    }

    fn open_database(&mut self) {
        if self.store.is_some() {
            return;
        }
        if let Some(path) = self.settings.database.clone() {
            match DirectoryDatabase::new(&path) {
                Ok(db) => self.store = Some(ExampleStore::new(Box::new(db))),
                Err(e) => self.database_error("opening the example database", &e.to_string()),
            }
        }
    }

    fn resolve_seed(&self) -> u64 {
        if let Some(seed) = self.settings.seed {
            seed
        } else if self.settings.derandomize {
            BigEndian::read_u64(&self.key.primary_hash[..8])
        } else {
            rand::random()
        }
    }

    fn reproduce<F>(&mut self, token: &str, test: &mut F) -> Result<RunResult, EngineError>
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        let draws = decode_token(token)?;
        self.log_phase(format_args!("reproducing {} from token", self.name));
        self.enforcer.set_mode(DeadlineMode::Configured);
        let case = self.execute(&draws, CaseSource::Reproduction, REPLAY_SEED, test);
        if let Outcome::GaveUp(GaveUpReason::InvalidArgument(message)) = &case.outcome {
            return Err(EngineError::InvalidArgument(message.clone()));
        }
        let outcome = case.outcome.clone();
        let counterexample = outcome
            .is_failure()
            .then(|| self.counterexample(case, &outcome, None));
        Ok(self.finish(outcome, counterexample, None, None))
    }

    fn reuse_phase<F>(&mut self, test: &mut F) -> Result<Option<CaseOutcome>, EngineError>
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        let key = self.key.clone();
        let loaded = match self.store.as_mut().map(|store| store.load(&key)) {
            None => return Ok(None),
            Some(Ok(loaded)) => loaded,
            Some(Err(e)) => {
                self.database_error("loading saved examples", &e.to_string());
                return Ok(None);
            }
        };
        if loaded.discarded > 0 {
            log::info!("discarded {} saved examples that no longer decode", loaded.discarded);
        }
        self.log_phase(format_args!(
            "reusing {} failing and {} covering examples",
            loaded.failing.len(),
            loaded.covering.len()
        ));

        self.enforcer.set_mode(DeadlineMode::Relaxed);
        let entries = loaded
            .failing
            .into_iter()
            .map(|draws| (EntryKind::Failing, draws))
            .chain(loaded.covering.into_iter().map(|draws| (EntryKind::Covering, draws)));
        for (kind, draws) in entries {
            if self.interrupted.load(Ordering::SeqCst) {
                break;
            }
            let case = self.execute(&draws, CaseSource::Database, REPLAY_SEED, test);
            if case.outcome.is_failure() {
                return Ok(Some(case));
            }
            if let Outcome::GaveUp(GaveUpReason::InvalidArgument(message)) = &case.outcome {
                return Err(EngineError::InvalidArgument(message.clone()));
            }
            if kind == EntryKind::Failing {
                self.with_store("demoting a fixed example", |store, key| store.demote(key, &draws));
            }
        }
        Ok(None)
    }

    fn generate_phase<F>(&mut self, seed: u64, test: &mut F) -> Result<GenerationEnd, EngineError>
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        self.log_phase(format_args!("generating up to {} examples", self.settings.max_examples));
        self.enforcer.set_mode(DeadlineMode::Relaxed);

        let mut monitor = HealthCheckMonitor::new(
            self.settings.health_check_limits(),
            self.settings.suppress_health_check.clone(),
        );
        let mut seeds = ChaCha8Rng::seed_from_u64(seed);
        let mut valid: u64 = 0;
        let mut invalid: u64 = 0;

        while valid < u64::from(self.settings.max_examples) {
            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(GenerationEnd::GaveUp(GaveUpReason::Interrupted));
            }
            let case = self.execute(&DrawSequence::default(), CaseSource::Generated, seeds.next_u64(), test);

            if case.outcome.is_failure() {
                log::info!("found a failing example: {}", case.outcome.reason());
                self.with_store("saving a failing example", |store, key| {
                    store.save(key, &case.draws, EntryKind::Failing)
                });
                return Ok(GenerationEnd::Failed(case));
            }
            match &case.outcome {
                Outcome::Passed => {
                    valid += 1;
                    self.save_if_covering(&case);
                }
                Outcome::GaveUp(GaveUpReason::InvalidArgument(message)) => {
                    return Err(EngineError::InvalidArgument(message.clone()));
                }
                Outcome::GaveUp(_) => invalid += 1,
                Outcome::Failed(_) => {}
            }

            if let Some(failure) = monitor.observe(&case) {
                log::warn!("{}: health check {} failed: {}", self.name, failure.check, failure.message);
                self.emit_message(Observation::Alert, "Health check failed", &failure.message);
                return Ok(GenerationEnd::HealthCheck(failure));
            }
            if invalid >= u64::from(self.settings.max_filter_retries) {
                return Ok(GenerationEnd::GaveUp(GaveUpReason::TooMuchFiltering { rejected: invalid, valid }));
            }
        }
        Ok(GenerationEnd::Exhausted)
    }

    fn save_if_covering(&mut self, case: &CaseOutcome) {
        if self.covering_saved >= self.settings.max_covering_examples {
            return;
        }
        let mut novel = false;
        for feature in &case.features {
            novel |= self.seen_features.insert((feature.0.clone(), feature.1.clone()));
        }
        if novel {
            self.covering_saved += 1;
            self.with_store("saving a covering example", |store, key| {
                store.save(key, &case.draws, EntryKind::Covering)
            });
        }
    }

    fn shrink_phase<F>(&mut self, initial: &CaseOutcome, test: &mut F) -> DrawSequence
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        let origin = match initial.outcome.failure() {
            Some(reason) => reason.origin(),
            None => return initial.draws.clone(),
        };
        self.log_phase(format_args!("shrinking a failing example of {} draws", initial.draws.len()));
        self.enforcer.set_mode(DeadlineMode::Relaxed);

        let budget = self.settings.shrink_budget();
        let interrupted = self.interrupted.clone();
        let report = Shrinker::new(initial.draws.clone(), budget, |candidate: &DrawSequence| {
            if interrupted.load(Ordering::SeqCst) {
                return None;
            }
            let case = self.execute(candidate, CaseSource::Shrink, REPLAY_SEED, &mut *test);
            let same_failure = matches!(case.outcome.failure(), Some(reason) if reason.origin() == origin);
            if same_failure {
                Some(case.draws)
            } else {
                None
            }
        })
        .run();

        self.stats.shrink_attempts += report.attempts as u64;
        self.stats.shrinks += report.improvements as u64;
        if report.budget_exhausted {
            log::info!("shrink budget exhausted after {} attempts", report.attempts);
        }
        report.best
    }

    /// Replay the minimal case under the configured deadline, falling back to
    /// the original failure if it does not reproduce.
    fn final_replay<F>(&mut self, initial: &CaseOutcome, best: &DrawSequence, test: &mut F) -> (Outcome, CaseOutcome)
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        self.enforcer.set_mode(DeadlineMode::Configured);

        let case = self.execute(best, CaseSource::FinalReplay, REPLAY_SEED, test);
        if case.outcome.is_failure() {
            self.with_store("saving the shrunk example", |store, key| {
                store.replace(key, &initial.draws, &case.draws, EntryKind::Failing)
            });
            return (case.outcome.clone(), case);
        }

        if *best != initial.draws {
            log::warn!("{}: shrunk example did not fail on replay, retrying the original", self.name);
            let original = self.execute(&initial.draws, CaseSource::FinalReplay, REPLAY_SEED, test);
            if original.outcome.is_failure() {
                return (original.outcome.clone(), original);
            }
        }

        let message = format!(
            "{} failed with \"{}\" but passed when replayed",
            self.name,
            initial.outcome.reason()
        );
        log::warn!("{}", message);
        (Outcome::Failed(FailureReason::Flaky(message)), initial.clone())
    }

    fn counterexample(&self, case: CaseOutcome, outcome: &Outcome, seed: Option<u64>) -> Counterexample {
        let reason = match outcome {
            Outcome::Failed(reason) => reason.clone(),
            other => FailureReason::Body(other.reason()),
        };
        Counterexample {
            representation: case.representation(),
            token: self.settings.print_blob.then(|| encode_token(&case.draws)),
            draws: case.draws,
            arguments: case.arguments,
            notes: case.notes,
            reason,
            panic: case.panic,
            seed,
        }
    }

    fn finish(
        &mut self,
        outcome: Outcome,
        counterexample: Option<Counterexample>,
        health_check: Option<HealthCheckFailure>,
        seed: Option<u64>,
    ) -> RunResult {
        let result = RunResult {
            property: self.name.clone(),
            outcome,
            counterexample,
            statistics: self.stats.clone(),
            health_check,
            seed,
        };
        self.log_phase(format_args!("{} {}", self.name, result.outcome.status()));
        if let Some(example) = &result.counterexample {
            log::info!("falsifying example: {}{}", self.name, example.representation);
        }
        if !self.sinks.is_empty() {
            let summary = format!("{}", result.statistics);
            self.emit_message(Observation::Info, "Statistics", &summary);
        }
        result
    }

    /// Run the body once on `prefix` (then fresh draws from `seed`).
    fn execute<F>(&mut self, prefix: &DrawSequence, source: CaseSource, seed: u64, test: &mut F) -> CaseOutcome
    where
        F: FnMut(&mut TestCase) -> CaseResult,
    {
        let data = DataSource::for_replay(prefix, seed).with_max_draws(self.settings.max_draws);
        let mut case = TestCase::new(data, self.settings.filter_attempts);

        self.enforcer.start();
        let result = catch_unwind(AssertUnwindSafe(|| test(&mut case)));
        let span = self.enforcer.stop();

        let trace = case.finish();
        let execution = span.saturating_sub(trace.draw_time);
        let mut panic = None;
        let outcome = match result {
            Ok(Ok(())) => match self.enforcer.check(execution) {
                Ok(()) => Outcome::Passed,
                Err(reason) => Outcome::Failed(reason),
            },
            Ok(Err(CaseError::Failed(message))) => Outcome::Failed(FailureReason::Body(message)),
            Ok(Err(CaseError::Draw(FailedDraw::Rejected(message)))) => {
                Outcome::GaveUp(GaveUpReason::Rejected(message))
            }
            Ok(Err(CaseError::Draw(FailedDraw::Overrun { limit }))) => Outcome::GaveUp(GaveUpReason::Overrun { limit }),
            Ok(Err(CaseError::Draw(FailedDraw::InvalidArgument(message)))) => {
                Outcome::GaveUp(GaveUpReason::InvalidArgument(message))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                panic = Some(message.clone());
                Outcome::Failed(FailureReason::Body(message))
            }
        };

        let case = CaseOutcome {
            outcome,
            timing: Timing {
                generation: trace.draw_time,
                execution,
            },
            draws: trace.draws,
            source,
            arguments: trace.arguments,
            notes: trace.notes,
            features: trace.features,
            predicates: trace.predicates,
            panic,
        };

        self.stats.record(&case);
        self.log_case(&case);
        if !self.sinks.is_empty() {
            let observation = self.observe_case(&case);
            self.emit(&observation);
        }
        case
    }

    fn observe_case(&self, case: &CaseOutcome) -> Observation {
        let failed = case.outcome.is_failure();
        let traceback = case
            .panic
            .clone()
            .or_else(|| case.outcome.failure().map(|reason| reason.to_string()));
        Observation::TestCase(TestCaseObservation {
            run_start: self.run_start,
            property: self.name.clone(),
            status: case.outcome.status().to_string(),
            status_reason: case.outcome.reason(),
            representation: case.representation(),
            arguments: case
                .arguments
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
            how_generated: case.source.as_str().to_string(),
            features: case.features.clone(),
            coverage: None,
            timing: [
                ("generate:data".to_string(), case.timing.generation.as_secs_f64()),
                ("execute:test".to_string(), case.timing.execution.as_secs_f64()),
            ]
            .into_iter()
            .collect(),
            metadata: CaseMetadata {
                traceback,
                reproduction_decorator: failed.then(|| format!(".reproduce(\"{}\")", encode_token(&case.draws))),
                predicates: case.predicates.clone(),
                notes: case.notes.clone(),
                draws: case.draws.len(),
            },
        })
    }

    fn emit(&mut self, observation: &Observation) {
        for sink in self.sinks.iter_mut() {
            sink.deliver(observation);
        }
    }

    fn emit_message(&mut self, kind: fn(MessageObservation) -> Observation, title: &str, content: &str) {
        if self.sinks.is_empty() {
            return;
        }
        let observation = kind(MessageObservation {
            title: title.to_string(),
            content: content.to_string(),
            property: self.name.clone(),
            run_start: self.run_start,
        });
        self.emit(&observation);
    }

    /// Run a database operation, logging (never propagating) failures.
    fn with_store<G>(&mut self, what: &str, op: G)
    where
        G: FnOnce(&mut ExampleStore, &DatabaseKey) -> DatabaseResult<()>,
    {
        let result = match self.store.as_mut() {
            Some(store) => op(store, &self.key),
            None => return,
        };
        if let Err(e) = result {
            self.database_error(what, &e.to_string());
        }
    }

    fn database_error(&mut self, what: &str, message: &str) {
        log::warn!("{}: database error while {}: {}", self.name, what, message);
        self.emit_message(Observation::Error, "Database error", &format!("{}: {}", what, message));
    }

    fn log_phase(&self, message: std::fmt::Arguments<'_>) {
        if self.settings.verbosity > Verbosity::Quiet {
            log::info!("{}", message);
        } else {
            log::debug!("{}", message);
        }
    }

    fn log_case(&self, case: &CaseOutcome) {
        if self.settings.verbosity >= Verbosity::Verbose {
            log::info!(
                "{} case {}: {} {}",
                case.source.as_str(),
                case.representation(),
                case.outcome.status(),
                case.outcome.reason()
            );
        } else {
            log::debug!(
                "{} case {}: {} {}",
                case.source.as_str(),
                case.representation(),
                case.outcome.status(),
                case.outcome.reason()
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    }
}
