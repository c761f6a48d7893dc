//! Run configuration.
//!
//! [`Settings`] is resolved once when a run starts and treated as read-only
//! afterwards. Values can be set in code with the builder methods, or taken
//! from `CONJECTURE_*` environment variables with [`Settings::from_env`]:
//!
//! | variable                          | field                   |
//! |-----------------------------------|-------------------------|
//! | `CONJECTURE_MAX_EXAMPLES`         | `max_examples`          |
//! | `CONJECTURE_DEADLINE_MS`          | `deadline` (`none` disables) |
//! | `CONJECTURE_SEED`                 | `seed`                  |
//! | `CONJECTURE_DATABASE`             | `database` (`none` disables) |
//! | `CONJECTURE_VERBOSITY`            | `verbosity`             |
//! | `CONJECTURE_SUPPRESS_HEALTH_CHECK`| `suppress_health_check` (comma separated) |
//! | `CONJECTURE_REPRODUCE`            | `reproduce`             |
//! | `CONJECTURE_DERANDOMIZE`          | `derandomize`           |

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::health::{HealthCheck, HealthCheckLimits};
use crate::shrinking::ShrinkBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl FromStr for Verbosity {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quiet" => Ok(Verbosity::Quiet),
            "normal" => Ok(Verbosity::Normal),
            "verbose" => Ok(Verbosity::Verbose),
            "debug" => Ok(Verbosity::Debug),
            _ => Err(SettingsError::InvalidValue {
                key: "verbosity".to_string(),
                value: s.to_string(),
                reason: "expected quiet, normal, verbose or debug".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Replay examples saved in the database.
    Reuse,
    /// Generate fresh examples.
    Generate,
    /// Shrink failing examples.
    Shrink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Number of valid examples to run before declaring the property passed.
    pub max_examples: u32,
    /// Per-case execution deadline; `None` disables it.
    pub deadline: Option<Duration>,
    pub suppress_health_check: BTreeSet<HealthCheck>,
    /// Directory of the example database, used when no database handle is
    /// given to the runner. `None` disables persistence.
    pub database: Option<PathBuf>,
    pub verbosity: Verbosity,
    pub phases: Vec<Phase>,
    /// Fixed seed for the run.
    pub seed: Option<u64>,
    /// Derive the seed from the test identity.
    pub derandomize: bool,
    pub max_shrinks: usize,
    pub shrink_timeout: Option<Duration>,
    /// Invalid cases tolerated before the run gives up on filtering.
    pub max_filter_retries: u32,
    /// Re-draws a filter makes within one case.
    pub filter_attempts: u32,
    pub max_draws: usize,
    /// Encoded size above which a generated case counts as too large.
    pub example_size_ceiling: usize,
    pub slow_threshold: Duration,
    /// Include a reproduction token in failure reports.
    pub print_blob: bool,
    /// Replay exactly this token and nothing else.
    pub reproduce: Option<String>,
    pub max_covering_examples: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_examples: 100,
            deadline: Some(Duration::from_millis(200)),
            suppress_health_check: BTreeSet::new(),
            database: None,
            verbosity: Verbosity::Normal,
            phases: vec![Phase::Reuse, Phase::Generate, Phase::Shrink],
            seed: None,
            derandomize: false,
            max_shrinks: 500,
            shrink_timeout: Some(Duration::from_secs(60)),
            max_filter_retries: 1000,
            filter_attempts: 3,
            max_draws: crate::data::MAX_DRAWS,
            example_size_ceiling: 8 * 1024,
            slow_threshold: Duration::from_secs(1),
            print_blob: true,
            reproduce: None,
            max_covering_examples: 50,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn is_none(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("none")
}

impl Settings {
    pub fn max_examples(mut self, n: u32) -> Self {
        self.max_examples = n;
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn suppress(mut self, check: HealthCheck) -> Self {
        self.suppress_health_check.insert(check);
        self
    }

    pub fn database<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database = Some(path.into());
        self
    }

    pub fn no_database(mut self) -> Self {
        self.database = None;
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn phases(mut self, phases: &[Phase]) -> Self {
        self.phases = phases.to_vec();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn derandomize(mut self, derandomize: bool) -> Self {
        self.derandomize = derandomize;
        self
    }

    pub fn max_shrinks(mut self, n: usize) -> Self {
        self.max_shrinks = n;
        self
    }

    pub fn max_filter_retries(mut self, n: u32) -> Self {
        self.max_filter_retries = n;
        self
    }

    pub fn filter_attempts(mut self, n: u32) -> Self {
        self.filter_attempts = n;
        self
    }

    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn print_blob(mut self, print_blob: bool) -> Self {
        self.print_blob = print_blob;
        self
    }

    pub fn reproduce<S: Into<String>>(mut self, token: S) -> Self {
        self.reproduce = Some(token.into());
        self
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_examples == 0 {
            return Err(SettingsError::Invalid("max_examples must be at least 1".to_string()));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(SettingsError::Invalid(
                "deadline must be positive; use None to disable it".to_string(),
            ));
        }
        if self.max_draws == 0 {
            return Err(SettingsError::Invalid("max_draws must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn health_check_limits(&self) -> HealthCheckLimits {
        HealthCheckLimits {
            size_ceiling: self.example_size_ceiling,
            slow_threshold: self.slow_threshold,
            ..HealthCheckLimits::default()
        }
    }

    pub fn shrink_budget(&self) -> ShrinkBudget {
        ShrinkBudget {
            max_attempts: self.max_shrinks,
            timeout: self.shrink_timeout,
        }
    }

    /// Defaults overridden by `CONJECTURE_*` environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Settings::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `CONJECTURE_*` overrides fetched through `lookup`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CONJECTURE_MAX_EXAMPLES") {
            self.max_examples = parse("CONJECTURE_MAX_EXAMPLES", &v)?;
        }
        if let Some(v) = lookup("CONJECTURE_DEADLINE_MS") {
            self.deadline = if is_none(&v) {
                None
            } else {
                Some(Duration::from_millis(parse("CONJECTURE_DEADLINE_MS", &v)?))
            };
        }
        if let Some(v) = lookup("CONJECTURE_SEED") {
            self.seed = Some(parse("CONJECTURE_SEED", &v)?);
        }
        if let Some(v) = lookup("CONJECTURE_DATABASE") {
            self.database = if is_none(&v) { None } else { Some(PathBuf::from(v.trim())) };
        }
        if let Some(v) = lookup("CONJECTURE_VERBOSITY") {
            self.verbosity = v.parse()?;
        }
        if let Some(v) = lookup("CONJECTURE_SUPPRESS_HEALTH_CHECK") {
            for name in v.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                self.suppress_health_check.insert(name.parse()?);
            }
        }
        if let Some(v) = lookup("CONJECTURE_REPRODUCE") {
            if !v.trim().is_empty() {
                self.reproduce = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup("CONJECTURE_DERANDOMIZE") {
            self.derandomize = parse_bool("CONJECTURE_DERANDOMIZE", &v)?;
        }
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> Result<Settings, SettingsError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::default().apply_overrides(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_examples, 100);
        assert_eq!(settings.deadline, Some(Duration::from_millis(200)));
        assert!(settings.has_phase(Phase::Shrink));
    }

    #[test]
    fn test_env_overrides() {
        let settings = overrides(&[
            ("CONJECTURE_MAX_EXAMPLES", "25"),
            ("CONJECTURE_DEADLINE_MS", "none"),
            ("CONJECTURE_SEED", "1234"),
            ("CONJECTURE_DATABASE", "/tmp/examples"),
            ("CONJECTURE_VERBOSITY", "Verbose"),
            ("CONJECTURE_SUPPRESS_HEALTH_CHECK", "too_slow, filter_too_much"),
            ("CONJECTURE_DERANDOMIZE", "true"),
        ])
        .unwrap();
        assert_eq!(settings.max_examples, 25);
        assert_eq!(settings.deadline, None);
        assert_eq!(settings.seed, Some(1234));
        assert_eq!(settings.database, Some(PathBuf::from("/tmp/examples")));
        assert_eq!(settings.verbosity, Verbosity::Verbose);
        assert!(settings.suppress_health_check.contains(&HealthCheck::TooSlow));
        assert!(settings.suppress_health_check.contains(&HealthCheck::FilterTooMuch));
        assert!(settings.derandomize);
    }

    #[test]
    fn test_bad_overrides_are_reported() {
        assert!(matches!(
            overrides(&[("CONJECTURE_MAX_EXAMPLES", "lots")]),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert!(matches!(
            overrides(&[("CONJECTURE_SUPPRESS_HEALTH_CHECK", "not_a_check")]),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert!(matches!(
            overrides(&[("CONJECTURE_MAX_EXAMPLES", "0")]),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_deadline_is_invalid() {
        let settings = Settings::default().deadline(Some(Duration::ZERO));
        assert!(settings.validate().is_err());
    }
}
