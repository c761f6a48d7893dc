//! Example database behaviour across runs: saving shrunk failures,
//! replaying them first, demoting fixed ones, and keeping database replays
//! out of health checks.

use conjecture_engine::persistence::{DatabaseResult, EntryKind};
use conjecture_engine::{
    integers, CaseError, ConjectureRunner, DatabaseError, DatabaseKey, DrawRecord, DrawSequence, ExampleDatabase,
    ExampleStore, InMemoryDatabase, Outcome, Settings, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn settings(seed: u64) -> Settings {
    Settings::default().seed(seed).no_database().deadline(None)
}

fn fails_above_fifty(value: &Value) -> Result<(), CaseError> {
    match value.as_integer() {
        Some(x) if x > 50 => Err(CaseError::fail(format!("{} is too large", x))),
        _ => Ok(()),
    }
}

#[test]
fn test_only_the_shrunk_failure_is_kept() {
    init_logging();
    let db = InMemoryDatabase::new();
    let mut runner = ConjectureRunner::new("saved", settings(1)).with_database(Box::new(db.clone()));
    let result = runner.run_given(&integers(0, 10_000), fails_above_fifty).unwrap();
    let example = result.counterexample.unwrap();

    assert_eq!(db.count(runner.key()), 1);
    let mut store = ExampleStore::new(Box::new(db.clone()));
    let loaded = store.load(runner.key()).unwrap();
    assert_eq!(loaded.failing, vec![example.draws]);
    assert!(loaded.covering.is_empty());
}

#[test]
fn test_saved_failure_is_replayed_first() {
    init_logging();
    let db = InMemoryDatabase::new();
    ConjectureRunner::new("replayed", settings(2))
        .with_database(Box::new(db.clone()))
        .run_given(&integers(0, 10_000), fails_above_fifty)
        .unwrap();

    let result = ConjectureRunner::new("replayed", settings(3))
        .with_database(Box::new(db.clone()))
        .run_given(&integers(0, 10_000), fails_above_fifty)
        .unwrap();
    let example = result.counterexample.unwrap();
    assert_eq!(example.arguments[0].1, Value::Integer(51));
    assert_eq!(example.seed, None);
    assert_eq!(result.statistics.database_replays, 1);
}

#[test]
fn test_fixed_failure_is_demoted() {
    init_logging();
    let db = InMemoryDatabase::new();
    let mut runner = ConjectureRunner::new("fixed", settings(4)).with_database(Box::new(db.clone()));
    runner.run_given(&integers(0, 10_000), fails_above_fifty).unwrap();
    let key = runner.key().clone();

    let result = ConjectureRunner::new("fixed", settings(5).max_examples(10))
        .with_database(Box::new(db.clone()))
        .run_given(&integers(0, 10_000), |_| Ok(()))
        .unwrap();
    assert_eq!(result.outcome, Outcome::Passed);

    let store = ExampleStore::new(Box::new(db.clone()));
    assert_eq!(store.count(&key, EntryKind::Failing).unwrap(), 0);
    assert_eq!(store.count(&key, EntryKind::Covering).unwrap(), 1);
}

#[test]
fn test_directory_database_from_settings() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let with_dir = |seed: u64| settings(seed).database(dir.path().join("examples"));

    let first = ConjectureRunner::new("on_disk", with_dir(6))
        .run_given(&integers(0, 10_000), fails_above_fifty)
        .unwrap();
    assert!(first.counterexample.unwrap().seed.is_some());

    let second = ConjectureRunner::new("on_disk", with_dir(7))
        .run_given(&integers(0, 10_000), fails_above_fifty)
        .unwrap();
    assert_eq!(second.statistics.database_replays, 1);
    assert_eq!(second.counterexample.unwrap().seed, None);
}

#[test]
fn test_database_replays_do_not_trigger_health_checks() {
    init_logging();
    let db = InMemoryDatabase::new();
    let runner = ConjectureRunner::new("rejecting_zero", settings(8));
    let key = runner.key().clone();

    // Sixty stored cases that all draw zero and get rejected on replay.
    let mut store = ExampleStore::new(Box::new(db.clone()));
    for i in 0..60 {
        let draws: DrawSequence = vec![DrawRecord::new(10, 0), DrawRecord::new(8, i)].into();
        store.save(&key, &draws, EntryKind::Covering).unwrap();
    }

    let result = runner
        .with_database(Box::new(db.clone()))
        .run(|case| {
            let x = case.draw_integer(0, 1000)?;
            case.assume(x != 0)
        })
        .unwrap();
    assert_eq!(result.outcome, Outcome::Passed);
    assert!(result.health_check.is_none());
    assert_eq!(result.statistics.database_replays, 60);
    assert!(result.statistics.gave_up >= 60);
}

/// Shares storage with an in-memory database but refuses every delete.
struct UndeletableDatabase(InMemoryDatabase);

impl ExampleDatabase for UndeletableDatabase {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        self.0.save(key, value)
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        self.0.fetch(key)
    }

    fn delete(&mut self, _key: &DatabaseKey, _value: &[u8]) -> DatabaseResult<()> {
        Err(DatabaseError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only database",
        )))
    }
}

#[test]
fn test_failed_discard_keeps_valid_entries() {
    init_logging();
    let mut db = InMemoryDatabase::new();
    let runner = ConjectureRunner::new("read_only", settings(9).max_examples(1));
    let key = runner.key().clone();

    db.save(&key, b"not an encoded sequence").unwrap();
    let mut store = ExampleStore::new(Box::new(db.clone()));
    let failing: DrawSequence = vec![DrawRecord::new(7, 99)].into();
    store.save(&key, &failing, EntryKind::Failing).unwrap();

    let mut read_only = ExampleStore::new(Box::new(UndeletableDatabase(db.clone())));
    let loaded = read_only.load(&key).unwrap();
    assert_eq!(loaded.failing, vec![failing]);
    assert_eq!(loaded.discarded, 1);

    let result = runner
        .with_database(Box::new(UndeletableDatabase(db.clone())))
        .run_given(&integers(0, 100), |value| match value.as_integer() {
            Some(x) if x > 90 => Err(CaseError::fail("above ninety")),
            _ => Ok(()),
        })
        .unwrap();
    assert_eq!(result.statistics.database_replays, 1);
    assert!(result.outcome.is_failure());
}
