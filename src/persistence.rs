//! Example database: failing and covering draw sequences kept across runs.
//!
//! # Architecture
//!
//! - [`ExampleDatabase`]: byte-level store of value sets under a key. Saving
//!   is idempotent and values are never mutated in place.
//! - [`InMemoryDatabase`]: shared in-process store, mostly for tests.
//! - [`DirectoryDatabase`]: one file per value under a directory per key.
//!   Files are written whole to a temporary file and renamed into place, so
//!   several processes sharing a directory only ever race at entry
//!   granularity (last writer wins).
//! - [`DatabaseKey`]: SHA-256 fingerprint of the test identity, plus an
//!   optional sub-key naming the kind of entry.
//! - [`ExampleStore`]: what the runner talks to. It maps entry kinds onto
//!   sub-keys, serializes sequences with [`crate::encoding`], and discards
//!   entries that no longer decode.
//!
//! # Example Usage
//!
//! ```rust
//! use conjecture_engine::data::{DrawRecord, DrawSequence};
//! use conjecture_engine::persistence::{DatabaseKey, EntryKind, ExampleStore, InMemoryDatabase};
//!
//! let mut store = ExampleStore::new(Box::new(InMemoryDatabase::new()));
//! let key = DatabaseKey::from_function("test_sorting", &[]);
//! let failing = DrawSequence::new(vec![DrawRecord::new(8, 3)]);
//!
//! store.save(&key, &failing, EntryKind::Failing).unwrap();
//! assert_eq!(store.load(&key).unwrap().failing, vec![failing]);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::data::DrawSequence;
use crate::encoding::{deserialize, serialize};
pub use crate::error::{DatabaseError, DatabaseResult};

/// Database key identifying one test function's examples
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseKey {
    /// SHA-256 of the test identity
    pub primary_hash: [u8; 32],
    /// Kind of entry stored under this key, if not the primary corpus
    pub sub_key: Option<String>,
}

impl DatabaseKey {
    /// Key for a test function name plus any extra identifying bytes
    pub fn from_function(function_name: &str, additional_data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(function_name.as_bytes());
        hasher.update(additional_data);

        DatabaseKey {
            primary_hash: hasher.finalize().into(),
            sub_key: None,
        }
    }

    pub fn with_sub_key(&self, sub_key: &str) -> Self {
        DatabaseKey {
            primary_hash: self.primary_hash,
            sub_key: Some(sub_key.to_string()),
        }
    }

    pub fn to_hex(&self) -> String {
        let primary_hex = hex::encode(self.primary_hash);
        match &self.sub_key {
            Some(sub) => format!("{}.{}", primary_hex, sub),
            None => primary_hex,
        }
    }

    pub fn from_hex(hex_str: &str) -> DatabaseResult<Self> {
        let (primary_hex, sub_key) = match hex_str.split_once('.') {
            Some((primary, sub)) => (primary, Some(sub.to_string())),
            None => (hex_str, None),
        };
        if primary_hex.len() != 64 {
            return Err(DatabaseError::InvalidKey(format!(
                "Invalid primary key length: {}",
                primary_hex.len()
            )));
        }

        let primary_hash: [u8; 32] = hex::decode(primary_hex)
            .map_err(|e| DatabaseError::InvalidKey(format!("Invalid hex: {}", e)))?
            .try_into()
            .map_err(|_| DatabaseError::InvalidKey("Hash wrong length".to_string()))?;

        Ok(DatabaseKey { primary_hash, sub_key })
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Core database interface
pub trait ExampleDatabase: Send {
    /// Save a value under a key (idempotent)
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()>;

    /// All values stored under a key, in no particular order
    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>>;

    /// Delete a value from a key (idempotent)
    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()>;

    /// Move a value between keys
    fn move_value(&mut self, src_key: &DatabaseKey, dest_key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        self.delete(src_key, value)?;
        self.save(dest_key, value)?;
        Ok(())
    }
}

/// In-memory database. Clones share the same storage, so a test can keep a
/// handle and inspect what a runner wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    data: Arc<RwLock<HashMap<DatabaseKey, HashSet<Vec<u8>>>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values stored under `key`
    pub fn count(&self, key: &DatabaseKey) -> usize {
        self.data
            .read()
            .map(|data| data.get(key).map_or(0, HashSet::len))
            .unwrap_or(0)
    }

    /// Total number of stored values
    pub fn example_count(&self) -> usize {
        self.data
            .read()
            .map(|data| data.values().map(HashSet::len).sum())
            .unwrap_or(0)
    }
}

impl ExampleDatabase for InMemoryDatabase {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let mut data = self.data.write().map_err(|_| DatabaseError::Poisoned)?;
        data.entry(key.clone()).or_default().insert(value.to_vec());
        Ok(())
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        let data = self.data.read().map_err(|_| DatabaseError::Poisoned)?;
        Ok(data
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let mut data = self.data.write().map_err(|_| DatabaseError::Poisoned)?;
        if let Some(set) = data.get_mut(key) {
            set.remove(value);
            if set.is_empty() {
                data.remove(key);
            }
        }
        Ok(())
    }
}

/// File-based database
#[derive(Debug, Clone)]
pub struct DirectoryDatabase {
    base_path: PathBuf,
}

impl DirectoryDatabase {
    pub fn new<P: AsRef<Path>>(base_path: P) -> DatabaseResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(DirectoryDatabase { base_path })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn key_dir(&self, key: &DatabaseKey) -> PathBuf {
        self.base_path.join(key.to_hex())
    }

    fn value_path(&self, key: &DatabaseKey, value: &[u8]) -> PathBuf {
        let value_hash = Sha256::digest(value);
        self.key_dir(key).join(hex::encode(&value_hash[..16]))
    }

    /// Write the whole file next to its destination, then rename it in.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> DatabaseResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| DatabaseError::InvalidKey(format!("no parent directory for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(data)?;
        file.flush()?;
        file.persist(path).map_err(|e| DatabaseError::Io(e.error))?;
        Ok(())
    }
}

impl ExampleDatabase for DirectoryDatabase {
    fn save(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let path = self.value_path(key, value);
        if path.exists() {
            return Ok(());
        }
        self.atomic_write(&path, value)
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        let key_dir = self.key_dir(key);
        let entries = match fs::read_dir(&key_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut values = Vec::new();
        for entry in entries {
            let path = entry?.path();
            // In-flight temporary files
            if path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(true, |name| name.starts_with('.'))
            {
                continue;
            }
            match fs::read(&path) {
                Ok(data) => values.push(data),
                // Another process may have deleted it since the listing
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("skipping unreadable example {}: {}", path.display(), e),
            }
        }
        Ok(values)
    }

    fn delete(&mut self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        match fs::remove_file(self.value_path(key, value)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // Drop the key directory once empty; fails harmlessly if another
        // writer just added a file.
        let _ = fs::remove_dir(self.key_dir(key));
        Ok(())
    }
}

/// Which corpus an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A minimal failing case; replayed first to catch regressions.
    Failing,
    /// A passing case that reached something new; replayed to keep coverage.
    Covering,
}

impl EntryKind {
    fn sub_key(&self) -> Option<&'static str> {
        match self {
            EntryKind::Failing => None,
            EntryKind::Covering => Some("covering"),
        }
    }
}

/// Entries read back for one test, simplest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedExamples {
    pub failing: Vec<DrawSequence>,
    pub covering: Vec<DrawSequence>,
    /// Entries that no longer decode; they have been deleted.
    pub discarded: usize,
}

pub struct ExampleStore {
    db: Box<dyn ExampleDatabase>,
}

impl ExampleStore {
    pub fn new(db: Box<dyn ExampleDatabase>) -> Self {
        ExampleStore { db }
    }

    fn entry_key(key: &DatabaseKey, kind: EntryKind) -> DatabaseKey {
        match kind.sub_key() {
            Some(sub) => key.with_sub_key(sub),
            None => key.clone(),
        }
    }

    pub fn save(&mut self, key: &DatabaseKey, sequence: &DrawSequence, kind: EntryKind) -> DatabaseResult<()> {
        self.db.save(&Self::entry_key(key, kind), &serialize(sequence))
    }

    pub fn delete(&mut self, key: &DatabaseKey, sequence: &DrawSequence, kind: EntryKind) -> DatabaseResult<()> {
        self.db.delete(&Self::entry_key(key, kind), &serialize(sequence))
    }

    /// Swap `old` for `new`: delete first, then insert.
    pub fn replace(
        &mut self,
        key: &DatabaseKey,
        old: &DrawSequence,
        new: &DrawSequence,
        kind: EntryKind,
    ) -> DatabaseResult<()> {
        if old == new {
            return self.save(key, new, kind);
        }
        self.delete(key, old, kind)?;
        self.save(key, new, kind)
    }

    /// Move a failing entry that no longer fails into the covering corpus.
    pub fn demote(&mut self, key: &DatabaseKey, sequence: &DrawSequence) -> DatabaseResult<()> {
        self.db.move_value(
            &Self::entry_key(key, EntryKind::Failing),
            &Self::entry_key(key, EntryKind::Covering),
            &serialize(sequence),
        )
    }

    pub fn count(&self, key: &DatabaseKey, kind: EntryKind) -> DatabaseResult<usize> {
        Ok(self.db.fetch(&Self::entry_key(key, kind))?.len())
    }

    pub fn load(&mut self, key: &DatabaseKey) -> DatabaseResult<LoadedExamples> {
        let mut loaded = LoadedExamples::default();
        for kind in [EntryKind::Failing, EntryKind::Covering] {
            let entry_key = Self::entry_key(key, kind);
            let mut sequences = Vec::new();
            for bytes in self.db.fetch(&entry_key)? {
                match deserialize(&bytes) {
                    Ok(sequence) => sequences.push(sequence),
                    Err(e) => {
                        log::info!("discarding undecodable {:?} entry for {}: {}", kind, key, e);
                        if let Err(e) = self.db.delete(&entry_key, &bytes) {
                            log::warn!("could not delete undecodable entry for {}: {}", key, e);
                        }
                        loaded.discarded += 1;
                    }
                }
            }
            sequences.sort_by_key(DrawSequence::sort_key);
            match kind {
                EntryKind::Failing => loaded.failing = sequences,
                EntryKind::Covering => loaded.covering = sequences,
            }
        }
        Ok(loaded)
    }
}
