//! Persisted client state: version descriptor, last-check dates and, for the
//! blob backend, the encoded database itself.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::util::atomic_write;

/// Well-known keys in the state store.
pub mod keys {
    /// JSON-encoded `VersionDescriptor` of the local database
    pub const DB_VERSION: &str = "db.version";
    /// Date (`YYYY-MM-DD`) of the last remote database check
    pub const DB_LAST_CHECK: &str = "db.last_check";
    /// Date (`YYYY-MM-DD`) of the last release feed check
    pub const RELEASE_LAST_CHECK: &str = "release.last_check";
    /// Base64-encoded database bytes (blob backend only)
    pub const DB_BLOB: &str = "db.blob";
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A previous holder panicked mid-update
    #[error("State store lock poisoned")]
    Poisoned,
}

/// String key/value persistence.
///
/// Everything the workflow needs to remember between runs goes through this
/// trait, so tests can swap in [`MemoryStore`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StateError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StateError>;
    fn delete(&self, key: &str) -> Result<(), StateError>;
}

// ============================================================================
// JSON file store
// ============================================================================

/// Key/value store persisted as a single JSON object.
///
/// The whole map is rewritten atomically on every change; it holds a handful
/// of small entries (plus the database blob on the blob backend).
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Load the store from `path`. A missing or empty file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No state file yet, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(StateError::Io(e)),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(entries)?;
        atomic_write(&self.path, &json)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let entries = self.entries.lock().map_err(|_| StateError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let mut entries = self.entries.lock().map_err(|_| StateError::Poisoned)?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut entries = self.entries.lock().map_err(|_| StateError::Poisoned)?;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Non-persistent store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let entries = self.entries.lock().map_err(|_| StateError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let mut entries = self.entries.lock().map_err(|_| StateError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut entries = self.entries.lock().map_err(|_| StateError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Daily gate
// ============================================================================

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Limits a check to once per calendar day.
///
/// The last run date lives in the store under `key`. An unparseable date
/// counts as "never ran".
#[derive(Debug, Clone, Copy)]
pub struct DailyGate {
    key: &'static str,
}

impl DailyGate {
    pub const fn new(key: &'static str) -> Self {
        Self { key }
    }

    /// Whether the check has not yet run on `today`.
    pub fn should_run(&self, store: &dyn KeyValueStore, today: NaiveDate) -> Result<bool, StateError> {
        let last = store
            .get(self.key)?
            .and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok());
        Ok(last != Some(today))
    }

    /// Record that the check ran on `today`.
    pub fn mark(&self, store: &dyn KeyValueStore, today: NaiveDate) -> Result<(), StateError> {
        store.set(self.key, &today.format(DATE_FORMAT).to_string())
    }
}
