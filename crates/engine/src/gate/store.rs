//! Durable per-requester exclusivity flags.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ratewatch_types::RequesterId;
use ratewatch_util::resolve_config_file;
use thiserror::Error;
use tracing::warn;

/// Environment variable overriding the flags file path.
pub const FLAGS_PATH_ENV: &str = "RATEWATCH_FLAGS_PATH";

/// Default file name for persisted flags.
pub const FLAGS_FILE_NAME: &str = "flags.json";

/// Error surfaced when reading or writing flags fails.
#[derive(Debug, Error)]
pub enum FlagStoreError {
    #[error("flag store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("flag store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One boolean per requester, `false` by default.
pub trait FlagStore: Send + Sync {
    fn get(&self, requester: RequesterId) -> Result<bool, FlagStoreError>;

    fn set(&self, requester: RequesterId, in_process: bool) -> Result<(), FlagStoreError>;

    /// Force every flag back to `false`.
    fn reset_all(&self) -> Result<(), FlagStoreError>;
}

/// Non-durable store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<RequesterId, bool>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, requester: RequesterId) -> Result<bool, FlagStoreError> {
        let flags = self.flags.lock().expect("flag store lock poisoned");
        Ok(flags.get(&requester).copied().unwrap_or(false))
    }

    fn set(&self, requester: RequesterId, in_process: bool) -> Result<(), FlagStoreError> {
        self.flags.lock().expect("flag store lock poisoned").insert(requester, in_process);
        Ok(())
    }

    fn reset_all(&self) -> Result<(), FlagStoreError> {
        let mut flags = self.flags.lock().expect("flag store lock poisoned");
        flags.values_mut().for_each(|flag| *flag = false);
        Ok(())
    }
}

/// Flags persisted as a JSON object `{"<requester>": bool}`.
#[derive(Debug)]
pub struct JsonFlagStore {
    path: PathBuf,
    flags: Mutex<BTreeMap<i64, bool>>,
}

impl JsonFlagStore {
    /// Open the store at `path`, or at the default location when `None`.
    pub fn open(path: Option<PathBuf>) -> Result<Self, FlagStoreError> {
        let path = path.unwrap_or_else(default_flags_path);
        let flags = load_flags(&path)?;
        Ok(Self {
            path,
            flags: Mutex::new(flags),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, flags: &BTreeMap<i64, bool>) -> Result<(), FlagStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(flags)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

impl FlagStore for JsonFlagStore {
    fn get(&self, requester: RequesterId) -> Result<bool, FlagStoreError> {
        let flags = self.flags.lock().expect("flag store lock poisoned");
        Ok(flags.get(&requester.0).copied().unwrap_or(false))
    }

    /// A flag is only set once it is on disk. Clearing always takes effect
    /// in memory, even when the write fails.
    fn set(&self, requester: RequesterId, in_process: bool) -> Result<(), FlagStoreError> {
        let mut flags = self.flags.lock().expect("flag store lock poisoned");
        let mut next = flags.clone();
        next.insert(requester.0, in_process);
        let saved = self.save_locked(&next);
        if saved.is_ok() || !in_process {
            *flags = next;
        }
        saved
    }

    fn reset_all(&self) -> Result<(), FlagStoreError> {
        let mut flags = self.flags.lock().expect("flag store lock poisoned");
        flags.values_mut().for_each(|flag| *flag = false);
        self.save_locked(&flags)
    }
}

/// `RATEWATCH_FLAGS_PATH`, else `~/.config/ratewatch/flags.json`.
pub fn default_flags_path() -> PathBuf {
    resolve_config_file(FLAGS_PATH_ENV, FLAGS_FILE_NAME)
}

fn load_flags(path: &Path) -> Result<BTreeMap<i64, bool>, FlagStoreError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(flags) => Ok(flags),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to parse flags file; starting with all flags cleared"
                );
                Ok(BTreeMap::new())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(error) => Err(FlagStoreError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flags.json");

        let store = JsonFlagStore::open(Some(path.clone())).unwrap();
        store.set(RequesterId(42), true).unwrap();
        store.set(RequesterId(-7), false).unwrap();

        let reopened = JsonFlagStore::open(Some(path.clone())).unwrap();
        assert!(reopened.get(RequesterId(42)).unwrap());
        assert!(!reopened.get(RequesterId(-7)).unwrap());
        assert!(!reopened.get(RequesterId(1)).unwrap());

        reopened.reset_all().unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"42\": false"), "{raw}");
    }

    /// Replace the flags directory with a plain file so every write fails.
    fn block_writes(dir: &Path) {
        let blocker = dir.join("blocker");
        if blocker.exists() {
            fs::remove_dir_all(&blocker).unwrap();
        }
        fs::write(&blocker, "").unwrap();
    }

    #[test]
    fn failed_write_leaves_flag_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFlagStore::open(Some(dir.path().join("blocker").join("flags.json"))).unwrap();
        block_writes(dir.path());

        assert!(store.set(RequesterId(42), true).is_err());
        assert!(!store.get(RequesterId(42)).unwrap());
    }

    #[test]
    fn failed_write_still_clears_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFlagStore::open(Some(dir.path().join("blocker").join("flags.json"))).unwrap();
        store.set(RequesterId(42), true).unwrap();
        block_writes(dir.path());

        assert!(store.set(RequesterId(42), false).is_err());
        assert!(!store.get(RequesterId(42)).unwrap());
    }

    #[test]
    fn corrupt_file_starts_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonFlagStore::open(Some(path)).unwrap();
        assert!(!store.get(RequesterId(42)).unwrap());
    }

    #[test]
    fn default_path_honours_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        temp_env::with_var(FLAGS_PATH_ENV, Some(path.to_str().unwrap()), || {
            assert_eq!(default_flags_path(), path);
        });
    }
}
