// Durable key-value storage for client-side state

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::output::errors::DashError;

/// Durable map of baseline configurations, keyed by hostname
pub const BASELINE_CONFIGS_KEY: &str = "baseline_configs";
pub const LAST_OS_FILTER_KEY: &str = "lastOsFilter";
pub const LAST_CATEGORY_FILTER_KEY: &str = "lastCategoryFilter";
pub const PLAYBOOKS_DATA_KEY: &str = "playbooksData";
pub const PLAYBOOKS_LOADED_KEY: &str = "playbooksLoaded";
pub const HOSTS_DATA_KEY: &str = "hostsData";
pub const HOSTS_LOADED_KEY: &str = "hostsLoaded";
/// Dispatched jobs and their grouping, so a later invocation can still watch them
pub const JOB_TRACKER_KEY: &str = "jobTracker";

const LOCK_RETRY: Duration = Duration::from_millis(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// A lock file older than this was left behind by a crashed process
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

type Entries = BTreeMap<String, JsonValue>;

/// Exclusive hold on a state file, shared with other playdash processes
/// through a sibling `.lock` file. Released on drop.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(target: &Path) -> Result<Self, DashError> {
        let path = target.with_extension("json.lock");
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(FileLock { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        warn!(lock = %path.display(), "removing stale state lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_TIMEOUT {
                        return Err(DashError::Storage {
                            message: "Timed out waiting for the state lock".to_string(),
                            path: Some(path),
                        });
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => {
                    return Err(DashError::Storage {
                        message: format!("Failed to lock state file: {}", e),
                        path: Some(path),
                    })
                }
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > STALE_LOCK_AGE)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Current content of a state file; a missing or blank file is empty
fn read_file(path: &Path) -> Result<Entries, DashError> {
    if !path.exists() {
        return Ok(Entries::new());
    }

    let json = fs::read_to_string(path).map_err(|e| DashError::Storage {
        message: format!("Failed to read state file: {}", e),
        path: Some(path.to_path_buf()),
    })?;

    if json.trim().is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_str(&json).map_err(|e| DashError::Storage {
        message: format!("State file is corrupted: {}", e),
        path: Some(path.to_path_buf()),
    })
}

fn write_file(path: &Path, entries: &Entries) -> Result<(), DashError> {
    let json = serde_json::to_string_pretty(entries).map_err(|e| DashError::Storage {
        message: format!("Failed to serialize state: {}", e),
        path: Some(path.to_path_buf()),
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| DashError::Storage {
        message: format!("Failed to write state: {}", e),
        path: Some(tmp.clone()),
    })?;

    fs::rename(&tmp, path).map_err(|e| DashError::Storage {
        message: format!("Failed to replace state file: {}", e),
        path: Some(path.to_path_buf()),
    })
}

/// A JSON object persisted to a single file.
///
/// Writes are read-modify-write under a cross-process lock: the file is
/// re-read, only the touched keys change, and the result replaces the file
/// through a temp file and rename. Another process writing a different key
/// in between is therefore never overwritten. Stores created with
/// [`KvStore::in_memory`] never touch the disk.
pub struct KvStore {
    path: Option<PathBuf>,
    entries: RwLock<Entries>,
}

impl KvStore {
    /// Open (or create) a store backed by `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DashError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| DashError::Storage {
                    message: format!("Failed to create state directory: {}", e),
                    path: Some(parent.to_path_buf()),
                })?;
            }
        }

        let entries = read_file(&path)?;
        Ok(KvStore {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    pub fn in_memory() -> Self {
        KvStore {
            path: None,
            entries: RwLock::new(Entries::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Pick up writes made by other processes since this store was opened
    pub fn reload(&self) -> Result<(), DashError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = read_file(path)?;
        *self.entries.write() = fresh;
        Ok(())
    }

    /// Read and decode a key. Undecodable values are treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.read();
        let value = entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "ignoring undecodable stored value");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DashError> {
        let value = self.encode(key, value)?;
        self.modify(|entries| {
            entries.insert(key.to_string(), value);
            Ok(())
        })
    }

    /// Replace `key` with `change(current)`, reading the current value from
    /// disk under the lock.
    ///
    /// A stored value that does not decode as `T` is left untouched and
    /// reported, so one unreadable entry never erases what it holds.
    pub fn update<T, F>(&self, key: &str, change: F) -> Result<T, DashError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        self.modify(|entries| {
            let current = match entries.get(key) {
                None => None,
                Some(value) => Some(serde_json::from_value(value.clone()).map_err(|e| {
                    DashError::Storage {
                        message: format!("Refusing to overwrite undecodable '{}': {}", key, e),
                        path: self.path.clone(),
                    }
                })?),
            };

            let updated = change(current);
            entries.insert(key.to_string(), self.encode(key, &updated)?);
            Ok(updated)
        })
    }

    pub fn remove(&self, key: &str) -> Result<(), DashError> {
        self.modify(|entries| {
            entries.remove(key);
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<(), DashError> {
        self.modify(|entries| {
            entries.clear();
            Ok(())
        })
    }

    fn encode<T: Serialize>(&self, key: &str, value: &T) -> Result<JsonValue, DashError> {
        serde_json::to_value(value).map_err(|e| DashError::Storage {
            message: format!("Failed to encode '{}': {}", key, e),
            path: self.path.clone(),
        })
    }

    /// Apply `change` to the latest content and persist it. Memory is only
    /// replaced once the file write succeeded.
    fn modify<R>(
        &self,
        change: impl FnOnce(&mut Entries) -> Result<R, DashError>,
    ) -> Result<R, DashError> {
        let mut entries = self.entries.write();

        let Some(path) = &self.path else {
            return change(&mut entries);
        };

        let _lock = FileLock::acquire(path)?;
        let mut latest = read_file(path)?;
        let result = change(&mut latest)?;
        write_file(path, &latest)?;
        debug!(path = %path.display(), keys = latest.len(), "state written");

        *entries = latest;
        Ok(result)
    }
}
