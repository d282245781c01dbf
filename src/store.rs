use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

pub const KEY_POS_X: &str = "win-pos-x";
pub const KEY_POS_Y: &str = "win-pos-y";
pub const KEY_WIDTH: &str = "win-size-width";
pub const KEY_HEIGHT: &str = "win-size-height";
pub const KEY_ALWAYS_ON_TOP: &str = "always-on-top";

const DEFAULT_WIDTH: i32 = 800;
const DEFAULT_HEIGHT: i32 = 600;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write store file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read store file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {path} is not valid TOML: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted key/value settings for the tracked window.
///
/// Accessors do no validation beyond typing; callers clamp before writing.
pub trait GeometryStore: Send + Sync {
    fn get_int(&self, key: &str) -> i32;

    fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError>;

    fn get_bool(&self, key: &str) -> bool;

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError>;

    /// Subscribe to change notifications. Each message is the name of a key
    /// whose value changed; dropping the receiver unsubscribes.
    fn connect_changed(&self) -> broadcast::Receiver<String>;
}

/// Snapshot of everything the tracker persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedGeometry {
    pub pos_x: i32,
    pub pos_y: i32,
    pub width: i32,
    pub height: i32,
    pub pinned: bool,
}

impl PersistedGeometry {
    pub fn read(store: &dyn GeometryStore) -> Self {
        Self {
            pos_x: store.get_int(KEY_POS_X),
            pos_y: store.get_int(KEY_POS_Y),
            width: store.get_int(KEY_WIDTH),
            height: store.get_int(KEY_HEIGHT),
            pinned: store.get_bool(KEY_ALWAYS_ON_TOP),
        }
    }

    pub fn write(&self, store: &dyn GeometryStore) -> Result<(), StoreError> {
        store.set_int(KEY_POS_X, self.pos_x)?;
        store.set_int(KEY_POS_Y, self.pos_y)?;
        store.set_int(KEY_WIDTH, self.width)?;
        store.set_int(KEY_HEIGHT, self.height)?;
        store.set_bool(KEY_ALWAYS_ON_TOP, self.pinned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum SettingValue {
    Bool(bool),
    Int(i64),
}

fn default_int(key: &str) -> i32 {
    match key {
        KEY_WIDTH => DEFAULT_WIDTH,
        KEY_HEIGHT => DEFAULT_HEIGHT,
        _ => 0,
    }
}

fn default_values() -> BTreeMap<String, SettingValue> {
    let mut values = BTreeMap::new();
    for key in [KEY_POS_X, KEY_POS_Y, KEY_WIDTH, KEY_HEIGHT] {
        values.insert(key.to_string(), SettingValue::Int(i64::from(default_int(key))));
    }
    values.insert(KEY_ALWAYS_ON_TOP.to_string(), SettingValue::Bool(false));
    values
}

/// TOML-file backed [`GeometryStore`].
///
/// Values live in memory and every write rewrites the file. Edits made to
/// the file by other processes are picked up by [`SettingsFile::reload`].
#[derive(Debug)]
pub struct SettingsFile {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, SettingValue>>,
    changes: broadcast::Sender<String>,
}

impl SettingsFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = Self::read_file(&path)?;
        let (changes, _) = broadcast::channel(32);

        debug!("Opened settings store at {:?}", path);

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
            changes,
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            path: None,
            values: Mutex::new(default_values()),
            changes,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the backing file and notify every key whose value changed.
    /// Returns the changed keys.
    pub fn reload(&self) -> Result<Vec<String>, StoreError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        let fresh = Self::read_file(path)?;
        let changed: Vec<String> = {
            let mut values = self.lock();
            let changed = fresh
                .iter()
                .filter(|(key, value)| values.get(*key) != Some(*value))
                .map(|(key, _)| key.clone())
                .collect();
            *values = fresh;
            changed
        };

        for key in &changed {
            debug!("Store key {} changed on disk", key);
            self.notify(key);
        }
        Ok(changed)
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, SettingValue>, StoreError> {
        let mut values = default_values();
        if !path.exists() {
            return Ok(values);
        }

        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let stored: BTreeMap<String, SettingValue> =
            toml::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        values.extend(stored);
        Ok(values)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SettingValue>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, key: &str, value: SettingValue) -> Result<(), StoreError> {
        {
            let mut values = self.lock();
            if values.get(key) == Some(&value) {
                return Ok(());
            }
            // Memory only moves once the file holds the new value.
            let mut updated = values.clone();
            updated.insert(key.to_string(), value);
            self.flush(&updated)?;
            *values = updated;
        }
        self.notify(key);
        Ok(())
    }

    fn flush(&self, values: &BTreeMap<String, SettingValue>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let write_error = |source| StoreError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(values)?;
        std::fs::write(path, content).map_err(write_error)
    }

    fn notify(&self, key: &str) {
        // No receivers is fine.
        let _ = self.changes.send(key.to_string());
    }
}

impl GeometryStore for SettingsFile {
    fn get_int(&self, key: &str) -> i32 {
        match self.lock().get(key) {
            Some(SettingValue::Int(value)) => i32::try_from(*value).unwrap_or_else(|_| {
                warn!("Store key {} holds out-of-range value {}", key, value);
                default_int(key)
            }),
            Some(SettingValue::Bool(_)) => {
                warn!("Store key {} holds a boolean, expected an integer", key);
                default_int(key)
            }
            None => default_int(key),
        }
    }

    fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        self.set(key, SettingValue::Int(i64::from(value)))
    }

    fn get_bool(&self, key: &str) -> bool {
        match self.lock().get(key) {
            Some(SettingValue::Bool(value)) => *value,
            Some(SettingValue::Int(_)) => {
                warn!("Store key {} holds an integer, expected a boolean", key);
                false
            }
            None => false,
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.set(key, SettingValue::Bool(value))
    }

    fn connect_changed(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let store = SettingsFile::open(dir.path().join("geometry.toml")).unwrap();

        assert_eq!(
            PersistedGeometry::read(&store),
            PersistedGeometry {
                pos_x: 0,
                pos_y: 0,
                width: 800,
                height: 600,
                pinned: false,
            }
        );
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("geometry.toml");

        let store = SettingsFile::open(&path).unwrap();
        let geometry = PersistedGeometry {
            pos_x: 50,
            pos_y: 70,
            width: 1024,
            height: 700,
            pinned: true,
        };
        geometry.write(&store).unwrap();
        drop(store);

        let reopened = SettingsFile::open(&path).unwrap();
        assert_eq!(PersistedGeometry::read(&reopened), geometry);
    }

    #[test]
    fn test_set_notifies_only_on_change() {
        let store = SettingsFile::in_memory();
        let mut changes = store.connect_changed();

        store.set_bool(KEY_ALWAYS_ON_TOP, true).unwrap();
        store.set_bool(KEY_ALWAYS_ON_TOP, true).unwrap();
        store.set_int(KEY_POS_X, 0).unwrap();

        assert_eq!(changes.try_recv().unwrap(), KEY_ALWAYS_ON_TOP);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_reload_reports_external_edits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geometry.toml");
        let store = SettingsFile::open(&path).unwrap();
        store.set_int(KEY_WIDTH, 900).unwrap();
        let mut changes = store.connect_changed();

        let edited = std::fs::read_to_string(&path)
            .unwrap()
            .replace("always-on-top = false", "always-on-top = true");
        std::fs::write(&path, edited).unwrap();

        assert_eq!(store.reload().unwrap(), vec![KEY_ALWAYS_ON_TOP.to_string()]);
        assert_eq!(changes.try_recv().unwrap(), KEY_ALWAYS_ON_TOP);
        assert!(store.get_bool(KEY_ALWAYS_ON_TOP));
        assert_eq!(store.get_int(KEY_WIDTH), 900);
    }

    #[test]
    fn test_wrong_type_reads_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geometry.toml");
        std::fs::write(&path, "\"win-size-width\" = true\n\"always-on-top\" = 3\n").unwrap();

        let store = SettingsFile::open(&path).unwrap();
        assert_eq!(store.get_int(KEY_WIDTH), 800);
        assert!(!store.get_bool(KEY_ALWAYS_ON_TOP));
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geometry.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        assert_matches!(SettingsFile::open(&path), Err(StoreError::Parse { .. }));
    }

    #[test]
    fn test_failed_write_is_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geometry.toml");
        let store = SettingsFile::open(&path).unwrap();

        std::fs::create_dir(&path).unwrap();
        assert_matches!(store.set_int(KEY_WIDTH, 1200), Err(StoreError::Write { .. }));
        assert_eq!(store.get_int(KEY_WIDTH), 800);

        std::fs::remove_dir(&path).unwrap();
        store.set_int(KEY_WIDTH, 1200).unwrap();
        assert_eq!(store.get_int(KEY_WIDTH), 1200);

        let reopened = SettingsFile::open(&path).unwrap();
        assert_eq!(reopened.get_int(KEY_WIDTH), 1200);
    }

    #[test]
    fn test_in_memory_reload_is_empty() {
        let store = SettingsFile::in_memory();
        assert!(store.path().is_none());
        assert!(store.reload().unwrap().is_empty());
    }
}
