//! Display settings persisted as a JSON key/value file.
//!
//! The file lives at `<config dir>/filedeck/settings.json`, where the config
//! dir is `$FILEDECK_CONFIG_DIR` when set and the platform config directory
//! otherwise.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use filedeck_core::config::KeyValueStore;
use filedeck_core::errors::CoreError;

const SETTINGS_FILE: &str = "settings.json";

/// [`KeyValueStore`] writing every change through to a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at the default location.
    pub fn open_default() -> Self {
        Self::open(config_dir().join(SETTINGS_FILE))
    }

    /// Open the store at `path`.
    ///
    /// A missing file is an empty store. A corrupt file is moved aside to
    /// `<name>.bak` and the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = load_from(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::Config(format!(
                    "Failed to create settings directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json).map_err(|e| {
            CoreError::Config(format!(
                "Failed to write settings to {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| CoreError::Config(format!("settings store poisoned: {e}")))?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }
}

fn load_from(path: &Path) -> BTreeMap<String, String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => {
            debug!("No settings file at {}", path.display());
            return BTreeMap::new();
        }
    };
    match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
        Ok(values) => {
            debug!("Loaded {} settings from {}", values.len(), path.display());
            values
        }
        Err(e) => {
            warn!("Failed to parse settings from {}: {}", path.display(), e);
            let backup = path.with_extension("json.bak");
            if let Err(e) = std::fs::rename(path, &backup) {
                warn!("Failed to back up corrupt settings to {}: {}", backup.display(), e);
            }
            BTreeMap::new()
        }
    }
}

/// The directory holding filedeck's settings.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FILEDECK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("filedeck")
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedeck_core::config::{Settings, Sort, ViewMode, KEY_SORT};
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("settings.json"));
        assert_eq!(store.get(KEY_SORT), None);
        assert_eq!(Settings::load(&store), Settings::default());
    }

    #[test]
    fn settings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            view: ViewMode::List,
            sort: Sort::LargestSize,
            show_hidden: true,
        };
        settings.save(&JsonFileStore::open(&path)).unwrap();

        let reopened = JsonFileStore::open(&path);
        assert_eq!(Settings::load(&reopened), settings);
        assert_eq!(reopened.get(KEY_SORT).as_deref(), Some("largest_size"));
    }

    #[test]
    fn corrupt_file_is_backed_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(Settings::load(&store), Settings::default());
        assert!(!path.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("settings.json.bak")).unwrap(),
            "{not json"
        );

        store.set(KEY_SORT, "za").unwrap();
        assert!(path.exists());
    }
}
