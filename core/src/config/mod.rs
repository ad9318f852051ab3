use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CoreError;

pub const KEY_IS_GRID: &str = "files:isGrid";
pub const KEY_SORT: &str = "files:sort";
pub const KEY_SHOW_HIDDEN: &str = "files:showHiddenFiles";

/// Folder view layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

/// Folder listing order. Directories always sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    #[default]
    Az,
    Za,
    FirstModified,
    LastModified,
    LargestSize,
    SmallestSize,
}

impl Sort {
    pub const ALL: [Sort; 6] = [
        Sort::Az,
        Sort::Za,
        Sort::FirstModified,
        Sort::LastModified,
        Sort::LargestSize,
        Sort::SmallestSize,
    ];

    /// Key used in the settings store (`az`, `last_modified`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Az => "az",
            Self::Za => "za",
            Self::FirstModified => "first_modified",
            Self::LastModified => "last_modified",
            Self::LargestSize => "largest_size",
            Self::SmallestSize => "smallest_size",
        }
    }

    /// Parse a stored key; unknown values fall back to [`Sort::Az`].
    pub fn parse(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|sort| sort.as_str() == value)
            .unwrap_or_default()
    }
}

/// Persistent key/value storage for client-local preferences.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
}

/// Non-persistent store, used by tests and as a fallback.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| CoreError::Config(format!("settings store poisoned: {e}")))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Display preferences of the folder view.
///
/// Missing or unparseable stored values fall back to the defaults
/// (grid view, `az`, hidden files off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub view: ViewMode,
    #[serde(default)]
    pub sort: Sort,
    #[serde(default)]
    pub show_hidden: bool,
}

impl Settings {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let view = match store.get(KEY_IS_GRID).as_deref() {
            Some("false") => ViewMode::List,
            _ => ViewMode::Grid,
        };
        let sort = store
            .get(KEY_SORT)
            .map(|value| Sort::parse(&value))
            .unwrap_or_default();
        let show_hidden = store.get(KEY_SHOW_HIDDEN).as_deref() == Some("true");

        let settings = Self {
            view,
            sort,
            show_hidden,
        };
        debug!(?settings, "Loaded display settings");
        settings
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), CoreError> {
        store.set(KEY_IS_GRID, bool_str(self.view == ViewMode::Grid))?;
        store.set(KEY_SORT, self.sort.as_str())?;
        store.set(KEY_SHOW_HIDDEN, bool_str(self.show_hidden))?;
        Ok(())
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Tunables of a host implementation's channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// How often watched directories and files are re-examined.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Entries per message of an initial directory listing; every message
    /// but the last is marked `partial`.
    #[serde(default = "default_listing_chunk")]
    pub listing_chunk: usize,
    /// Bytes per chunk of an upload.
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            listing_chunk: default_listing_chunk(),
            upload_chunk_size: default_upload_chunk_size(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_listing_chunk() -> usize {
    500
}

fn default_upload_chunk_size() -> usize {
    64 * 1024
}
