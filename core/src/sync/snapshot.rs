//! The consistent directory state published by the reducer.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::files::{FileInfo, FileType};

/// Maximum number of symlink hops followed before giving up (like `ELOOP`).
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Why a directory could not be read, as reported by the metadata channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsInfoError {
    /// Machine-readable problem code, e.g. `not-found` or `access-denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Symbolic errno, e.g. `ENOENT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
}

impl FsInfoError {
    /// Text shown in place of the listing.
    pub fn display_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.problem.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// `{info, error, loading}` for one watched directory.
///
/// `info` and `error` are never both populated by a well-behaved channel;
/// when the directory is unreadable `error` is set and `info` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfoState {
    pub info: Option<FileInfo>,
    pub error: Option<FsInfoError>,
    /// True until the first non-partial message has been merged.
    pub loading: bool,
}

impl Default for FileInfoState {
    fn default() -> Self {
        Self {
            info: None,
            error: None,
            loading: true,
        }
    }
}

impl FileInfoState {
    /// Direct child of the directory by name.
    pub fn entry(&self, name: &str) -> Option<&FileInfo> {
        self.info.as_ref()?.entry(name)
    }

    /// Children of the directory; empty while loading or on error.
    pub fn entries(&self) -> Cow<'_, BTreeMap<String, FileInfo>> {
        match self.info.as_ref().and_then(|info| info.entries.as_ref()) {
            Some(entries) => Cow::Borrowed(entries),
            None => Cow::Owned(BTreeMap::new()),
        }
    }

    /// Follow the symlink chain starting at entry `name`.
    /// See [`resolve_target`].
    pub fn target(&self, name: &str) -> Option<Cow<'_, FileInfo>> {
        resolve_target(self.info.as_ref()?, name)
    }
}

/// Resolve entry `name` of `dir` through its chain of symlinks.
///
/// Targets are looked up in `entries` first and then in the side `targets`
/// map. `.` resolves to the directory itself; `..` is known to be a
/// directory but carries no other attributes. Returns `None` for a missing
/// entry, a dangling link, or a chain longer than [`MAX_SYMLINK_HOPS`].
/// Non-links resolve to themselves.
pub fn resolve_target<'a>(dir: &'a FileInfo, name: &str) -> Option<Cow<'a, FileInfo>> {
    let lookup = move |key: &str| -> Option<&'a FileInfo> {
        dir.entries
            .as_ref()
            .and_then(|entries| entries.get(key))
            .or_else(|| dir.targets.as_ref().and_then(|targets| targets.get(key)))
    };

    let mut entry = dir.entries.as_ref()?.get(name)?;
    for _ in 0..MAX_SYMLINK_HOPS {
        let Some(target) = entry.target.as_deref() else {
            return Some(Cow::Borrowed(entry));
        };
        match target {
            "." => return Some(Cow::Borrowed(dir)),
            ".." => return Some(Cow::Owned(FileInfo::of_type(FileType::Directory))),
            other => entry = lookup(other)?,
        }
    }

    match entry.target {
        None => Some(Cow::Borrowed(entry)),
        Some(_) => None,
    }
}
