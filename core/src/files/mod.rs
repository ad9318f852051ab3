pub mod accounts;
pub mod filetype;
pub mod listing;
pub mod mode;
pub mod names;
pub mod ownership;
pub mod paths;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use filetype::Category;

/// Kind of filesystem object, using the short names of the metadata channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "reg")]
    Regular,
    #[serde(rename = "dir")]
    Directory,
    #[serde(rename = "lnk")]
    Symlink,
    #[serde(rename = "blk")]
    BlockDevice,
    #[serde(rename = "chr")]
    CharDevice,
    #[serde(rename = "fifo")]
    Fifo,
    #[serde(rename = "sock")]
    Socket,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl FileType {
    /// Human-readable description of the inode type.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Regular => "Regular file",
            Self::Directory => "Directory",
            Self::Symlink => "Symbolic link",
            Self::BlockDevice => "Block device",
            Self::CharDevice => "Character device",
            Self::Fifo => "Named pipe",
            Self::Socket => "Socket",
            Self::Unknown => "Missing type",
        }
    }
}

/// A file owner or group: the resolved name, or the raw id when the host
/// could not resolve it. Never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Owner {
    Id(u32),
    Name(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Owner {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Metadata for one filesystem object as reported by the metadata channel.
///
/// Every field is optional because the channel only reports the attributes
/// that were requested. `None` fields are never serialized: in a merge patch a
/// `null` would delete the key instead of leaving it alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Owner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Owner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<BTreeMap<String, FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<BTreeMap<String, FileInfo>>,
}

impl FileInfo {
    /// Shorthand for an entry that only carries its type.
    pub fn of_type(file_type: FileType) -> Self {
        Self {
            file_type: Some(file_type),
            ..Self::default()
        }
    }

    pub fn is_type(&self, file_type: FileType) -> bool {
        self.file_type == Some(file_type)
    }

    /// Look up a direct child by name.
    pub fn entry(&self, name: &str) -> Option<&FileInfo> {
        self.entries.as_ref()?.get(name)
    }

    /// `user:group` as understood by `chown`, when both are known.
    pub fn owner_spec(&self) -> Option<String> {
        match (&self.user, &self.group) {
            (Some(user), Some(group)) => Some(format!("{user}:{group}")),
            _ => None,
        }
    }
}

/// One row of the folder view: an entry of the current directory together
/// with the derived, non-authoritative attributes the UI needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderEntry {
    pub name: String,
    pub info: FileInfo,
    /// Type of the symlink target (or of the entry itself when it is not a
    /// link); `None` when the chain could not be resolved.
    pub to: Option<FileType>,
    /// Extension-based category, only computed when `to` is a regular file.
    pub category: Option<Category>,
}

impl FolderEntry {
    /// A bare entry with no derived attributes, as used for the directory
    /// itself or for freshly uploaded files.
    pub fn new(name: impl Into<String>, info: FileInfo) -> Self {
        Self {
            name: name.into(),
            info,
            to: None,
            category: None,
        }
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.info.file_type
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}
