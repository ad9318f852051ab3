//! Error types for the filedeck core crate.
//!
//! Host-service failures ([`FileError`]) are kept apart from local pre-flight
//! failures ([`ValidationError`]) so callers can tell "the command was never
//! issued" from "the host refused it". [`OpError`] is what the operation
//! coordinator hands back to the presentation layer.

use thiserror::Error;

/// Top-level error type encompassing all core error categories.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A host-service failure.
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// A coordinated operation failed.
    #[error("Operation error: {0}")]
    Operation(#[from] OpError),

    /// An editor session refused or failed a save.
    #[error("Editor error: {0}")]
    Editor(#[from] EditorError),

    /// A malformed message on a channel.
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A configuration error (invalid values, missing fields, parse failures).
    #[error("Config error: {0}")]
    Config(String),
}

/// Errors reported by the host services (command execution, directory
/// metadata channel, file content channel).
#[derive(Error, Debug)]
pub enum FileError {
    /// The target vanished between listing and acting.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The host denied the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A tag-guarded write found a different version on disk.
    #[error("Change conflict: {0}")]
    Conflict(String),

    /// The file exceeds the requested read ceiling.
    #[error("File too large: {0}")]
    TooLarge(String),

    /// The transfer was aborted by the user.
    #[error("Cancelled")]
    Cancelled,

    /// A command or channel operation failed; the text is the host's own.
    #[error("{0}")]
    OperationFailed(String),

    /// The host does not offer this capability.
    #[error("Operation not supported by this host")]
    NotSupported,

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// The text shown to the user for this failure.
    ///
    /// Command failures carry the host's stderr verbatim; the other variants
    /// get a fixed phrasing that the UI can rely on.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(_) => "The file has been removed on disk".to_string(),
            Self::Conflict(_) => "The existing file changed unexpectedly".to_string(),
            Self::PermissionDenied(msg) | Self::OperationFailed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this failure is a user-initiated abort rather than an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Local pre-flight failures. None of these ever reach the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Name too long")]
    NameTooLong,

    #[error("Name cannot include a /")]
    NameContainsSlash,

    #[error("Directory with the same name exists")]
    DirectoryExists,

    #[error("File exists")]
    FileExists,

    #[error("Filename is the same as original name")]
    SameName,

    /// Some clipboard entries already exist in the destination.
    #[error("\"{}\" exists, not overwriting with paste.", .0.join(", "))]
    PasteCollision(Vec<String>),

    /// Some clipboard entries are gone from their source directory.
    #[error("\"{}\" no longer exists in the source directory.", .0.join(", "))]
    StaleClipboard(Vec<String>),

    /// An operation on a selection was asked for with nothing selected.
    #[error("No items selected")]
    NothingSelected,

    /// Another upload batch is still running.
    #[error("Another upload is in progress")]
    UploadInProgress,

    /// The clipboard holds nothing to paste.
    #[error("Nothing to paste")]
    EmptyClipboard,

    /// The current directory listing is not available yet.
    #[error("Directory information is not available")]
    NoDirectoryInfo,

    /// Overwrite was requested where it is not allowed.
    #[error("Only regular files can be overwritten")]
    CannotOverwrite,
}

/// Why an editor save was refused or failed.
#[derive(Error, Debug)]
pub enum EditorError {
    /// No on-disk tag is known yet, so there is no baseline to guard against.
    #[error("The file has not been loaded")]
    NotLoaded,

    #[error("The file is read-only")]
    ReadOnly,

    #[error("The editor has been closed")]
    Closed,

    #[error(transparent)]
    File(#[from] FileError),
}

/// The three steps of a permissions/ownership edit, in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStep {
    Chmod,
    Chown,
    Rename,
}

impl std::fmt::Display for EditStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chmod => write!(f, "chmod"),
            Self::Chown => write!(f, "chown"),
            Self::Rename => write!(f, "rename"),
        }
    }
}

/// Failures at the operation coordinator boundary.
#[derive(Error, Debug)]
pub enum OpError {
    /// Rejected locally; no command was issued.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The host rejected the (single) command.
    #[error(transparent)]
    Host(#[from] FileError),

    /// A step of a sequenced edit failed. Steps in `completed` were applied
    /// and are not rolled back.
    #[error("{source}")]
    Step {
        step: EditStep,
        completed: Vec<EditStep>,
        #[source]
        source: FileError,
    },

    /// A later step failed and a compensating action was attempted.
    /// `compensation` holds the compensating action's own failure, if any.
    #[error("{primary}")]
    Compensated {
        primary: FileError,
        compensation: Option<FileError>,
    },
}

impl OpError {
    /// The message shown to the user. Compensation failures never appear here.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Host(e) => e.user_message(),
            Self::Step { source, .. } => source.user_message(),
            Self::Compensated { primary, .. } => primary.user_message(),
        }
    }

    /// Whether the failure is a cancellation, which is not reported as an error.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Host(e) => e.is_cancelled(),
            Self::Compensated { primary, .. } => primary.is_cancelled(),
            _ => false,
        }
    }
}
