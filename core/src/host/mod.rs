//! Host service abstraction.
//!
//! The core never touches the managed filesystem itself. Everything goes
//! through three services provided by the host:
//!
//! - [`CommandRunner`] runs an argv, optionally with elevated privileges.
//!   Used for every mutation (`mkdir`, `mv`, `rm`, `cp`, `ln`, `chmod`,
//!   `chown`) and for probes such as `test -w`.
//! - [`DirectoryChannel`] opens a metadata subscription that emits an initial
//!   listing followed by RFC 7396 merge patches.
//! - [`FileChannel`] reads and replaces file contents with an opaque version
//!   tag, and can watch a file for tag changes.
//!
//! The core defines *what* to ask; consumers inject *how* by implementing
//! these traits. [`Host`] bundles the three behind `Arc`s so it can be cloned
//! into spawned tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::FileError;

/// Tag reported for a file that does not exist.
pub const MISSING_TAG: &str = "-";

/// Privilege mode of a command or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Superuser {
    /// Run as the session user.
    #[default]
    None,
    /// Elevate when possible, otherwise run as the session user.
    Try,
    /// Elevate or fail.
    Require,
}

/// Options for [`CommandRunner::exec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub superuser: Superuser,
    /// Working directory for the command.
    pub directory: Option<String>,
}

impl ExecOptions {
    pub fn superuser(superuser: Superuser) -> Self {
        Self {
            superuser,
            directory: None,
        }
    }

    pub fn in_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Build an argv from string-like parts.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Privileged command execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion and return its stdout.
    ///
    /// A non-zero exit status fails with the command's stderr text, which is
    /// shown to the user verbatim.
    async fn exec(&self, argv: Vec<String>, options: ExecOptions) -> Result<String, FileError>;
}

/// A stream of channel messages, closed when cancelled or dropped.
pub struct Subscription<T> {
    messages: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// Wrap a receiver. The producer must stop once `cancel` fires.
    pub fn new(messages: mpsc::Receiver<T>, cancel: CancellationToken) -> Self {
        Self { messages, cancel }
    }

    /// Next message, or `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.messages.recv().await
    }

    /// Token observed by the producer; cancelling it closes the channel.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn close(&mut self) {
        self.cancel.cancel();
        self.messages.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Parameters of a directory metadata subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub path: String,
    /// Attributes to report for the directory and each entry.
    pub attrs: Vec<String>,
    /// Keep emitting patches after the initial listing.
    pub watch: bool,
    pub superuser: Superuser,
}

/// Recursive metadata channel (`fsinfo`).
///
/// Every message is a JSON object merged into the accumulated state with
/// merge-patch semantics: `{"info": {...}}` carries the directory, its
/// `entries` and `targets`; `{"error": {...}}` reports an unreadable path;
/// `"partial": true` marks a message that is not yet a consistent state.
/// Read failures are reported as messages, never as a closed channel.
#[async_trait]
pub trait DirectoryChannel: Send + Sync {
    async fn subscribe(&self, request: WatchRequest) -> Result<Subscription<Value>, FileError>;
}

/// Result of reading a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContents {
    /// `None` when the file does not exist (`tag` is then [`MISSING_TAG`]).
    pub content: Option<String>,
    pub tag: String,
}

/// Options for [`FileChannel::read`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Fail with [`FileError::TooLarge`] above this many bytes.
    pub max_read_size: Option<u64>,
    pub superuser: Superuser,
}

/// A streaming, tag-guarded write started by [`FileChannel::open_writer`].
#[async_trait]
pub trait FileWriter: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), FileError>;

    /// Commit the written data and return the new tag.
    async fn finish(self: Box<Self>) -> Result<String, FileError>;

    /// Discard everything written so far. The target is left untouched.
    async fn abort(self: Box<Self>);
}

/// File content channel.
#[async_trait]
pub trait FileChannel: Send + Sync {
    async fn read(&self, path: &str, options: ReadOptions) -> Result<FileContents, FileError>;

    /// Atomically replace the file's content and return the new tag.
    ///
    /// `content == None` removes the file. When `expected_tag` is given the
    /// write fails with [`FileError::Conflict`] unless the file's current
    /// tag matches; [`MISSING_TAG`] expects the file not to exist.
    async fn replace(
        &self,
        path: &str,
        content: Option<&str>,
        expected_tag: Option<&str>,
        superuser: Superuser,
    ) -> Result<String, FileError>;

    /// Start a streaming replace with the same guard semantics as
    /// [`replace`](Self::replace).
    async fn open_writer(
        &self,
        path: &str,
        expected_tag: Option<&str>,
        superuser: Superuser,
    ) -> Result<Box<dyn FileWriter>, FileError>;

    /// Emit the file's tag each time it changes on disk (no content).
    async fn watch(&self, path: &str, superuser: Superuser) -> Result<Subscription<String>, FileError>;

    /// SELinux security context of `path` itself (a final symlink is not
    /// followed). `None` when the host has no SELinux support or the entry
    /// carries no label.
    async fn selinux_context(&self, _path: &str) -> Result<Option<String>, FileError> {
        Ok(None)
    }
}

/// The three host services, shareable across tasks.
#[derive(Clone)]
pub struct Host {
    pub commands: Arc<dyn CommandRunner>,
    pub directories: Arc<dyn DirectoryChannel>,
    pub files: Arc<dyn FileChannel>,
}

impl Host {
    pub fn new(
        commands: Arc<dyn CommandRunner>,
        directories: Arc<dyn DirectoryChannel>,
        files: Arc<dyn FileChannel>,
    ) -> Self {
        Self {
            commands,
            directories,
            files,
        }
    }
}
