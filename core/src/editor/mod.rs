//! Single-file editing with tag-based conflict detection.
//!
//! An [`EditorSession`] owns one file's buffer and two version tags:
//! `tag_at_load` (the baseline of the last load or save) and `tag_now` (the
//! tag last seen on disk through the watch channel). A save is refused once
//! the two differ, and the write itself is guarded by `tag_now`, so a write
//! that races an unseen external change also fails with a conflict instead of
//! clobbering it. Only [`EditorSession::overwrite`] replaces a changed file.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{EditorError, FileError};
use crate::host::{
    argv, CommandRunner, ExecOptions, FileChannel, ReadOptions, Subscription, Superuser,
    MISSING_TAG,
};
use crate::timing::Debouncer;

pub use crate::files::listing::{can_open_in_editor, MAX_EDITOR_FILE_SIZE};

/// Quiet period before an external tag change is reflected in `tag_now`.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// An error shown in the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorFailure {
    /// The file no longer exists.
    Removed,
    /// A guarded write found a different version on disk.
    Conflict,
    Other(String),
}

impl EditorFailure {
    fn from_file_error(err: &FileError) -> Self {
        match err {
            FileError::NotFound(_) => Self::Removed,
            FileError::Conflict(_) => Self::Conflict,
            other => Self::Other(other.user_message()),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Removed => "The file has been removed on disk".to_string(),
            Self::Conflict => "The existing file changed unexpectedly".to_string(),
            Self::Other(message) => message.clone(),
        }
    }
}

/// How the file on disk differs from the loaded baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalChange {
    Changed,
    Removed,
}

/// Coarse lifecycle phase, derived from [`EditorState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorPhase {
    Loading,
    Clean,
    Modified,
    Saving,
    ExternalChangeDetected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditorState {
    pub content: String,
    pub tag_at_load: Option<String>,
    pub tag_now: Option<String>,
    pub modified: bool,
    pub saving: bool,
    pub error: Option<EditorFailure>,
    pub writable: bool,
    pub loading: bool,
    pub closed: bool,
    /// External change the user chose to ignore.
    pub ignored_tag: Option<String>,
}

impl EditorState {
    fn new() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    /// An external change not yet acknowledged with
    /// [`EditorSession::ignore_external_change`].
    pub fn external_change(&self) -> Option<ExternalChange> {
        if self.tag_now == self.tag_at_load || self.tag_now == self.ignored_tag {
            return None;
        }
        if self.file_removed() {
            Some(ExternalChange::Removed)
        } else {
            Some(ExternalChange::Changed)
        }
    }

    pub fn file_removed(&self) -> bool {
        self.tag_now.as_deref() == Some(MISSING_TAG)
    }

    /// The error to display. Errors are hidden while an external change is
    /// pending, which is reported on its own.
    pub fn visible_error(&self) -> Option<&EditorFailure> {
        if self.tag_now == self.tag_at_load {
            self.error.as_ref()
        } else {
            None
        }
    }

    /// Whether the plain "Save" action is available.
    pub fn can_save(&self) -> bool {
        let conflict = self.tag_now != self.tag_at_load;
        self.writable
            && !self.closed
            && !self.saving
            && self.modified
            && (!conflict || self.file_removed())
    }

    /// Whether "Overwrite" (an unguarded save) is offered.
    pub fn can_overwrite(&self) -> bool {
        self.writable && !self.closed && self.tag_now != self.tag_at_load && !self.file_removed()
    }

    /// Unsaved changes would be lost by leaving.
    pub fn has_unsaved_changes(&self) -> bool {
        !self.closed && self.modified
    }

    pub fn phase(&self) -> EditorPhase {
        if self.closed {
            EditorPhase::Closed
        } else if self.loading {
            EditorPhase::Loading
        } else if self.saving {
            EditorPhase::Saving
        } else if self.external_change().is_some() {
            EditorPhase::ExternalChangeDetected
        } else if self.modified {
            EditorPhase::Modified
        } else {
            EditorPhase::Clean
        }
    }
}

/// Append a newline to non-empty content that does not end with one.
pub fn with_trailing_newline(content: &str) -> Cow<'_, str> {
    if content.is_empty() || content.ends_with('\n') {
        Cow::Borrowed(content)
    } else {
        Cow::Owned(format!("{content}\n"))
    }
}

/// An open file in the editor.
///
/// Dropping the session closes it: the watch subscription and any pending
/// debounced tag update are cancelled.
pub struct EditorSession {
    path: String,
    files: Arc<dyn FileChannel>,
    state: Arc<watch::Sender<EditorState>>,
    cancel: CancellationToken,
    watch_task: Option<JoinHandle<()>>,
}

impl EditorSession {
    /// Open `path`: load it, probe write permission concurrently, then start
    /// watching for external changes.
    pub async fn open(
        files: Arc<dyn FileChannel>,
        commands: Arc<dyn CommandRunner>,
        path: &str,
    ) -> Self {
        let (state, _) = watch::channel(EditorState::new());
        let mut session = Self {
            path: path.to_string(),
            files,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            watch_task: None,
        };

        let probe = async {
            commands
                .exec(
                    argv(["test", "-w", path]),
                    ExecOptions::superuser(Superuser::Try),
                )
                .await
                .is_ok()
        };
        let (_, writable) = tokio::join!(session.load_file(), probe);
        session.state.send_modify(|s| s.writable = writable);
        debug!(path, writable, "Editor opened");

        match session.files.watch(path, Superuser::Try).await {
            Ok(subscription) => {
                session.watch_task = Some(tokio::spawn(watch_tags(
                    subscription,
                    Arc::clone(&session.state),
                    session.cancel.clone(),
                )));
            }
            Err(e) => warn!(path, "Cannot watch file for changes: {e}"),
        }

        session
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> EditorState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<EditorState> {
        self.state.subscribe()
    }

    /// Replace the buffer. Purely local.
    pub fn modify(&self, content: impl Into<String>) {
        let content = content.into();
        self.state.send_if_modified(|s| {
            if s.closed {
                return false;
            }
            s.content = content;
            s.modified = true;
            true
        });
    }

    /// (Re)load the file from disk, discarding local edits.
    pub async fn load_file(&self) {
        let options = ReadOptions {
            max_read_size: Some(MAX_EDITOR_FILE_SIZE),
            superuser: Superuser::Try,
        };
        let result = self.files.read(&self.path, options).await;

        self.state.send_if_modified(|s| {
            if s.closed {
                return false;
            }
            s.loading = false;
            match result {
                Ok(contents) => {
                    let removed = contents.content.is_none();
                    s.content = contents.content.unwrap_or_default();
                    s.tag_now = Some(contents.tag.clone());
                    s.tag_at_load = Some(contents.tag);
                    s.modified = false;
                    s.error = removed.then_some(EditorFailure::Removed);
                }
                Err(e) => {
                    debug!(path = %self.path, "Editor load failed: {e}");
                    let failure = EditorFailure::from_file_error(&e);
                    if failure == EditorFailure::Removed {
                        s.tag_now = Some(MISSING_TAG.to_string());
                        s.tag_at_load = Some(MISSING_TAG.to_string());
                    }
                    s.error = Some(failure);
                }
            }
            true
        });
    }

    /// Write the buffer, guarded by `tag_now`.
    ///
    /// A file changed on disk since the last load or save is a conflict, even
    /// when the notice was dismissed. A removed file is recreated. On failure
    /// the error is recorded in the state and the buffer stays modified.
    pub async fn save(&self) -> Result<(), EditorError> {
        let expected = {
            let s = self.state.borrow();
            if s.closed {
                return Err(EditorError::Closed);
            }
            if !s.writable {
                return Err(EditorError::ReadOnly);
            }
            match &s.tag_now {
                Some(tag) if s.tag_now != s.tag_at_load && !s.file_removed() => {
                    debug!(path = %self.path, tag = %tag, "Refusing to save over an external change");
                    None
                }
                Some(tag) => Some(tag.clone()),
                None => {
                    warn!(path = %self.path, "Refusing to save without a known on-disk tag");
                    return Err(EditorError::NotLoaded);
                }
            }
        };
        match expected {
            Some(tag) => self.write(Some(tag)).await,
            None => {
                self.state
                    .send_modify(|s| s.error = Some(EditorFailure::Conflict));
                Err(EditorError::File(FileError::Conflict(self.path.clone())))
            }
        }
    }

    /// Write the buffer without the tag guard, replacing whatever is on disk.
    pub async fn overwrite(&self) -> Result<(), EditorError> {
        {
            let s = self.state.borrow();
            if s.closed {
                return Err(EditorError::Closed);
            }
            if !s.writable {
                return Err(EditorError::ReadOnly);
            }
        }
        self.write(None).await
    }

    async fn write(&self, expected_tag: Option<String>) -> Result<(), EditorError> {
        let content = {
            let s = self.state.borrow();
            with_trailing_newline(&s.content).into_owned()
        };
        self.state.send_modify(|s| s.saving = true);

        let result = self
            .files
            .replace(
                &self.path,
                Some(&content),
                expected_tag.as_deref(),
                Superuser::Try,
            )
            .await;

        match result {
            Ok(tag) => {
                info!(path = %self.path, "Saved file");
                self.state.send_modify(|s| {
                    s.saving = false;
                    s.modified = false;
                    s.error = None;
                    s.tag_now = Some(tag.clone());
                    s.tag_at_load = Some(tag);
                });
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path, "Save failed: {e}");
                let failure = EditorFailure::from_file_error(&e);
                self.state.send_modify(|s| {
                    s.saving = false;
                    s.error = Some(failure);
                });
                Err(EditorError::File(e))
            }
        }
    }

    /// Dismiss the current external-change notice.
    pub fn ignore_external_change(&self) {
        self.state.send_modify(|s| s.ignored_tag = s.tag_now.clone());
    }

    /// Whether leaving now would lose edits.
    pub fn unload_guard(&self) -> bool {
        self.state.borrow().has_unsaved_changes()
    }

    /// Release the watch subscription and cancel pending tag updates.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
        self.state.send_modify(|s| s.closed = true);
        debug!(path = %self.path, "Editor closed");
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn watch_tags(
    mut subscription: Subscription<String>,
    state: Arc<watch::Sender<EditorState>>,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(WATCH_DEBOUNCE);

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some(tag) = debouncer.poll(Instant::now()) {
                    debug!(tag = %tag, "File tag changed on disk");
                    state.send_if_modified(|s| {
                        if s.closed {
                            return false;
                        }
                        s.tag_now = Some(tag);
                        true
                    });
                }
            }
            tag = subscription.recv() => match tag {
                Some(tag) => debouncer.push(tag, Instant::now()),
                None => break,
            }
        }
    }

    debouncer.cancel();
    subscription.close();
}
