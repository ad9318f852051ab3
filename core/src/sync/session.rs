//! One live metadata subscription for one directory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::FileError;
use crate::files::FileInfo;
use crate::host::{DirectoryChannel, Subscription, Superuser, WatchRequest};

use super::reducer::{EffectHandle, SnapshotReducer};
use super::snapshot::{FileInfoState, FsInfoError};

/// Attributes requested for a directory view.
pub const DIRECTORY_ATTRS: [&str; 9] = [
    "type", "mode", "size", "mtime", "user", "group", "target", "entries", "targets",
];

fn error_message(problem: &str, err: &FileError) -> Value {
    json!({"info": null, "error": {"problem": problem, "message": err.user_message()}})
}

fn problem_for(err: &FileError) -> &'static str {
    match err {
        FileError::NotFound(_) => "not-found",
        FileError::PermissionDenied(_) => "access-denied",
        _ => "internal-error",
    }
}

/// Map a channel-reported error onto a [`FileError`].
pub fn fs_error_to_file_error(path: &str, error: &FsInfoError) -> FileError {
    match error.problem.as_deref() {
        Some("not-found") => FileError::NotFound(path.to_string()),
        Some("access-denied") => FileError::PermissionDenied(error.display_message()),
        _ => FileError::OperationFailed(error.display_message()),
    }
}

/// A watched directory.
///
/// Opening never fails: a subscription error is published as the state's
/// `error`. Messages are pumped into a [`SnapshotReducer`] by a background
/// task; after [`close`](Self::close) nothing reaches the reducer anymore,
/// even messages already received from the channel.
pub struct DirectoryWatchSession {
    path: String,
    reducer: SnapshotReducer,
    updates: watch::Receiver<Arc<FileInfoState>>,
    cancel: CancellationToken,
    /// Token the host channel watches; cancelled synchronously on close.
    channel_token: Option<CancellationToken>,
    /// Fired when the pump stops, for whatever reason.
    finished: CancellationToken,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    _mirror: EffectHandle,
}

impl DirectoryWatchSession {
    /// Subscribe to `path` with the given attribute set.
    pub async fn open(
        channel: Arc<dyn DirectoryChannel>,
        path: &str,
        attrs: &[&str],
        superuser: Superuser,
    ) -> Self {
        let reducer = SnapshotReducer::new();
        let (tx, updates) = watch::channel(reducer.state());
        let mirror = reducer.effect(move |state| {
            tx.send_replace(Arc::new(state.clone()));
        });

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));
        let mut channel_token = None;

        let request = WatchRequest {
            path: path.to_string(),
            attrs: attrs.iter().map(|a| a.to_string()).collect(),
            watch: true,
            superuser,
        };

        let task = match channel.subscribe(request).await {
            Ok(subscription) => {
                info!(path, "Watching directory");
                channel_token = Some(subscription.cancel_token());
                Some(tokio::spawn(pump(
                    path.to_string(),
                    subscription,
                    reducer.clone(),
                    cancel.clone(),
                    finished.clone(),
                    Arc::clone(&closed),
                )))
            }
            Err(e) => {
                warn!(path, "Failed to open directory channel: {e}");
                reducer.apply(&error_message(problem_for(&e), &e));
                finished.cancel();
                None
            }
        };

        Self {
            path: path.to_string(),
            reducer,
            updates,
            cancel,
            channel_token,
            finished,
            closed,
            task,
            _mirror: mirror,
        }
    }

    /// Open with [`DIRECTORY_ATTRS`], elevating when possible.
    pub async fn open_directory(channel: Arc<dyn DirectoryChannel>, path: &str) -> Self {
        Self::open(channel, path, &DIRECTORY_ATTRS, Superuser::Try).await
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The current consistent state.
    pub fn state(&self) -> Arc<FileInfoState> {
        self.reducer.state()
    }

    /// Attach a subscriber (see [`SnapshotReducer::effect`]).
    pub fn effect<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(&FileInfoState) + Send + Sync + 'static,
    {
        self.reducer.effect(callback)
    }

    /// Receiver that always holds the latest published state.
    pub fn updates(&self) -> watch::Receiver<Arc<FileInfoState>> {
        self.updates.clone()
    }

    /// Wait until the first consistent state has been published.
    ///
    /// Returns the state as it stands if the channel ends or the session is
    /// closed first; it is then still `loading`.
    pub async fn loaded(&self) -> Arc<FileInfoState> {
        let mut updates = self.updates.clone();
        tokio::select! {
            result = updates.wait_for(|state| !state.loading) => match result {
                Ok(state) => Arc::clone(&state),
                Err(_) => self.reducer.state(),
            },
            _ = self.finished.cancelled() => self.reducer.state(),
        }
    }

    /// Metadata of a direct child.
    pub fn entry(&self, name: &str) -> Option<FileInfo> {
        self.reducer.state().entry(name).cloned()
    }

    /// Resolve a symlink chain starting at child `name`.
    pub fn target(&self, name: &str) -> Option<FileInfo> {
        self.reducer
            .state()
            .target(name)
            .map(|resolved| resolved.into_owned())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(path = %self.path, "Closing directory watch");
        self.cancel.cancel();
        if let Some(token) = self.channel_token.take() {
            token.cancel();
        }
        self.finished.cancel();
        self.reducer.clear();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DirectoryWatchSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(
    path: String,
    mut subscription: Subscription<Value>,
    reducer: SnapshotReducer,
    cancel: CancellationToken,
    finished: CancellationToken,
    closed: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = subscription.recv() => {
                let Some(message) = message else {
                    debug!(path = %path, "Directory channel closed");
                    break;
                };
                if closed.load(Ordering::Acquire) {
                    debug!(path = %path, "Discarding message received after close");
                    break;
                }
                if !message.is_object() {
                    warn!(path = %path, "Ignoring non-object directory message");
                    continue;
                }
                reducer.apply(&message);
            }
        }
    }
    subscription.close();
    finished.cancel();
}

/// One-shot metadata query: subscribe without watching and return the first
/// consistent `info`.
pub async fn fsinfo_once(
    channel: &dyn DirectoryChannel,
    path: &str,
    attrs: &[&str],
    superuser: Superuser,
) -> Result<FileInfo, FileError> {
    let request = WatchRequest {
        path: path.to_string(),
        attrs: attrs.iter().map(|a| a.to_string()).collect(),
        watch: false,
        superuser,
    };
    let mut subscription = channel.subscribe(request).await?;
    let reducer = SnapshotReducer::new();

    while let Some(message) = subscription.recv().await {
        if !reducer.apply(&message) {
            continue;
        }
        let state = reducer.state();
        if let Some(error) = &state.error {
            return Err(fs_error_to_file_error(path, error));
        }
        if let Some(info) = &state.info {
            return Ok(info.clone());
        }
    }

    Err(FileError::OperationFailed(format!(
        "No information received for {path}"
    )))
}
