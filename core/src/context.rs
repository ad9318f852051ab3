//! State shared by the views of one file-manager instance.
//!
//! A [`FilesContext`] is created by whoever hosts the file manager, handed
//! by `Arc` to the components that need it, and dropped with them. There is
//! no process-wide instance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::files::paths;

/// Names copied from one directory, pasted later into another.
///
/// Holds only names, never file handles; the sources may disappear before
/// the paste, which is checked at paste time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clipboard {
    /// Normalised `/dir/` path the names were copied from.
    pub source_dir: String,
    pub names: Vec<String>,
}

impl Clipboard {
    pub fn new(source_dir: &str, names: Vec<String>) -> Self {
        Self {
            source_dir: paths::normalize_dir_path(source_dir),
            names,
        }
    }

    /// Full source paths.
    pub fn paths(&self) -> Vec<String> {
        self.names
            .iter()
            .map(|name| format!("{}{}", self.source_dir, name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertVariant {
    Success,
    Info,
    Warning,
    Danger,
}

/// A user-facing notification produced at the operation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub key: String,
    pub title: String,
    pub variant: AlertVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Public view of an in-flight upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub bytes_sent: u64,
}

/// Registration of one in-flight upload. Uploads are tracked by `id`, so
/// files sharing a name stay distinct.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub id: String,
    pub cancel: CancellationToken,
}

struct PendingUpload {
    name: String,
    size: u64,
    bytes_sent: u64,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct FilesContext {
    clipboard: Mutex<Option<Clipboard>>,
    alerts: Mutex<Vec<Alert>>,
    uploads: Mutex<BTreeMap<String, PendingUpload>>,
    batch_running: AtomicBool,
}

impl FilesContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_clipboard(&self, clipboard: Clipboard) {
        debug!(
            source = %clipboard.source_dir,
            count = clipboard.names.len(),
            "Copied to clipboard"
        );
        *lock(&self.clipboard) = Some(clipboard);
    }

    pub fn clipboard(&self) -> Option<Clipboard> {
        lock(&self.clipboard).clone()
    }

    pub fn clear_clipboard(&self) {
        *lock(&self.clipboard) = None;
    }

    /// Queue an alert and return its key.
    pub fn add_alert(
        &self,
        title: impl Into<String>,
        variant: AlertVariant,
        detail: Option<String>,
    ) -> String {
        let key = Uuid::new_v4().to_string();
        lock(&self.alerts).push(Alert {
            key: key.clone(),
            title: title.into(),
            variant,
            detail,
        });
        key
    }

    pub fn remove_alert(&self, key: &str) {
        lock(&self.alerts).retain(|alert| alert.key != key);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }

    /// Register an upload.
    pub fn begin_upload(&self, name: &str, size: u64) -> UploadTicket {
        let ticket = UploadTicket {
            id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        };
        lock(&self.uploads).insert(
            ticket.id.clone(),
            PendingUpload {
                name: name.to_string(),
                size,
                bytes_sent: 0,
                cancel: ticket.cancel.clone(),
            },
        );
        ticket
    }

    pub fn update_upload(&self, id: &str, bytes_sent: u64) {
        if let Some(upload) = lock(&self.uploads).get_mut(id) {
            upload.bytes_sent = bytes_sent;
        }
    }

    /// Forget an upload, whatever its outcome.
    pub fn finish_upload(&self, id: &str) {
        lock(&self.uploads).remove(id);
    }

    /// Cancel an in-flight upload. Returns `false` if it is not running.
    pub fn cancel_upload(&self, id: &str) -> bool {
        match lock(&self.uploads).get(id) {
            Some(upload) => {
                upload.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pending_uploads(&self) -> Vec<UploadProgress> {
        lock(&self.uploads)
            .iter()
            .map(|(id, upload)| UploadProgress {
                id: id.clone(),
                name: upload.name.clone(),
                size: upload.size,
                bytes_sent: upload.bytes_sent,
            })
            .collect()
    }

    /// Claim the upload slot. Only one batch may run at a time; `None` if
    /// another batch holds it.
    pub fn try_begin_batch(self: &Arc<Self>) -> Option<BatchGuard> {
        self.batch_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BatchGuard {
                context: Arc::clone(self),
            })
    }

    pub fn batch_running(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }
}

/// Releases the upload slot when dropped.
pub struct BatchGuard {
    context: Arc<FilesContext>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.context.batch_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipboard_paths_are_normalised() {
        let ctx = FilesContext::new();
        assert!(ctx.clipboard().is_none());
        ctx.set_clipboard(Clipboard::new("/home/user", vec!["a".into(), "b c".into()]));
        let clipboard = ctx.clipboard().unwrap();
        assert_eq!(clipboard.paths(), vec!["/home/user/a", "/home/user/b c"]);
        ctx.clear_clipboard();
        assert!(ctx.clipboard().is_none());
    }

    #[test]
    fn alerts_have_unique_keys() {
        let ctx = FilesContext::new();
        let first = ctx.add_alert("Failed", AlertVariant::Danger, Some("boom".into()));
        let second = ctx.add_alert("Done", AlertVariant::Success, None);
        assert_ne!(first, second);
        assert_eq!(ctx.alerts().len(), 2);

        ctx.remove_alert(&first);
        let alerts = ctx.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Done");
    }

    #[test]
    fn upload_registry() {
        let ctx = FilesContext::new();
        let ticket = ctx.begin_upload("big.iso", 100);
        ctx.update_upload(&ticket.id, 40);
        assert_eq!(
            ctx.pending_uploads(),
            vec![UploadProgress {
                id: ticket.id.clone(),
                name: "big.iso".into(),
                size: 100,
                bytes_sent: 40
            }]
        );

        assert!(ctx.cancel_upload(&ticket.id));
        assert!(ticket.cancel.is_cancelled());
        assert!(!ctx.cancel_upload("big.iso"));

        ctx.finish_upload(&ticket.id);
        assert!(ctx.pending_uploads().is_empty());
    }

    #[test]
    fn uploads_sharing_a_name_are_tracked_apart() {
        let ctx = FilesContext::new();
        let first = ctx.begin_upload("report.pdf", 10);
        let second = ctx.begin_upload("report.pdf", 20);
        assert_ne!(first.id, second.id);
        assert_eq!(ctx.pending_uploads().len(), 2);

        assert!(ctx.cancel_upload(&second.id));
        assert!(second.cancel.is_cancelled());
        assert!(!first.cancel.is_cancelled());

        ctx.finish_upload(&second.id);
        let pending = ctx.pending_uploads();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[0].size, 10);
    }

    #[test]
    fn one_batch_at_a_time() {
        let ctx = FilesContext::new();
        let guard = ctx.try_begin_batch().unwrap();
        assert!(ctx.batch_running());
        assert!(ctx.try_begin_batch().is_none());
        drop(guard);
        assert!(!ctx.batch_running());
        assert!(ctx.try_begin_batch().is_some());
    }
}
