use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Coordinator, CurrentDir};
use crate::context::{AlertVariant, UploadTicket};
use crate::errors::{FileError, OpError, ValidationError};
use crate::files::mode::short_str;
use crate::files::FileInfo;
use crate::host::{argv, Superuser};
use crate::sync::fsinfo_once;
use crate::timing::Throttle;

/// Minimum time between two progress updates of one file.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// A local file to upload.
pub struct UploadSource {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadSource {
    pub fn new(name: impl Into<String>, size: u64, reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            name: name.into(),
            size,
            modified: None,
            reader,
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::new(name, size, Box::new(std::io::Cursor::new(data)))
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSource")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// An upload whose name is already taken in the destination.
#[derive(Debug)]
pub struct Conflict<'a> {
    pub directory: &'a str,
    pub name: &'a str,
    pub new_size: u64,
    pub new_modified: Option<SystemTime>,
    pub existing: &'a FileInfo,
    /// More than one file is being uploaded; only then is skipping offered.
    pub multi: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Replace,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub action: ConflictAction,
    /// Use the same action for the remaining conflicts of the batch.
    pub apply_to_all: bool,
}

/// Asks the user what to do about a name collision.
#[async_trait]
pub trait ConflictResolver: Send {
    /// `None` cancels the whole batch before anything is uploaded.
    async fn resolve(&mut self, conflict: &Conflict<'_>) -> Option<Resolution>;
}

/// A fixed answer, for non-interactive callers.
#[async_trait]
impl ConflictResolver for Resolution {
    async fn resolve(&mut self, _conflict: &Conflict<'_>) -> Option<Resolution> {
        Some(*self)
    }
}

/// What happened to each file of a batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub cancelled: Vec<String>,
    pub failed: Vec<(String, FileError)>,
    /// Owner the files were handed to, when uploading with privileges.
    pub owner: Option<String>,
    /// Modes of the uploaded files, in upload order, when an owner was set.
    pub modes: Vec<u32>,
    /// The batch was cancelled at a conflict prompt; nothing was uploaded.
    pub batch_cancelled: bool,
}

enum FileOutcome {
    Uploaded(Option<u32>),
    Cancelled,
    Failed(FileError),
}

fn summary_detail(report: &UploadReport) -> String {
    let mut detail = match report.uploaded.as_slice() {
        [one] => one.clone(),
        many => format!("{} files", many.len()),
    };
    if let (Some(owner), Some(mode)) = (&report.owner, report.modes.first()) {
        detail.push('\n');
        detail.push_str(&format!("Uploaded as {owner}, {}", short_str(*mode)));
    }
    detail
}

impl Coordinator {
    /// Upload `files` into `cwd`.
    ///
    /// Name collisions are resolved one by one through `resolver` before
    /// any transfer starts. The transfers then run concurrently, each with
    /// its own cancellation token registered in the context. With elevated
    /// privileges every file is written to a hidden temporary file that is
    /// handed to the directory's default owner first, then moved into place.
    pub async fn upload(
        &self,
        cwd: &CurrentDir,
        files: Vec<UploadSource>,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<UploadReport, OpError> {
        let _batch = self
            .context
            .try_begin_batch()
            .ok_or(ValidationError::UploadInProgress)?;
        let owner = self.default_owner(cwd.info()?);
        let mut report = UploadReport {
            owner: owner.clone(),
            ..UploadReport::default()
        };

        let multi = files.len() > 1;
        let mut replace_all = false;
        let mut skip_all = false;
        let mut queue = Vec::with_capacity(files.len());
        {
            let entries = cwd.entries();
            for source in files {
                let existing = match entries.get(&source.name) {
                    Some(existing) if !replace_all => existing,
                    _ => {
                        queue.push(source);
                        continue;
                    }
                };
                if skip_all {
                    report.skipped.push(source.name);
                    continue;
                }

                let conflict = Conflict {
                    directory: &cwd.path,
                    name: &source.name,
                    new_size: source.size,
                    new_modified: source.modified,
                    existing,
                    multi,
                };
                let Some(resolution) = resolver.resolve(&conflict).await else {
                    info!(dir = %cwd.path, "Upload cancelled at conflict prompt");
                    report.batch_cancelled = true;
                    return Ok(report);
                };
                match resolution.action {
                    ConflictAction::Skip => {
                        skip_all = resolution.apply_to_all;
                        report.skipped.push(source.name);
                    }
                    ConflictAction::Replace => {
                        replace_all = resolution.apply_to_all;
                        queue.push(source);
                    }
                }
            }
        }

        if queue.is_empty() {
            return Ok(report);
        }

        let names: Vec<String> = queue.iter().map(|s| s.name.clone()).collect();
        let outcomes = join_all(
            queue
                .into_iter()
                .map(|source| self.upload_one(cwd, source, owner.as_deref())),
        )
        .await;

        for (name, outcome) in names.into_iter().zip(outcomes) {
            match outcome {
                FileOutcome::Uploaded(mode) => {
                    report.modes.extend(mode);
                    report.uploaded.push(name);
                }
                FileOutcome::Cancelled => report.cancelled.push(name),
                FileOutcome::Failed(e) => report.failed.push((name, e)),
            }
        }

        if !report.uploaded.is_empty() {
            let title = if report.uploaded.len() == 1 {
                "File uploaded"
            } else {
                "Files uploaded"
            };
            self.context
                .add_alert(title, AlertVariant::Success, Some(summary_detail(&report)));
        }
        info!(
            dir = %cwd.path,
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "Upload batch finished"
        );
        Ok(report)
    }

    async fn upload_one(&self, cwd: &CurrentDir, source: UploadSource, owner: Option<&str>) -> FileOutcome {
        let name = source.name.clone();
        let ticket = self.context.begin_upload(&name, source.size);
        let outcome = self.transfer(cwd, source, owner, &ticket).await;
        self.context.finish_upload(&ticket.id);
        outcome
    }

    async fn transfer(
        &self,
        cwd: &CurrentDir,
        source: UploadSource,
        owner: Option<&str>,
        ticket: &UploadTicket,
    ) -> FileOutcome {
        let name = source.name.clone();
        let final_path = cwd.child(&name);

        let (destination, tag, mode) = match owner {
            Some(owner) => {
                let tmp = cwd.child(&format!(".{name}.tmp"));
                match self.prepare_owned(&tmp, owner).await {
                    Ok((tag, mode)) => (tmp, Some(tag), Some(mode)),
                    Err(e) => {
                        warn!(path = %tmp, "Cannot set initial file permissions: {e}");
                        self.context
                            .add_alert("Failed", AlertVariant::Warning, Some(e.to_string()));
                        self.remove_temporary(&tmp).await;
                        return FileOutcome::Failed(e);
                    }
                }
            }
            None => (final_path.clone(), None, None),
        };

        let superuser = if owner.is_some() {
            Superuser::Try
        } else {
            Superuser::None
        };
        if let Err(e) = self
            .stream(&destination, tag.as_deref(), superuser, source, ticket)
            .await
        {
            if owner.is_some() {
                self.remove_temporary(&destination).await;
            }
            if e.is_cancelled() {
                self.context.add_alert(
                    "Cancelled",
                    AlertVariant::Warning,
                    Some(format!("Cancelled upload of {name}")),
                );
                return FileOutcome::Cancelled;
            }
            self.context
                .add_alert("Upload error", AlertVariant::Danger, Some(e.user_message()));
            return FileOutcome::Failed(e);
        }

        if owner.is_some() {
            if let Err(e) = self
                .exec(argv(["mv", destination.as_str(), final_path.as_str()]), Superuser::Require)
                .await
            {
                warn!(path = %destination, "Unable to move file to final destination: {e}");
                self.context.add_alert(
                    "Upload error",
                    AlertVariant::Danger,
                    Some("Unable to move uploaded file to final destination".into()),
                );
                self.remove_temporary(&destination).await;
                return FileOutcome::Failed(e);
            }
        }

        debug!(path = %final_path, "Uploaded");
        FileOutcome::Uploaded(mode)
    }

    /// Create the empty temporary file, hand it to `owner` and report the
    /// tag to write against and the resulting mode.
    async fn prepare_owned(&self, tmp: &str, owner: &str) -> Result<(String, u32), FileError> {
        self.host
            .files
            .replace(tmp, Some(""), None, Superuser::Try)
            .await?;
        self.exec(argv(["chown", owner, tmp]), Superuser::Try).await?;
        let tag = fsinfo_once(self.host.directories.as_ref(), tmp, &["tag"], Superuser::Try)
            .await?
            .tag
            .ok_or_else(|| FileError::OperationFailed(format!("No tag reported for {tmp}")))?;
        let stat = self
            .exec(argv(["stat", "--format", "%a", tmp]), Superuser::Try)
            .await?;
        let mode = u32::from_str_radix(stat.trim_end(), 8)
            .map_err(|_| FileError::OperationFailed(format!("Unexpected mode {:?}", stat.trim_end())))?;
        Ok((tag, mode))
    }

    async fn stream(
        &self,
        destination: &str,
        tag: Option<&str>,
        superuser: Superuser,
        mut source: UploadSource,
        ticket: &UploadTicket,
    ) -> Result<(), FileError> {
        let mut writer = self
            .host
            .files
            .open_writer(destination, tag, superuser)
            .await?;
        let mut buffer = vec![0u8; self.config.upload_chunk_size.max(1)];
        let mut sent = 0u64;
        let mut throttle = Throttle::new(PROGRESS_INTERVAL);

        loop {
            let read = tokio::select! {
                biased;
                _ = ticket.cancel.cancelled() => {
                    writer.abort().await;
                    return Err(FileError::Cancelled);
                }
                read = source.reader.read(&mut buffer) => read,
            };
            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    writer.abort().await;
                    return Err(e.into());
                }
            };
            if let Err(e) = writer.write(&buffer[..n]).await {
                writer.abort().await;
                return Err(e);
            }
            sent += n as u64;
            if throttle.ready(Instant::now()) {
                self.context.update_upload(&ticket.id, sent);
            }
        }

        if ticket.cancel.is_cancelled() {
            writer.abort().await;
            return Err(FileError::Cancelled);
        }
        writer.finish().await?;
        Ok(())
    }

    async fn remove_temporary(&self, path: &str) {
        if let Err(e) = self
            .host
            .files
            .replace(path, None, None, Superuser::Require)
            .await
        {
            warn!(path, "Unable to clean up file: {e}");
        }
    }
}
