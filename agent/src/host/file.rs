//! File content channel on the local filesystem.
//!
//! Writes never modify the target in place: content goes to a temporary
//! sibling which is renamed over the target once complete.

use std::fs::Metadata;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use filedeck_core::config::ChannelConfig;
use filedeck_core::errors::FileError;
use filedeck_core::host::{
    FileChannel, FileContents, FileWriter, ReadOptions, Subscription, Superuser, MISSING_TAG,
};

use super::{blocking, map_io_error};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Version tag of a file: `1:<inode>-<mtime ns>-<size>`.
#[cfg(unix)]
pub(crate) fn tag_of(meta: &Metadata) -> String {
    use std::os::unix::fs::MetadataExt;

    let mtime_ns = meta.mtime() as i128 * 1_000_000_000 + meta.mtime_nsec() as i128;
    format!("1:{}-{}-{}", meta.ino(), mtime_ns, meta.size())
}

#[cfg(not(unix))]
pub(crate) fn tag_of(meta: &Metadata) -> String {
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    format!("1:0-{}-{}", mtime_ns, meta.len())
}

/// Tag of the file at `path`, [`MISSING_TAG`] when it does not exist.
fn current_tag(path: &Path) -> Result<String, FileError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(tag_of(&meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MISSING_TAG.to_string()),
        Err(e) => Err(map_io_error(e, &path.to_string_lossy())),
    }
}

fn check_tag(path: &Path, expected: Option<&str>) -> Result<(), FileError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = current_tag(path)?;
    if actual == expected {
        Ok(())
    } else {
        debug!(path = %path.display(), expected, %actual, "Tag mismatch");
        Err(FileError::Conflict(path.to_string_lossy().into_owned()))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}-{unique}.filedeck", std::process::id()))
}

/// Give `temp` the permissions of the file it replaces, then rename it over.
/// The expected tag is checked again right before the rename.
fn commit(temp: &Path, path: &Path, expected: Option<&str>) -> Result<String, FileError> {
    check_tag(path, expected)?;
    let display = path.to_string_lossy();
    if let Ok(existing) = std::fs::metadata(path) {
        std::fs::set_permissions(temp, existing.permissions())
            .map_err(|e| map_io_error(e, &display))?;
    }
    std::fs::rename(temp, path).map_err(|e| map_io_error(e, &display))?;
    let meta = std::fs::metadata(path).map_err(|e| map_io_error(e, &display))?;
    Ok(tag_of(&meta))
}

#[cfg(target_os = "linux")]
fn selinux_sync(path: &Path) -> Result<Option<String>, FileError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const SELINUX_XATTR: &[u8] = b"security.selinux\0";
    /// Largest value an extended attribute can hold.
    const XATTR_SIZE_MAX: usize = 64 * 1024;

    if !Path::new("/sys/fs/selinux").exists() {
        return Ok(None);
    }
    let display = path.to_string_lossy();
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FileError::OperationFailed(format!("{display}: path contains NUL")))?;

    let mut buf = vec![0u8; 256];
    let len = loop {
        // SAFETY: both strings are NUL-terminated and `buf` is writable for
        // `buf.len()` bytes.
        let n = unsafe {
            libc::lgetxattr(
                c_path.as_ptr(),
                SELINUX_XATTR.as_ptr().cast(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if n >= 0 {
            break n as usize;
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ERANGE) if buf.len() < XATTR_SIZE_MAX => buf.resize(XATTR_SIZE_MAX, 0),
            Some(libc::ENODATA) | Some(libc::ENOTSUP) => return Ok(None),
            _ => return Err(map_io_error(err, &display)),
        }
    };
    buf.truncate(len);

    let context = String::from_utf8(buf)
        .map_err(|_| FileError::OperationFailed(format!("{display}: undecodable SELinux context")))?;
    Ok(Some(context.trim_end_matches('\0').to_string()))
}

#[cfg(not(target_os = "linux"))]
fn selinux_sync(_path: &Path) -> Result<Option<String>, FileError> {
    Ok(None)
}

fn read_sync(path: &Path, max_read_size: Option<u64>) -> Result<FileContents, FileError> {
    let display = path.to_string_lossy();
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileContents {
                content: None,
                tag: MISSING_TAG.to_string(),
            })
        }
        Err(e) => return Err(map_io_error(e, &display)),
    };
    let meta = file.metadata().map_err(|e| map_io_error(e, &display))?;
    if let Some(max) = max_read_size {
        if meta.len() > max {
            return Err(FileError::TooLarge(display.into_owned()));
        }
    }

    let mut bytes = Vec::with_capacity(meta.len() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| map_io_error(e, &display))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| FileError::OperationFailed(format!("{display}: not a text file")))?;
    Ok(FileContents {
        content: Some(content),
        tag: tag_of(&meta),
    })
}

fn replace_sync(path: &Path, content: Option<&str>, expected: Option<&str>) -> Result<String, FileError> {
    check_tag(path, expected)?;
    let display = path.to_string_lossy();

    let Some(content) = content else {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(map_io_error(e, &display)),
        }
        return Ok(MISSING_TAG.to_string());
    };

    let temp = temp_path(path);
    if let Err(e) = std::fs::write(&temp, content) {
        let _ = std::fs::remove_file(&temp);
        return Err(map_io_error(e, &display));
    }
    commit(&temp, path, expected).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp);
    })
}

/// File channel reading and writing the local filesystem as the agent's
/// own user. Elevation is only available for commands.
pub struct LocalFileChannel {
    config: ChannelConfig,
}

impl LocalFileChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

fn note_superuser(path: &str, superuser: Superuser) {
    if superuser == Superuser::Require {
        debug!(path, "File channel runs unelevated");
    }
}

#[async_trait]
impl FileChannel for LocalFileChannel {
    async fn read(&self, path: &str, options: ReadOptions) -> Result<FileContents, FileError> {
        note_superuser(path, options.superuser);
        let path = PathBuf::from(path);
        blocking(move || read_sync(&path, options.max_read_size)).await
    }

    async fn replace(
        &self,
        path: &str,
        content: Option<&str>,
        expected_tag: Option<&str>,
        superuser: Superuser,
    ) -> Result<String, FileError> {
        note_superuser(path, superuser);
        let path = PathBuf::from(path);
        let content = content.map(str::to_string);
        let expected = expected_tag.map(str::to_string);
        let tag = blocking(move || replace_sync(&path, content.as_deref(), expected.as_deref())).await?;
        debug!(%tag, "File replaced");
        Ok(tag)
    }

    async fn open_writer(
        &self,
        path: &str,
        expected_tag: Option<&str>,
        superuser: Superuser,
    ) -> Result<Box<dyn FileWriter>, FileError> {
        note_superuser(path, superuser);
        let target = PathBuf::from(path);
        let expected = expected_tag.map(str::to_string);

        let check = target.clone();
        let guard = expected.clone();
        blocking(move || check_tag(&check, guard.as_deref())).await?;

        let temp = temp_path(&target);
        let file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| map_io_error(e, path))?;
        Ok(Box::new(LocalWriter {
            target,
            temp,
            expected,
            file,
        }))
    }

    async fn watch(&self, path: &str, superuser: Superuser) -> Result<Subscription<String>, FileError> {
        note_superuser(path, superuser);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        tokio::spawn(poll_tag(PathBuf::from(path), interval, tx, cancel.clone()));
        Ok(Subscription::new(rx, cancel))
    }

    async fn selinux_context(&self, path: &str) -> Result<Option<String>, FileError> {
        let path = PathBuf::from(path);
        blocking(move || selinux_sync(&path)).await
    }
}

async fn poll_tag(path: PathBuf, interval: Duration, tx: mpsc::Sender<String>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    let mut last: Option<String> = None;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let probe = path.clone();
        let tag = match blocking(move || current_tag(&probe)).await {
            Ok(tag) => tag,
            Err(e) => {
                warn!(path = %path.display(), "Cannot stat watched file: {e}");
                continue;
            }
        };
        if last.as_deref() == Some(tag.as_str()) {
            continue;
        }
        last = Some(tag.clone());
        if tx.send(tag).await.is_err() {
            break;
        }
    }
}

/// Streaming write into a temporary sibling of the target.
struct LocalWriter {
    target: PathBuf,
    temp: PathBuf,
    expected: Option<String>,
    file: tokio::fs::File,
}

#[async_trait]
impl FileWriter for LocalWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), FileError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| map_io_error(e, &self.target.to_string_lossy()))
    }

    async fn finish(self: Box<Self>) -> Result<String, FileError> {
        let LocalWriter {
            target,
            temp,
            expected,
            mut file,
        } = *self;
        let display_path = target.to_string_lossy().into_owned();

        let flushed = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = flushed {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(map_io_error(e, &display_path));
        }

        let committed = blocking(move || {
            commit(&temp, &target, expected.as_deref())
                .inspect_err(|_| {
                    let _ = std::fs::remove_file(&temp);
                })
        })
        .await?;
        debug!(path = %display_path, tag = %committed, "Streamed write committed");
        Ok(committed)
    }

    async fn abort(self: Box<Self>) {
        let LocalWriter { temp, file, .. } = *self;
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!(path = %temp.display(), "Cannot remove aborted upload: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> LocalFileChannel {
        LocalFileChannel::new(ChannelConfig {
            poll_interval_ms: 20,
            ..ChannelConfig::default()
        })
    }

    fn p(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn missing_file_reads_as_missing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let contents = channel()
            .read(&p(&dir.path().join("nope")), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(contents.content, None);
        assert_eq!(contents.tag, MISSING_TAG);
    }

    #[test]
    fn commit_rechecks_tag_before_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "one\n").unwrap();
        let tag = current_tag(&path).unwrap();

        let temp = temp_path(&path);
        std::fs::write(&temp, "mine\n").unwrap();
        std::fs::write(&path, "someone else wrote this\n").unwrap();

        let err = commit(&temp, &path, Some(&tag)).unwrap_err();
        assert!(matches!(err, FileError::Conflict(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "someone else wrote this\n");
        assert!(temp.exists());

        let fresh = current_tag(&path).unwrap();
        commit(&temp, &path, Some(&fresh)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "mine\n");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn selinux_context_is_label_or_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labelled");
        std::fs::write(&path, "x").unwrap();

        let context = channel().selinux_context(&p(&path)).await.unwrap();
        if Path::new("/sys/fs/selinux").exists() {
            if let Some(context) = context {
                assert!(context.contains(':'));
                assert!(!context.ends_with('\0'));
            }
        } else {
            assert_eq!(context, None);
        }
    }

    #[tokio::test]
    async fn replace_guards_on_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = p(&dir.path().join("notes.txt"));
        let files = channel();

        let first = files
            .replace(&path, Some("one\n"), Some(MISSING_TAG), Superuser::None)
            .await
            .unwrap();
        assert!(first.starts_with("1:"));

        // The file exists now, so expecting it missing conflicts.
        let err = files
            .replace(&path, Some("two\n"), Some(MISSING_TAG), Superuser::None)
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Conflict(_)));

        let read = files.read(&path, ReadOptions::default()).await.unwrap();
        assert_eq!(read.content.as_deref(), Some("one\n"));
        assert_eq!(read.tag, first);

        files
            .replace(&path, Some("two\n"), Some(&first), Superuser::None)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two\n");

        // No temporary files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn replace_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        channel()
            .replace(&p(&path), Some("#!/bin/sh\necho hi\n"), None, Superuser::None)
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn remove_with_none_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        std::fs::write(&path, "x").unwrap();
        let tag = channel()
            .replace(&p(&path), None, None, Superuser::None)
            .await
            .unwrap();
        assert_eq!(tag, MISSING_TAG);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn read_respects_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        std::fs::write(&path, vec![b'a'; 64]).unwrap();
        let err = channel()
            .read(
                &p(&path),
                ReadOptions {
                    max_read_size: Some(10),
                    superuser: Superuser::None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::TooLarge(_)));
    }

    #[tokio::test]
    async fn streamed_write_commits_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let mut writer = channel()
            .open_writer(&p(&path), Some(MISSING_TAG), Superuser::None)
            .await
            .unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert!(!path.exists());

        let tag = writer.finish().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");
        assert_eq!(current_tag(&path).unwrap(), tag);
    }

    #[tokio::test]
    async fn streamed_write_detects_late_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.txt");
        let mut writer = channel()
            .open_writer(&p(&path), Some(MISSING_TAG), Superuser::None)
            .await
            .unwrap();
        writer.write(b"mine").await.unwrap();
        std::fs::write(&path, "theirs").unwrap();

        let err = writer.finish().await.unwrap_err();
        assert!(matches!(err, FileError::Conflict(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "theirs");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn aborted_write_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial");
        let mut writer = channel()
            .open_writer(&p(&path), None, Superuser::None)
            .await
            .unwrap();
        writer.write(b"half").await.unwrap();
        writer.abort().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn watch_reports_tag_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        std::fs::write(&path, "a").unwrap();

        let mut sub = channel().watch(&p(&path), Superuser::None).await.unwrap();
        let initial = sub.recv().await.unwrap();
        assert_eq!(initial, current_tag(&path).unwrap());

        std::fs::remove_file(&path).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, MISSING_TAG);
        sub.close();
    }
}
