//! Host services backed by the local machine.
//!
//! - [`exec::LocalCommandRunner`] spawns processes, elevating through
//!   non-interactive `sudo` when asked to.
//! - [`fsinfo::LocalDirectoryChannel`] polls a directory and emits merge
//!   patches between consecutive listings.
//! - [`file::LocalFileChannel`] reads and atomically replaces files, guarded
//!   by a tag derived from inode, mtime and size.

pub mod exec;
pub mod file;
pub mod fsinfo;

use filedeck_core::errors::FileError;
use filedeck_core::files::ownership::UserIdentity;

pub use exec::LocalCommandRunner;
pub use file::LocalFileChannel;
pub use fsinfo::LocalDirectoryChannel;

/// Map `std::io::Error` to `FileError` based on error kind.
pub(crate) fn map_io_error(e: std::io::Error, path: &str) -> FileError {
    match e.kind() {
        std::io::ErrorKind::NotFound => FileError::NotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => {
            FileError::PermissionDenied(format!("{path}: {e}"))
        }
        _ => FileError::OperationFailed(format!("{path}: {e}")),
    }
}

/// Run blocking filesystem work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, FileError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FileError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| FileError::OperationFailed(e.to_string()))?
}

/// The account this process runs as.
#[cfg(unix)]
pub fn current_identity() -> UserIdentity {
    use nix::unistd::{Gid, Group, Uid, User};

    let uid = Uid::current();
    let gid = Gid::current();
    let name = User::from_uid(uid)
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| uid.to_string());
    let group = Group::from_gid(gid)
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| gid.to_string());
    UserIdentity::new(name, group)
}

#[cfg(not(unix))]
pub fn current_identity() -> UserIdentity {
    let name = std::env::var("USERNAME").unwrap_or_else(|_| "user".to_string());
    UserIdentity::new(name.clone(), name)
}
