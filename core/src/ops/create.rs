use tracing::{debug, info};

use super::{Coordinator, CurrentDir};
use crate::errors::{FileError, OpError};
use crate::files::names::check_filename;
use crate::host::{argv, Superuser, MISSING_TAG};
use crate::sync::fsinfo_once;

/// A new regular file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFile {
    pub name: String,
    /// Initial content; empty when `None`.
    pub content: Option<String>,
    /// `user:group` to hand the file to. Needs elevated privileges.
    pub owner: Option<String>,
}

impl CreateFile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Coordinator {
    /// Create a directory, optionally owned by `owner`.
    ///
    /// With an owner, `mkdir` and `chown` both require elevation; without
    /// one, a single unprivileged `mkdir` is issued.
    pub async fn create_directory(
        &self,
        cwd: &CurrentDir,
        name: &str,
        owner: Option<&str>,
    ) -> Result<(), OpError> {
        check_filename(name, &cwd.entries(), None)?;
        let path = cwd.child(name);

        match owner {
            Some(owner) => {
                self.exec(argv(["mkdir", path.as_str()]), Superuser::Require)
                    .await?;
                // A failed chown leaves the directory in place, owned by root.
                self.exec(argv(["chown", owner, path.as_str()]), Superuser::Require)
                    .await?;
            }
            None => {
                self.exec(argv(["mkdir", path.as_str()]), Superuser::None)
                    .await?;
            }
        }

        info!(path = %path, owner = ?owner, "Created directory");
        Ok(())
    }

    /// Create a regular file.
    ///
    /// The file is first created empty and unowned-by-request, then handed
    /// to `owner`, then filled with `content`. If either later step fails
    /// the file is removed again.
    pub async fn create_file(&self, cwd: &CurrentDir, request: &CreateFile) -> Result<(), OpError> {
        check_filename(&request.name, &cwd.entries(), None)?;
        let path = cwd.child(&request.name);

        if !self.privileges.superuser_allowed {
            self.probe_writable(&cwd.path).await?;
        }

        self.host
            .files
            .replace(&path, Some(""), Some(MISSING_TAG), Superuser::Try)
            .await?;
        debug!(path = %path, "Created empty file");

        if let Some(owner) = &request.owner {
            if let Err(e) = self
                .exec(argv(["chown", owner.as_str(), path.as_str()]), Superuser::Require)
                .await
            {
                return Err(self.remove_partial(e, &path).await);
            }
        }

        if let Some(content) = request.content.as_deref().filter(|c| !c.is_empty()) {
            if let Err(e) = self.fill(&path, content).await {
                return Err(self.remove_partial(e, &path).await);
            }
        }

        info!(path = %path, owner = ?request.owner, "Created file");
        Ok(())
    }

    async fn fill(&self, path: &str, content: &str) -> Result<(), FileError> {
        let info = fsinfo_once(self.host.directories.as_ref(), path, &["tag"], Superuser::Try).await?;
        let tag = info.tag.unwrap_or_else(|| MISSING_TAG.to_string());
        self.host
            .files
            .replace(path, Some(content), Some(&tag), Superuser::Try)
            .await?;
        Ok(())
    }

    async fn remove_partial(&self, primary: FileError, path: &str) -> OpError {
        self.compensate(primary, argv(["rm", path]), Superuser::Require)
            .await
    }

    async fn probe_writable(&self, dir: &str) -> Result<(), OpError> {
        match self.exec(argv(["test", "-w", dir]), Superuser::None).await {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(dir, "Directory not writable: {e}");
                Err(FileError::PermissionDenied("Cannot create file in current directory".into()).into())
            }
        }
    }
}
