use std::borrow::Cow;

use tracing::info;

use super::{Coordinator, CurrentDir};
use crate::errors::OpError;
use crate::files::names::check_link_name;
use crate::files::ownership::owner_candidates;
use crate::files::paths::dirname;
use crate::files::FileInfo;
use crate::host::{argv, Superuser};
use crate::sync::fsinfo_once;

/// How the link stores its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkMode {
    Absolute,
    #[default]
    Relative,
}

/// A link to an entry of the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkRequest {
    /// Entry of the current directory the link points to.
    pub target: String,
    /// Link name, relative to the current directory or absolute.
    pub link_name: String,
    pub mode: LinkMode,
}

impl SymlinkRequest {
    /// A relative link named "link to <target>".
    pub fn to(target: &str) -> Self {
        Self {
            target: target.to_string(),
            link_name: format!("link to {target}"),
            mode: LinkMode::default(),
        }
    }
}

impl Coordinator {
    /// Create a symbolic link.
    ///
    /// With elevated privileges the link is created as root and handed to
    /// the owner the link's directory would give a new item.
    pub async fn create_symlink(&self, cwd: &CurrentDir, request: &SymlinkRequest) -> Result<(), OpError> {
        check_link_name(&request.link_name, &cwd.entries())?;
        let dir_info = cwd.info()?;
        let target = cwd.child(&request.target);

        let link_path = if request.link_name.starts_with('/') {
            request.link_name.clone()
        } else {
            let joined = cwd.child(&request.link_name);
            self.exec(argv(["realpath", joined.as_str()]), Superuser::Try)
                .await?
                .trim()
                .to_string()
        };

        let folder: Cow<'_, FileInfo> =
            if request.link_name.starts_with('/') || request.link_name.starts_with("..") {
                let parent = dirname(&link_path);
                Cow::Owned(
                    fsinfo_once(
                        self.host.directories.as_ref(),
                        &parent,
                        &["user", "group", "mode"],
                        Superuser::Try,
                    )
                    .await?,
                )
            } else {
                Cow::Borrowed(dir_info)
            };

        let owner = if self.privileges.superuser_allowed {
            owner_candidates(&folder, &self.privileges.user).into_iter().next()
        } else {
            None
        };

        let mut args = argv(["ln", "--symbolic", "--no-target-directory"]);
        if request.mode == LinkMode::Relative {
            args.push("--relative".into());
        }
        args.push(target.clone());
        args.push(link_path.clone());

        let superuser = if owner.is_some() {
            Superuser::Require
        } else {
            Superuser::None
        };
        self.exec_in(args, &cwd.path, superuser).await?;

        if let Some(owner) = &owner {
            self.exec_in(
                argv(["chown", "--no-dereference", owner.as_str(), request.link_name.as_str()]),
                &cwd.path,
                Superuser::Require,
            )
            .await?;
        }

        info!(target = %target, link = %link_path, owner = ?owner, "Created symlink");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::errors::ValidationError;
    use serde_json::json;

    fn dir() -> CurrentDir {
        cwd(json!({"a.txt": {"type": "reg"}, "docs": {"type": "dir"}}))
    }

    #[test]
    fn default_request() {
        let request = SymlinkRequest::to("a.txt");
        assert_eq!(request.link_name, "link to a.txt");
        assert_eq!(request.mode, LinkMode::Relative);
    }

    #[tokio::test]
    async fn relative_link_in_current_directory() {
        let mock = MockHost::new();
        mock.output("realpath", "/home/alice/link to a.txt\n");
        let coord = coordinator(&mock, false);

        coord
            .create_symlink(&dir(), &SymlinkRequest::to("a.txt"))
            .await
            .unwrap();

        let calls = mock.calls.lock().unwrap().clone();
        assert_eq!(calls[0].argv, vec!["realpath", "/home/alice/link to a.txt"]);
        assert_eq!(
            calls[1].argv,
            vec![
                "ln",
                "--symbolic",
                "--no-target-directory",
                "--relative",
                "/home/alice/a.txt",
                "/home/alice/link to a.txt"
            ]
        );
        assert_eq!(calls[1].options.directory.as_deref(), Some("/home/alice/"));
        assert_eq!(calls[1].options.superuser, Superuser::None);
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn admin_link_is_chowned() {
        let mock = MockHost::new();
        let coord = coordinator(&mock, true);
        let request = SymlinkRequest {
            target: "a.txt".into(),
            link_name: "/srv/a".into(),
            mode: LinkMode::Absolute,
        };
        mock.set_fsinfo(
            "/srv",
            json!({"type": "dir", "user": "root", "group": "www", "mode": 0o2775}),
        );

        coord.create_symlink(&dir(), &request).await.unwrap();

        let calls = mock.calls.lock().unwrap().clone();
        assert_eq!(
            calls[0].argv,
            vec!["ln", "--symbolic", "--no-target-directory", "/home/alice/a.txt", "/srv/a"]
        );
        assert_eq!(calls[0].options.superuser, Superuser::Require);
        assert_eq!(
            calls[1].argv,
            vec!["chown", "--no-dereference", "root:www", "/srv/a"]
        );
        assert_eq!(calls[1].options.superuser, Superuser::Require);
    }

    #[tokio::test]
    async fn existing_name_is_rejected() {
        let mock = MockHost::new();
        let coord = coordinator(&mock, false);
        let request = SymlinkRequest {
            link_name: "docs".into(),
            ..SymlinkRequest::to("a.txt")
        };
        let err = coord.create_symlink(&dir(), &request).await.unwrap_err();
        assert!(matches!(err, OpError::Validation(ValidationError::DirectoryExists)));
        assert!(mock.calls.lock().unwrap().is_empty());
    }
}
