use tracing::{debug, info};

use super::{Coordinator, CurrentDir};
use crate::context::Clipboard;
use crate::errors::{FileError, OpError, ValidationError};
use crate::files::ownership::display_owner;
use crate::files::FileInfo;
use crate::host::{argv, Superuser};
use crate::sync::fsinfo_once;

const SOURCE_ATTRS: [&str; 4] = ["type", "user", "group", "entries"];

/// Owner to give pasted files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerChoice {
    /// Keep whatever ownership `cp --archive` preserved.
    Original,
    /// `user:group`.
    Owner(String),
}

/// One entry of the "paste as owner" choice, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerOption {
    pub label: String,
    pub choice: OwnerChoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasteOutcome {
    Pasted,
    /// The unprivileged copy failed and elevated privileges are available:
    /// the user may retry with [`Coordinator::paste_as_owner`].
    NeedsOwner(Vec<OwnerOption>),
}

fn collisions(clipboard: &Clipboard, cwd: &CurrentDir) -> Vec<String> {
    let entries = cwd.entries();
    clipboard
        .names
        .iter()
        .filter(|name| entries.contains_key(name.as_str()))
        .cloned()
        .collect()
}

/// Distinct owners of `files`, rendered compactly, in first-seen order.
fn unique_owners(files: &[FileInfo]) -> Vec<String> {
    let mut owners: Vec<String> = Vec::new();
    for file in files {
        let spec = file.owner_spec().unwrap_or_default();
        let shown = display_owner(&spec);
        if !owners.contains(&shown) {
            owners.push(shown);
        }
    }
    owners
}

/// Ownership choices for pasting `files` into a directory whose candidates
/// are `candidates`.
///
/// When all files share one owner, that owner is offered too (marked as
/// the original owner). Mixed ownership adds a "keep original owners"
/// choice instead.
pub fn owner_options(mut candidates: Vec<String>, files: &[FileInfo]) -> Vec<OwnerOption> {
    let owners = unique_owners(files);
    let original = match owners.as_slice() {
        [_] => files.first().and_then(FileInfo::owner_spec),
        _ => None,
    };
    if let Some(original) = &original {
        if !candidates.contains(original) {
            candidates.push(original.clone());
        }
    }

    let mut options: Vec<OwnerOption> = candidates
        .into_iter()
        .map(|owner| {
            let mut label = display_owner(&owner);
            if original.as_ref() == Some(&owner) {
                label.push_str(" (original owner)");
            }
            OwnerOption {
                label,
                choice: OwnerChoice::Owner(owner),
            }
        })
        .collect();

    if owners.len() > 1 {
        let dots = if owners.len() > 2 { ", ..." } else { "" };
        options.push(OwnerOption {
            label: format!("keep original owners ({}{dots})", owners[..2].join(", ")),
            choice: OwnerChoice::Original,
        });
    }
    options
}

impl Coordinator {
    /// Copy the clipboard into `cwd`.
    ///
    /// Any name that already exists in `cwd` aborts the whole paste before
    /// anything is copied, as does any name that has disappeared from the
    /// source directory since it was copied.
    pub async fn paste(&self, cwd: &CurrentDir) -> Result<PasteOutcome, OpError> {
        let clipboard = self
            .context
            .clipboard()
            .filter(|c| !c.is_empty())
            .ok_or(ValidationError::EmptyClipboard)?;

        let existing = collisions(&clipboard, cwd);
        if !existing.is_empty() {
            return Err(ValidationError::PasteCollision(existing).into());
        }
        let sources = self.source_entries(&clipboard).await?;

        let mut args = argv(["cp", "--archive"]);
        args.extend(clipboard.paths());
        args.push(cwd.path.clone());

        match self.exec(args, Superuser::None).await {
            Ok(_) => {
                info!(from = %clipboard.source_dir, to = %cwd.path, count = clipboard.names.len(), "Pasted");
                Ok(PasteOutcome::Pasted)
            }
            Err(e) if self.privileges.superuser_allowed => {
                debug!("Unprivileged copy failed, offering paste as owner: {e}");
                let candidates = self.owner_candidates(cwd.info()?);
                Ok(PasteOutcome::NeedsOwner(owner_options(candidates, &sources)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Copy the clipboard into `cwd` with elevated privileges and hand the
    /// copies to `owner`. If handing over fails the copies are removed.
    pub async fn paste_as_owner(&self, cwd: &CurrentDir, owner: &OwnerChoice) -> Result<(), OpError> {
        let clipboard = self
            .context
            .clipboard()
            .filter(|c| !c.is_empty())
            .ok_or(ValidationError::EmptyClipboard)?;
        let existing = collisions(&clipboard, cwd);
        if !existing.is_empty() {
            return Err(ValidationError::PasteCollision(existing).into());
        }

        let copies: Vec<String> = clipboard.names.iter().map(|name| cwd.child(name)).collect();
        if let Err(e) = self.copy_and_chown(&clipboard, cwd, &copies, owner).await {
            let mut cleanup = argv(["rm", "-rf"]);
            cleanup.extend(copies);
            return Err(self.compensate(e, cleanup, Superuser::Try).await);
        }

        info!(to = %cwd.path, owner = ?owner, count = clipboard.names.len(), "Pasted as owner");
        Ok(())
    }

    async fn copy_and_chown(
        &self,
        clipboard: &Clipboard,
        cwd: &CurrentDir,
        copies: &[String],
        owner: &OwnerChoice,
    ) -> Result<(), FileError> {
        let mut args = argv(["cp", "--archive"]);
        args.extend(clipboard.paths());
        args.push(cwd.path.clone());
        self.exec(args, Superuser::Require).await?;

        if let OwnerChoice::Owner(owner) = owner {
            let mut args = argv(["chown", "--recursive", owner.as_str()]);
            args.extend(copies.iter().cloned());
            self.exec(args, Superuser::Require).await?;
        }
        Ok(())
    }

    /// Current metadata of the clipboard's files, failing if any is gone.
    async fn source_entries(&self, clipboard: &Clipboard) -> Result<Vec<FileInfo>, OpError> {
        let listing = match fsinfo_once(
            self.host.directories.as_ref(),
            &clipboard.source_dir,
            &SOURCE_ATTRS,
            Superuser::Try,
        )
        .await
        {
            Ok(info) => info,
            Err(FileError::NotFound(_)) => {
                return Err(ValidationError::StaleClipboard(clipboard.names.clone()).into())
            }
            Err(e) => return Err(e.into()),
        };

        let mut sources = Vec::with_capacity(clipboard.names.len());
        let mut missing = Vec::new();
        for name in &clipboard.names {
            match listing.entry(name) {
                Some(info) => sources.push(info.clone()),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ValidationError::StaleClipboard(missing).into());
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use serde_json::json;

    fn owned(user: &str, group: &str) -> FileInfo {
        serde_json::from_value(json!({"type": "reg", "user": user, "group": group})).unwrap()
    }

    fn source_listing(mock: &MockHost) {
        mock.set_fsinfo(
            "/home/bob/",
            json!({
                "type": "dir",
                "entries": {
                    "a.txt": {"type": "reg", "user": "bob", "group": "bob"},
                    "b.txt": {"type": "reg", "user": "bob", "group": "bob"},
                },
            }),
        );
    }

    #[test]
    fn single_original_owner_is_offered() {
        let candidates = vec!["alice:alice".to_string(), "root:root".to_string()];
        let options = owner_options(candidates, &[owned("bob", "bob"), owned("bob", "bob")]);
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["alice", "root", "bob (original owner)"]);
        assert_eq!(options[2].choice, OwnerChoice::Owner("bob:bob".into()));
    }

    #[test]
    fn original_owner_already_a_candidate() {
        let candidates = vec!["alice:alice".to_string(), "root:root".to_string()];
        let options = owner_options(candidates, &[owned("alice", "alice")]);
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["alice (original owner)", "root"]);
    }

    #[test]
    fn mixed_owners_offer_keep_original() {
        let candidates = vec!["root:root".to_string()];
        let files = [owned("bob", "bob"), owned("carol", "staff"), owned("dave", "dave")];
        let options = owner_options(candidates, &files);
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].label, "keep original owners (bob, carol:staff, ...)");
        assert_eq!(options[1].choice, OwnerChoice::Original);

        let two = owner_options(Vec::new(), &files[..2]);
        assert_eq!(two[0].label, "keep original owners (bob, carol:staff)");
    }

    #[tokio::test]
    async fn collision_aborts_whole_batch() {
        let mock = MockHost::new();
        let coord = coordinator(&mock, true);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into(), "b.txt".into()]));
        let dest = cwd(json!({"b.txt": {"type": "reg"}}));

        let err = coord.paste(&dest).await.unwrap_err();
        assert_eq!(err.user_message(), "\"b.txt\" exists, not overwriting with paste.");
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_clipboard_is_detected() {
        let mock = MockHost::new();
        source_listing(&mock);
        let coord = coordinator(&mock, false);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into(), "gone".into()]));

        let err = coord.paste(&cwd(json!({}))).await.unwrap_err();
        assert!(matches!(
            err,
            OpError::Validation(ValidationError::StaleClipboard(ref names)) if names == &vec!["gone".to_string()]
        ));
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_clipboard() {
        let mock = MockHost::new();
        let coord = coordinator(&mock, false);
        assert!(matches!(
            coord.paste(&cwd(json!({}))).await,
            Err(OpError::Validation(ValidationError::EmptyClipboard))
        ));
    }

    #[tokio::test]
    async fn plain_paste_is_one_copy() {
        let mock = MockHost::new();
        source_listing(&mock);
        let coord = coordinator(&mock, false);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into(), "b.txt".into()]));

        let outcome = coord.paste(&cwd(json!({}))).await.unwrap();
        assert_eq!(outcome, PasteOutcome::Pasted);
        let calls = mock.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].argv,
            vec!["cp", "--archive", "/home/bob/a.txt", "/home/bob/b.txt", "/home/alice/"]
        );
        assert_eq!(calls[0].options.superuser, Superuser::None);
    }

    #[tokio::test]
    async fn failed_copy_offers_owner_choice_to_admins() {
        let mock = MockHost::new();
        source_listing(&mock);
        mock.fail("cp", FileError::OperationFailed("cp: Permission denied".into()));
        let coord = coordinator(&mock, true);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into()]));

        match coord.paste(&cwd(json!({}))).await.unwrap() {
            PasteOutcome::NeedsOwner(options) => {
                assert_eq!(options[0].label, "alice");
                assert!(options.iter().any(|o| o.label == "bob (original owner)"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_copy_without_privileges_is_an_error() {
        let mock = MockHost::new();
        source_listing(&mock);
        mock.fail("cp", FileError::OperationFailed("cp: Permission denied".into()));
        let coord = coordinator(&mock, false);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into()]));

        let err = coord.paste(&cwd(json!({}))).await.unwrap_err();
        assert_eq!(err.user_message(), "cp: Permission denied");
    }

    #[tokio::test]
    async fn chown_failure_removes_copies() {
        let mock = MockHost::new();
        mock.fail("chown", FileError::OperationFailed("chown: invalid group".into()));
        let coord = coordinator(&mock, true);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into(), "b.txt".into()]));

        let err = coord
            .paste_as_owner(&cwd(json!({})), &OwnerChoice::Owner("alice:nogroup".into()))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "chown: invalid group");

        let calls = mock.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].options.superuser, Superuser::Require);
        assert_eq!(
            calls[1].argv,
            vec!["chown", "--recursive", "alice:nogroup", "/home/alice/a.txt", "/home/alice/b.txt"]
        );
        assert_eq!(
            calls[2].argv,
            vec!["rm", "-rf", "/home/alice/a.txt", "/home/alice/b.txt"]
        );
        assert_eq!(calls[2].options.superuser, Superuser::Try);
    }

    #[tokio::test]
    async fn keep_original_skips_chown() {
        let mock = MockHost::new();
        let coord = coordinator(&mock, true);
        coord
            .context()
            .set_clipboard(Clipboard::new("/home/bob", vec!["a.txt".into()]));

        coord
            .paste_as_owner(&cwd(json!({})), &OwnerChoice::Original)
            .await
            .unwrap();
        assert_eq!(mock.argvs(), vec![vec!["cp", "--archive", "/home/bob/a.txt", "/home/alice/"]]);
    }
}
