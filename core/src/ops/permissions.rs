use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{Coordinator, CurrentDir};
use crate::errors::{EditStep, FileError, OpError, ValidationError};
use crate::files::accounts::{parse_group, parse_passwd, Account, Group};
use crate::files::mode::chmod_symbolic_args;
use crate::files::names::check_filename;
use crate::files::FileInfo;
use crate::host::{argv, Superuser};

/// Desired attributes of one entry. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionChange {
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub new_name: Option<String>,
}

/// Per-item outcome of a multi-file edit. Succeeded items are never
/// rolled back.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, FileError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Commands of an edit, decided up front so nothing is issued when any part
/// of the edit is invalid.
struct EditPlan {
    chmod: Option<u32>,
    chown: Option<String>,
    rename: Option<String>,
}

fn plan_edit(
    cwd: &CurrentDir,
    name: &str,
    current: &FileInfo,
    change: &PermissionChange,
) -> Result<EditPlan, ValidationError> {
    let rename = match change.new_name.as_deref() {
        Some(new_name) if new_name != name => {
            check_filename(new_name, &cwd.entries(), Some(name))?;
            Some(new_name.to_string())
        }
        _ => None,
    };

    let chmod = change.mode.filter(|mode| Some(*mode) != current.mode);

    let current_user = current.user.as_ref().map(ToString::to_string);
    let current_group = current.group.as_ref().map(ToString::to_string);
    let user = change.owner.clone().or_else(|| current_user.clone());
    let group = change.group.clone().or_else(|| current_group.clone());
    let chown = match (user, group) {
        (Some(user), Some(group))
            if Some(&user) != current_user.as_ref() || Some(&group) != current_group.as_ref() =>
        {
            Some(format!("{user}:{group}"))
        }
        _ => None,
    };

    Ok(EditPlan {
        chmod,
        chown,
        rename,
    })
}

impl Coordinator {
    /// Apply a permissions/ownership/name edit to `name` as up to three
    /// sequential commands: `chmod`, `chown`, `mv`.
    ///
    /// Unchanged attributes are skipped. The first failing step aborts the
    /// rest; earlier steps stay applied and are listed in the error.
    /// Returns the steps that were issued.
    pub async fn edit_permissions(
        &self,
        cwd: &CurrentDir,
        name: &str,
        change: &PermissionChange,
    ) -> Result<Vec<EditStep>, OpError> {
        let entries = cwd.entries();
        let current = entries.get(name).cloned().unwrap_or_default();
        let plan = plan_edit(cwd, name, &current, change)?;
        let path = cwd.child(name);
        let mut completed = Vec::new();

        if let Some(mode) = plan.chmod {
            let octal = format!("{mode:o}");
            self.step(EditStep::Chmod, &completed, argv(["chmod", octal.as_str(), path.as_str()]))
                .await?;
            completed.push(EditStep::Chmod);
        }
        if let Some(owner) = &plan.chown {
            self.step(EditStep::Chown, &completed, argv(["chown", owner.as_str(), path.as_str()]))
                .await?;
            completed.push(EditStep::Chown);
        }
        if let Some(new_name) = &plan.rename {
            let target = cwd.child(new_name);
            self.step(
                EditStep::Rename,
                &completed,
                argv(["mv", "--no-target-directory", path.as_str(), target.as_str()]),
            )
            .await?;
            completed.push(EditStep::Rename);
        }

        info!(path = %path, steps = ?completed, "Edited permissions");
        Ok(completed)
    }

    async fn step(&self, step: EditStep, completed: &[EditStep], args: Vec<String>) -> Result<(), OpError> {
        self.exec(args, Superuser::Try).await.map(drop).map_err(|source| {
            warn!(%step, completed = ?completed, "Permission edit step failed: {source}");
            OpError::Step {
                step,
                completed: completed.to_vec(),
                source,
            }
        })
    }

    /// Set the same mode on several entries. Items are independent: each
    /// failure is reported on its own and does not stop the others.
    pub async fn chmod_batch(&self, cwd: &CurrentDir, names: &[String], mode: u32) -> BatchReport {
        let octal = format!("{mode:o}");
        let results = join_all(names.iter().map(|name| {
            let path = cwd.child(name);
            let octal = octal.clone();
            async move {
                let result = self
                    .exec(argv(["chmod", octal.as_str(), path.as_str()]), Superuser::Try)
                    .await;
                (name.clone(), result)
            }
        }))
        .await;

        let mut report = BatchReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => report.succeeded.push(name),
                Err(e) => {
                    debug!(name = %name, "chmod failed: {e}");
                    report.failed.push((name, e));
                }
            }
        }
        report
    }

    /// Apply `mode` to a directory and everything below it. Execute bits
    /// are only granted to directories and already-executable files.
    pub async fn chmod_recursive(&self, cwd: &CurrentDir, name: &str, mode: u32) -> Result<(), OpError> {
        let path = cwd.child(name);
        let symbolic = chmod_symbolic_args(mode);
        self.exec(argv(["chmod", "-R", symbolic.as_str(), path.as_str()]), Superuser::Try)
            .await?;
        info!(path = %path, mode = %symbolic, "Changed permissions recursively");
        Ok(())
    }

    /// Users and groups known to the host, for owner selection.
    pub async fn load_accounts(&self) -> Result<(Vec<Account>, Vec<Group>), OpError> {
        let passwd = self.exec(argv(["getent", "passwd"]), Superuser::None).await?;
        let group = self.exec(argv(["getent", "group"]), Superuser::None).await?;
        Ok((parse_passwd(&passwd), parse_group(&group)))
    }

    /// SELinux context of an entry, shown read-only beside its permissions.
    /// A failed lookup is logged and reported as unknown.
    pub async fn selinux_context(&self, cwd: &CurrentDir, name: &str) -> Option<String> {
        let path = cwd.child(name);
        match self.host.files.selinux_context(&path).await {
            Ok(context) => context,
            Err(e) => {
                warn!(path = %path, "Cannot obtain SELinux context: {e}");
                None
            }
        }
    }
}
