use tracing::info;

use super::{Confirmed, Coordinator, CurrentDir, Destructive};
use crate::errors::{OpError, ValidationError};
use crate::files::names::{can_overwrite, check_filename};
use crate::host::{argv, Superuser};

/// An explicit request to rename over an existing regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverwritePlan {
    pub from: String,
    pub to: String,
    source: String,
    target: String,
}

impl Destructive for OverwritePlan {
    fn confirmation_title(&self) -> String {
        format!("Overwrite {}?", self.to)
    }
}

fn mv_argv(source: &str, target: &str, force: bool) -> Vec<String> {
    let mut args = argv(["mv", "--no-target-directory"]);
    if force {
        args.push("--force".into());
    }
    args.push(source.to_string());
    args.push(target.to_string());
    args
}

impl Coordinator {
    /// Rename `name` to `new_name` within `cwd`. Never replaces an existing
    /// entry; use [`plan_overwrite`](Self::plan_overwrite) for that.
    pub async fn rename(&self, cwd: &CurrentDir, name: &str, new_name: &str) -> Result<(), OpError> {
        check_filename(new_name, &cwd.entries(), Some(name))?;
        let (source, target) = (cwd.child(name), cwd.child(new_name));

        self.exec(mv_argv(&source, &target, false), Superuser::Try)
            .await?;
        info!(from = %source, to = %target, "Renamed");
        Ok(())
    }

    /// Prepare an overwriting rename. Only offered when the plain rename
    /// would fail because a regular file already holds `new_name`.
    pub fn plan_overwrite(
        &self,
        cwd: &CurrentDir,
        name: &str,
        new_name: &str,
    ) -> Result<OverwritePlan, OpError> {
        let entries = cwd.entries();
        match check_filename(new_name, &entries, Some(name)) {
            Err(ValidationError::FileExists) => {}
            Err(other) => return Err(other.into()),
            Ok(()) => return Err(ValidationError::CannotOverwrite.into()),
        }
        let source_info = entries.get(name).ok_or(ValidationError::CannotOverwrite)?;
        if !can_overwrite(new_name, &entries, name, source_info) {
            return Err(ValidationError::CannotOverwrite.into());
        }

        Ok(OverwritePlan {
            from: name.to_string(),
            to: new_name.to_string(),
            source: cwd.child(name),
            target: cwd.child(new_name),
        })
    }

    pub async fn rename_overwrite(&self, plan: &Confirmed<OverwritePlan>) -> Result<(), OpError> {
        let plan = plan.get();
        self.exec(mv_argv(&plan.source, &plan.target, true), Superuser::Try)
            .await?;
        info!(from = %plan.source, to = %plan.target, "Renamed over existing file");
        Ok(())
    }
}
