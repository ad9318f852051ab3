use tracing::{info, warn};

use super::{Confirmed, Coordinator, CurrentDir, Destructive};
use crate::errors::{OpError, ValidationError};
use crate::files::FileType;
use crate::host::Superuser;

/// A confirmed-to-be deletion of one or more entries of one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePlan {
    names: Vec<String>,
    paths: Vec<String>,
    /// Type of the single selected entry; unused for batches.
    single_type: Option<FileType>,
    force: bool,
}

impl DeletePlan {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// The forced variant offered after this plan failed. `None` when this
    /// plan is already forced.
    pub fn escalate(&self) -> Option<DeletePlan> {
        if self.force {
            return None;
        }
        Some(DeletePlan {
            force: true,
            ..self.clone()
        })
    }

    fn argv(&self) -> Vec<String> {
        let flags = if self.force { "-rf" } else { "-r" };
        let mut args = vec!["rm".to_string(), flags.to_string()];
        args.extend(self.paths.iter().cloned());
        args
    }
}

impl Destructive for DeletePlan {
    fn confirmation_title(&self) -> String {
        if self.names.len() > 1 {
            let count = self.names.len();
            return if self.force {
                format!("Force delete {count} items")
            } else {
                format!("Delete {count} items?")
            };
        }

        let name = self.names.first().map(String::as_str).unwrap_or_default();
        match (self.single_type, self.force) {
            (Some(FileType::Regular), false) => format!("Delete file {name}?"),
            (Some(FileType::Regular), true) => format!("Force delete file {name}?"),
            (Some(FileType::Symlink), false) => format!("Delete link {name}?"),
            (Some(FileType::Symlink), true) => format!("Force delete link {name}?"),
            (Some(FileType::Directory), false) => format!("Delete directory {name}?"),
            (Some(FileType::Directory), true) => format!("Force delete directory {name}?"),
            (_, false) => format!("Delete {name}?"),
            (_, true) => format!("Force delete {name}"),
        }
    }
}

impl Coordinator {
    /// Describe the deletion of `names` for confirmation. Issues nothing.
    pub fn plan_delete(&self, cwd: &CurrentDir, names: &[String]) -> Result<DeletePlan, OpError> {
        if names.is_empty() {
            return Err(ValidationError::NothingSelected.into());
        }
        let single_type = match names {
            [only] => cwd.entries().get(only).and_then(|info| info.file_type),
            _ => None,
        };

        Ok(DeletePlan {
            names: names.to_vec(),
            paths: names.iter().map(|name| cwd.child(name)).collect(),
            single_type,
            force: false,
        })
    }

    /// Delete everything in the plan with a single `rm`.
    ///
    /// On failure nothing is retried; the caller may offer
    /// [`DeletePlan::escalate`] as a separate, confirmed action.
    pub async fn delete(&self, plan: &Confirmed<DeletePlan>) -> Result<(), OpError> {
        let plan = plan.get();
        match self.exec(plan.argv(), Superuser::Try).await {
            Ok(_) => {
                info!(count = plan.paths.len(), force = plan.force, "Deleted");
                Ok(())
            }
            Err(e) => {
                warn!(count = plan.paths.len(), force = plan.force, "Delete failed: {e}");
                Err(e.into())
            }
        }
    }
}
