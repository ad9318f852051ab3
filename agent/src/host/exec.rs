//! Command execution on the local machine.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use filedeck_core::errors::FileError;
use filedeck_core::host::{CommandRunner, ExecOptions, Superuser};

/// stderr fragments that mean the host refused on privilege grounds.
const PERMISSION_MARKERS: [&str; 3] = [
    "Permission denied",
    "Operation not permitted",
    "a password is required",
];

/// Runs commands with `tokio::process`, elevating via `sudo -n`.
pub struct LocalCommandRunner {
    sudo: OnceCell<bool>,
}

impl LocalCommandRunner {
    pub fn new() -> Self {
        Self {
            sudo: OnceCell::new(),
        }
    }

    /// Whether non-interactive sudo works, probed once.
    pub async fn can_elevate(&self) -> bool {
        if is_root() {
            return true;
        }
        *self
            .sudo
            .get_or_init(|| async {
                let available = Command::new("sudo")
                    .args(["-n", "true"])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map(|status| status.success())
                    .unwrap_or(false);
                info!(available, "Probed non-interactive sudo");
                available
            })
            .await
    }

    async fn use_sudo(&self, superuser: Superuser) -> bool {
        match superuser {
            Superuser::None => false,
            _ if is_root() => false,
            Superuser::Require => true,
            Superuser::Try => self.can_elevate().await,
        }
    }
}

impl Default for LocalCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    async fn exec(&self, argv: Vec<String>, options: ExecOptions) -> Result<String, FileError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(FileError::OperationFailed("empty command".to_string()));
        };

        let mut command = if self.use_sudo(options.superuser).await {
            let mut sudo = Command::new("sudo");
            sudo.arg("-n").arg("--").arg(program).args(args);
            sudo
        } else {
            let mut direct = Command::new(program);
            direct.args(args);
            direct
        };
        if let Some(dir) = &options.directory {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(?argv, superuser = ?options.superuser, "Running command");
        let output = command
            .output()
            .await
            .map_err(|e| FileError::OperationFailed(format!("{program}: {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        debug!(?argv, status = ?output.status.code(), %stderr, "Command failed");
        Err(classify_failure(program, output.status.code(), stderr))
    }
}

fn classify_failure(program: &str, code: Option<i32>, stderr: String) -> FileError {
    if stderr.is_empty() {
        let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        return FileError::OperationFailed(format!("{program} exited with status {status}"));
    }
    if PERMISSION_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        FileError::PermissionDenied(stderr)
    } else {
        FileError::OperationFailed(stderr)
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
