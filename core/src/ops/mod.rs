//! Operation coordinator: user intents in, privileged commands out.
//!
//! Every operation validates locally first and issues nothing when
//! validation fails. Dependent commands are issued strictly in sequence.
//! The coordinator never updates the directory snapshot itself; the watch
//! channel reports the outcome.

pub mod create;
pub mod delete;
pub mod paste;
pub mod permissions;
pub mod rename;
pub mod symlink;
pub mod upload;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::ChannelConfig;
use crate::context::FilesContext;
use crate::errors::{FileError, OpError, ValidationError};
use crate::files::ownership::{owner_candidates, UserIdentity};
use crate::files::{paths, FileInfo};
use crate::host::{ExecOptions, Host, Superuser};
use crate::sync::{DirectoryWatchSession, FileInfoState};

pub use create::CreateFile;
pub use delete::DeletePlan;
pub use paste::{owner_options, OwnerChoice, OwnerOption, PasteOutcome};
pub use permissions::{BatchReport, PermissionChange};
pub use rename::OverwritePlan;
pub use symlink::{LinkMode, SymlinkRequest};
pub use upload::{
    Conflict, ConflictAction, ConflictResolver, Resolution, UploadReport, UploadSource,
};

/// What the session is allowed to do beyond its own permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privileges {
    /// Elevated privileges are available (the admin switch is on).
    pub superuser_allowed: bool,
    /// The non-elevated identity.
    pub user: UserIdentity,
}

/// The directory an operation acts in, as last published by its watch.
#[derive(Debug, Clone)]
pub struct CurrentDir {
    /// Normalised `/dir/` path.
    pub path: String,
    pub state: Arc<FileInfoState>,
}

impl CurrentDir {
    pub fn new(path: &str, state: Arc<FileInfoState>) -> Self {
        Self {
            path: paths::normalize_dir_path(path),
            state,
        }
    }

    pub fn from_session(session: &DirectoryWatchSession) -> Self {
        Self::new(session.path(), session.state())
    }

    /// Children as currently known; empty when the listing is unavailable.
    pub fn entries(&self) -> std::borrow::Cow<'_, BTreeMap<String, FileInfo>> {
        self.state.entries()
    }

    pub fn info(&self) -> Result<&FileInfo, ValidationError> {
        self.state.info.as_ref().ok_or(ValidationError::NoDirectoryInfo)
    }

    pub fn child(&self, name: &str) -> String {
        format!("{}{}", self.path, name)
    }
}

/// A destructive action that needs an explicit confirmation step.
pub trait Destructive: Sized {
    /// The question shown to the user.
    fn confirmation_title(&self) -> String;

    /// Record the user's confirmation.
    fn confirm(self) -> Confirmed<Self> {
        Confirmed(self)
    }
}

/// Proof that the user confirmed a destructive action. Only obtainable
/// through [`Destructive::confirm`].
#[derive(Debug, Clone)]
pub struct Confirmed<T>(T);

impl<T> Confirmed<T> {
    pub fn get(&self) -> &T {
        &self.0
    }
}

/// Entry point for all user-initiated file operations.
pub struct Coordinator {
    host: Host,
    privileges: Privileges,
    context: Arc<FilesContext>,
    config: ChannelConfig,
}

impl Coordinator {
    pub fn new(host: Host, privileges: Privileges, context: Arc<FilesContext>) -> Self {
        Self {
            host,
            privileges,
            context,
            config: ChannelConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> &Arc<FilesContext> {
        &self.context
    }

    pub fn privileges(&self) -> &Privileges {
        &self.privileges
    }

    /// Ordered owner candidates for a new item in `dir`. Empty without
    /// elevated privileges, in which case items are created as the user.
    pub fn owner_candidates(&self, dir: &FileInfo) -> Vec<String> {
        if self.privileges.superuser_allowed {
            owner_candidates(dir, &self.privileges.user)
        } else {
            Vec::new()
        }
    }

    /// The owner a new item in `dir` gets by default.
    pub fn default_owner(&self, dir: &FileInfo) -> Option<String> {
        self.owner_candidates(dir).into_iter().next()
    }

    async fn exec(&self, argv: Vec<String>, superuser: Superuser) -> Result<String, FileError> {
        self.host
            .commands
            .exec(argv, ExecOptions::superuser(superuser))
            .await
    }

    async fn exec_in(
        &self,
        argv: Vec<String>,
        directory: &str,
        superuser: Superuser,
    ) -> Result<String, FileError> {
        self.host
            .commands
            .exec(argv, ExecOptions::superuser(superuser).in_directory(directory))
            .await
    }

    /// Run a compensating command after `primary` failed. The compensation's
    /// own failure is logged and attached, never surfaced on its own.
    async fn compensate(&self, primary: FileError, argv: Vec<String>, superuser: Superuser) -> OpError {
        let compensation = match self.exec(argv.clone(), superuser).await {
            Ok(_) => None,
            Err(e) => {
                warn!(command = ?argv, "Compensating action failed: {e}");
                Some(e)
            }
        };
        OpError::Compensated {
            primary,
            compensation,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted host shared by the coordinator tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::host::{
        CommandRunner, DirectoryChannel, FileChannel, FileContents, FileWriter, ReadOptions,
        Subscription, WatchRequest,
    };

    #[derive(Debug, Clone, PartialEq)]
    pub struct Call {
        pub argv: Vec<String>,
        pub options: ExecOptions,
    }

    /// Records commands and file writes; commands whose program name is in
    /// `failures` fail with the queued message.
    #[derive(Default)]
    pub struct MockHost {
        pub calls: Mutex<Vec<Call>>,
        pub failures: Mutex<HashMap<String, VecDeque<FileError>>>,
        pub outputs: Mutex<HashMap<String, String>>,
        pub fsinfo: Mutex<HashMap<String, Value>>,
        pub files: Mutex<HashMap<String, (String, u32)>>,
        pub replaces: Mutex<Vec<(String, Option<String>, Option<String>, Superuser)>>,
        pub labels: Mutex<HashMap<String, String>>,
    }

    impl MockHost {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn fail(&self, program: &str, err: FileError) {
            self.failures
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(err);
        }

        pub fn output(&self, program: &str, stdout: &str) {
            self.outputs
                .lock()
                .unwrap()
                .insert(program.to_string(), stdout.to_string());
        }

        pub fn set_fsinfo(&self, path: &str, info: Value) {
            self.fsinfo.lock().unwrap().insert(path.to_string(), info);
        }

        pub fn argvs(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().iter().map(|c| c.argv.clone()).collect()
        }

        fn tag_of(&self, path: &str) -> String {
            match self.files.lock().unwrap().get(path) {
                Some((_, version)) => format!("v{version}"),
                None => crate::host::MISSING_TAG.to_string(),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for MockHost {
        async fn exec(&self, argv: Vec<String>, options: ExecOptions) -> Result<String, FileError> {
            let program = argv.first().cloned().unwrap_or_default();
            self.calls.lock().unwrap().push(Call { argv, options });
            if let Some(queue) = self.failures.lock().unwrap().get_mut(&program) {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .get(&program)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl DirectoryChannel for MockHost {
        async fn subscribe(&self, request: WatchRequest) -> Result<Subscription<Value>, FileError> {
            let (tx, rx) = mpsc::channel(4);
            let message = match self.fsinfo.lock().unwrap().get(&request.path) {
                Some(info) => json!({ "info": info }),
                None if request.attrs.iter().any(|a| a == "tag") => {
                    json!({ "info": { "tag": self.tag_of(&request.path) } })
                }
                None => json!({ "error": { "problem": "not-found" } }),
            };
            let _ = tx.send(message).await;
            Ok(Subscription::new(rx, CancellationToken::new()))
        }
    }

    pub struct MockWriter {
        host: Arc<MockHost>,
        path: String,
        data: Vec<u8>,
    }

    #[async_trait]
    impl FileWriter for MockWriter {
        async fn write(&mut self, chunk: &[u8]) -> Result<(), FileError> {
            self.data.extend_from_slice(chunk);
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<String, FileError> {
            let content = String::from_utf8_lossy(&self.data).into_owned();
            let mut files = self.host.files.lock().unwrap();
            let version = files.get(&self.path).map(|(_, v)| v + 1).unwrap_or(1);
            files.insert(self.path.clone(), (content, version));
            Ok(format!("v{version}"))
        }

        async fn abort(self: Box<Self>) {}
    }

    /// Whole-file writes only; streaming writes go through [`WriterHost`].
    #[async_trait]
    impl FileChannel for MockHost {
        async fn read(&self, path: &str, _options: ReadOptions) -> Result<FileContents, FileError> {
            let files = self.files.lock().unwrap();
            Ok(match files.get(path) {
                Some((content, version)) => FileContents {
                    content: Some(content.clone()),
                    tag: format!("v{version}"),
                },
                None => FileContents {
                    content: None,
                    tag: crate::host::MISSING_TAG.to_string(),
                },
            })
        }

        async fn replace(
            &self,
            path: &str,
            content: Option<&str>,
            expected_tag: Option<&str>,
            superuser: Superuser,
        ) -> Result<String, FileError> {
            self.replaces.lock().unwrap().push((
                path.to_string(),
                content.map(str::to_string),
                expected_tag.map(str::to_string),
                superuser,
            ));
            if let Some(expected) = expected_tag {
                if expected != self.tag_of(path) {
                    return Err(FileError::Conflict(path.to_string()));
                }
            }
            let mut files = self.files.lock().unwrap();
            match content {
                Some(content) => {
                    let version = files.get(path).map(|(_, v)| v + 1).unwrap_or(1);
                    files.insert(path.to_string(), (content.to_string(), version));
                    Ok(format!("v{version}"))
                }
                None => {
                    files.remove(path);
                    Ok(crate::host::MISSING_TAG.to_string())
                }
            }
        }

        async fn open_writer(
            &self,
            _path: &str,
            _expected_tag: Option<&str>,
            _superuser: Superuser,
        ) -> Result<Box<dyn FileWriter>, FileError> {
            Err(FileError::NotSupported)
        }

        async fn watch(&self, _path: &str, _superuser: Superuser) -> Result<Subscription<String>, FileError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(Subscription::new(rx, CancellationToken::new()))
        }

        /// Labels come from `labels`; a failure queued under
        /// `security.selinux` is returned first.
        async fn selinux_context(&self, path: &str) -> Result<Option<String>, FileError> {
            if let Some(queue) = self.failures.lock().unwrap().get_mut("security.selinux") {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
            Ok(self.labels.lock().unwrap().get(path).cloned())
        }
    }

    /// Writers are handed out by a wrapper that owns an `Arc` to the host.
    pub struct WriterHost(pub Arc<MockHost>);

    #[async_trait]
    impl FileChannel for WriterHost {
        async fn read(&self, path: &str, options: ReadOptions) -> Result<FileContents, FileError> {
            self.0.read(path, options).await
        }

        async fn replace(
            &self,
            path: &str,
            content: Option<&str>,
            expected_tag: Option<&str>,
            superuser: Superuser,
        ) -> Result<String, FileError> {
            self.0.replace(path, content, expected_tag, superuser).await
        }

        async fn open_writer(
            &self,
            path: &str,
            expected_tag: Option<&str>,
            _superuser: Superuser,
        ) -> Result<Box<dyn FileWriter>, FileError> {
            if let Some(expected) = expected_tag {
                if expected != self.0.tag_of(path) {
                    return Err(FileError::Conflict(path.to_string()));
                }
            }
            Ok(Box::new(MockWriter {
                host: Arc::clone(&self.0),
                path: path.to_string(),
                data: Vec::new(),
            }))
        }

        async fn watch(&self, path: &str, superuser: Superuser) -> Result<Subscription<String>, FileError> {
            self.0.watch(path, superuser).await
        }

        async fn selinux_context(&self, path: &str) -> Result<Option<String>, FileError> {
            self.0.selinux_context(path).await
        }
    }

    pub fn alice() -> UserIdentity {
        UserIdentity::new("alice", "alice")
    }

    pub fn coordinator(mock: &Arc<MockHost>, superuser_allowed: bool) -> Coordinator {
        let host = Host::new(
            mock.clone(),
            mock.clone(),
            Arc::new(WriterHost(Arc::clone(mock))),
        );
        Coordinator::new(
            host,
            Privileges {
                superuser_allowed,
                user: alice(),
            },
            FilesContext::new(),
        )
    }

    /// A `/home/alice/` directory with the given entries.
    pub fn cwd(entries: Value) -> CurrentDir {
        let info: FileInfo = serde_json::from_value(json!({
            "type": "dir",
            "user": "alice",
            "group": "alice",
            "mode": 0o755,
            "entries": entries,
        }))
        .unwrap();
        CurrentDir::new(
            "/home/alice",
            Arc::new(FileInfoState {
                info: Some(info),
                error: None,
                loading: false,
            }),
        )
    }
}
