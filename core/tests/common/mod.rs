//! In-memory host for filedeck core integration tests.
//!
//! Simulates a small filesystem tree. Commands mutate the tree and every
//! open watch receives the merge patch between its last listing and the new
//! one, the way a real metadata channel would report the change.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use filedeck_core::errors::FileError;
use filedeck_core::files::ownership::UserIdentity;
use filedeck_core::host::{
    CommandRunner, DirectoryChannel, ExecOptions, FileChannel, FileContents, FileWriter, Host,
    ReadOptions, Subscription, Superuser, WatchRequest, MISSING_TAG,
};
use filedeck_core::ops::{Coordinator, Privileges};
use filedeck_core::sync::merge_diff;
use filedeck_core::FilesContext;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File { content: String, version: u32 },
}

struct Watcher {
    dir: String,
    last: Value,
    tx: mpsc::Sender<Value>,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watchers: Vec<Watcher>,
}

fn trim(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn tag(node: Option<&Node>) -> String {
    match node {
        Some(Node::File { version, .. }) => format!("v{version}"),
        Some(Node::Dir) => "dir".to_string(),
        None => MISSING_TAG.to_string(),
    }
}

impl Tree {
    fn listing(&self, dir: &str) -> Value {
        if !matches!(self.nodes.get(dir), Some(Node::Dir)) {
            return json!({"error": {"problem": "not-found", "message": "No such file or directory"}});
        }
        let mut entries = Map::new();
        for (path, node) in &self.nodes {
            if path != dir && parent_of(path) == dir {
                let info = match node {
                    Node::Dir => json!({"type": "dir", "mode": 0o755, "user": "user", "group": "user"}),
                    Node::File { content, .. } => json!({
                        "type": "reg",
                        "mode": 0o644,
                        "size": content.len(),
                        "user": "user",
                        "group": "user",
                    }),
                };
                entries.insert(name_of(path).to_string(), info);
            }
        }
        json!({"info": {
            "type": "dir",
            "mode": 0o755,
            "user": "user",
            "group": "user",
            "entries": entries,
        }})
    }

    fn notify(&mut self) {
        let listings: Vec<Value> = self.watchers.iter().map(|w| self.listing(&w.dir)).collect();
        for (watcher, listing) in self.watchers.iter_mut().zip(listings) {
            if let Some(patch) = merge_diff(&watcher.last, &listing) {
                let _ = watcher.tx.try_send(patch);
                watcher.last = listing;
            }
        }
        self.watchers.retain(|w| !w.tx.is_closed());
    }

    fn remove_recursive(&mut self, path: &str) -> bool {
        let prefix = format!("{path}/");
        let before = self.nodes.len();
        self.nodes.retain(|p, _| p != path && !p.starts_with(&prefix));
        self.nodes.len() != before
    }

    fn run(&mut self, argv: &[String]) -> Result<(), FileError> {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["mkdir", path] => {
                let path = trim(path);
                if self.nodes.contains_key(&path) {
                    return Err(FileError::OperationFailed(format!(
                        "mkdir: cannot create directory '{path}': File exists"
                    )));
                }
                self.nodes.insert(path, Node::Dir);
            }
            ["mv", "--no-target-directory", rest @ ..] => {
                let (force, from, to) = match rest {
                    ["--force", from, to] => (true, trim(from), trim(to)),
                    [from, to] => (false, trim(from), trim(to)),
                    _ => return Err(FileError::OperationFailed("mv: bad usage".into())),
                };
                if self.nodes.contains_key(&to) && !force {
                    return Err(FileError::OperationFailed(format!(
                        "mv: cannot overwrite '{to}'"
                    )));
                }
                let moved: Vec<(String, Node)> = self
                    .nodes
                    .iter()
                    .filter(|(p, _)| **p == from || p.starts_with(&format!("{from}/")))
                    .map(|(p, n)| (format!("{to}{}", &p[from.len()..]), n.clone()))
                    .collect();
                if moved.is_empty() {
                    return Err(FileError::NotFound(from));
                }
                self.remove_recursive(&from);
                self.nodes.extend(moved);
            }
            ["rm", flags, paths @ ..] if flags.starts_with("-r") => {
                for path in paths {
                    let path = trim(path);
                    if !self.remove_recursive(&path) && *flags == "-r" {
                        return Err(FileError::OperationFailed(format!(
                            "rm: cannot remove '{path}': No such file or directory"
                        )));
                    }
                }
            }
            ["test", "-w", _] | ["chown", ..] | ["chmod", ..] => {}
            _ => {
                return Err(FileError::OperationFailed(format!(
                    "{}: unsupported in memory host",
                    args.first().copied().unwrap_or_default()
                )))
            }
        }
        Ok(())
    }
}

/// The simulated host. Cheap to clone via `Arc`.
#[derive(Default)]
pub struct MemoryHost {
    tree: Mutex<Tree>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.tree.lock().unwrap();
        tree.nodes.insert(trim(path), Node::Dir);
        tree.notify();
    }

    pub fn add_file(&self, path: &str, content: &str) {
        let mut tree = self.tree.lock().unwrap();
        tree.nodes.insert(
            trim(path),
            Node::File {
                content: content.to_string(),
                version: 1,
            },
        );
        tree.notify();
    }

    pub fn content(&self, path: &str) -> Option<String> {
        match self.tree.lock().unwrap().nodes.get(&trim(path)) {
            Some(Node::File { content, .. }) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.lock().unwrap().nodes.contains_key(&trim(path))
    }

    /// Every command issued so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn host(self: &Arc<Self>) -> Host {
        Host::new(self.clone(), self.clone(), self.clone())
    }

    pub fn coordinator(self: &Arc<Self>) -> Coordinator {
        Coordinator::new(
            self.host(),
            Privileges {
                superuser_allowed: false,
                user: UserIdentity::new("user", "user"),
            },
            FilesContext::new(),
        )
    }

    fn write(&self, path: &str, content: Option<&str>, expected_tag: Option<&str>) -> Result<String, FileError> {
        let mut tree = self.tree.lock().unwrap();
        let path = trim(path);
        let current = tag(tree.nodes.get(&path));
        if let Some(expected) = expected_tag {
            if expected != current {
                return Err(FileError::Conflict(path));
            }
        }
        let new_tag = match content {
            Some(content) => {
                let version = match tree.nodes.get(&path) {
                    Some(Node::File { version, .. }) => version + 1,
                    _ => 1,
                };
                tree.nodes.insert(
                    path.clone(),
                    Node::File {
                        content: content.to_string(),
                        version,
                    },
                );
                format!("v{version}")
            }
            None => {
                tree.nodes.remove(&path);
                MISSING_TAG.to_string()
            }
        };
        tree.notify();
        Ok(new_tag)
    }
}

#[async_trait]
impl CommandRunner for MemoryHost {
    async fn exec(&self, argv: Vec<String>, _options: ExecOptions) -> Result<String, FileError> {
        self.calls.lock().unwrap().push(argv.clone());
        let mut tree = self.tree.lock().unwrap();
        tree.run(&argv)?;
        tree.notify();
        Ok(String::new())
    }
}

#[async_trait]
impl DirectoryChannel for MemoryHost {
    async fn subscribe(&self, request: WatchRequest) -> Result<Subscription<Value>, FileError> {
        let (tx, rx) = mpsc::channel(64);
        let mut tree = self.tree.lock().unwrap();
        let dir = trim(&request.path);
        let initial = if request.attrs.iter().any(|a| a == "tag") && !request.attrs.iter().any(|a| a == "entries") {
            json!({"info": {"tag": tag(tree.nodes.get(&dir))}})
        } else {
            tree.listing(&dir)
        };
        let _ = tx.try_send(initial.clone());
        if request.watch {
            tree.watchers.push(Watcher {
                dir,
                last: initial,
                tx,
            });
        }
        Ok(Subscription::new(rx, CancellationToken::new()))
    }
}

struct MemoryWriter {
    host: Arc<MemoryHost>,
    path: String,
    expected_tag: Option<String>,
    data: Vec<u8>,
}

#[async_trait]
impl FileWriter for MemoryWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), FileError> {
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<String, FileError> {
        let content = String::from_utf8_lossy(&self.data).into_owned();
        self.host
            .write(&self.path, Some(&content), self.expected_tag.as_deref())
    }

    async fn abort(self: Box<Self>) {}
}

/// File channel over the same tree; writers need an owning handle.
pub struct MemoryFiles(pub Arc<MemoryHost>);

#[async_trait]
impl FileChannel for MemoryHost {
    async fn read(&self, path: &str, _options: ReadOptions) -> Result<FileContents, FileError> {
        let tree = self.tree.lock().unwrap();
        let node = tree.nodes.get(&trim(path));
        Ok(FileContents {
            content: match node {
                Some(Node::File { content, .. }) => Some(content.clone()),
                _ => None,
            },
            tag: tag(node),
        })
    }

    async fn replace(
        &self,
        path: &str,
        content: Option<&str>,
        expected_tag: Option<&str>,
        _superuser: Superuser,
    ) -> Result<String, FileError> {
        self.write(path, content, expected_tag)
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
}

#[async_trait]
impl FileChannel for MemoryFiles {
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
        Ok(Box::new(MemoryWriter {
            host: Arc::clone(&self.0),
            path: path.to_string(),
            expected_tag: expected_tag.map(str::to_string),
            data: Vec::new(),
        }))
    }

    async fn watch(&self, path: &str, superuser: Superuser) -> Result<Subscription<String>, FileError> {
        self.0.watch(path, superuser).await
    }
}

/// A coordinator whose file channel supports streaming writes.
pub fn uploading_coordinator(host: &Arc<MemoryHost>) -> Coordinator {
    Coordinator::new(
        Host::new(
            host.clone(),
            host.clone(),
            Arc::new(MemoryFiles(Arc::clone(host))),
        ),
        Privileges {
            superuser_allowed: false,
            user: UserIdentity::new("user", "user"),
        },
        FilesContext::new(),
    )
}
