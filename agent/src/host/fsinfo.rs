//! Polling implementation of the directory metadata channel.
//!
//! The first listing is sent whole (split into `partial` messages for large
//! directories). After that the directory is re-read every poll interval and
//! only the merge patch between the previous and the new listing is sent.

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use filedeck_core::config::ChannelConfig;
use filedeck_core::errors::FileError;
use filedeck_core::host::{DirectoryChannel, Subscription, WatchRequest};
use filedeck_core::sync::{merge_diff, MAX_SYMLINK_HOPS};

use super::file::tag_of;

/// Directory channel reading the local filesystem.
pub struct LocalDirectoryChannel {
    config: ChannelConfig,
}

impl LocalDirectoryChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DirectoryChannel for LocalDirectoryChannel {
    async fn subscribe(&self, request: WatchRequest) -> Result<Subscription<Value>, FileError> {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_channel(request, self.config.clone(), tx, cancel.clone()));
        Ok(Subscription::new(rx, cancel))
    }
}

async fn run_channel(
    request: WatchRequest,
    config: ChannelConfig,
    tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
) {
    let names = Arc::new(Mutex::new(NameCache::default()));
    let attrs: Arc<[String]> = request.attrs.clone().into();

    let mut current = read_document(&request.path, &attrs, &names).await;
    for message in listing_messages(&current, config.listing_chunk) {
        if tx.send(message).await.is_err() {
            return;
        }
    }
    if !request.watch {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let next = read_document(&request.path, &attrs, &names).await;
        if let Some(patch) = merge_diff(&current, &next) {
            debug!(path = %request.path, "Directory changed");
            if tx.send(patch).await.is_err() {
                break;
            }
        }
        current = next;
    }
    debug!(path = %request.path, "Directory channel stopped");
}

/// `{"info": {...}}` for a readable path, `{"error": {...}}` otherwise.
async fn read_document(path: &str, attrs: &Arc<[String]>, names: &Arc<Mutex<NameCache>>) -> Value {
    let path_owned = path.to_string();
    let attrs = Arc::clone(attrs);
    let names = Arc::clone(names);
    let read = tokio::task::spawn_blocking(move || read_info(&path_owned, &attrs, &names)).await;
    match read {
        Ok(Ok(info)) => json!({ "info": info }),
        Ok(Err(e)) => json!({ "error": error_payload(path, &e) }),
        Err(e) => {
            warn!(path, "Directory read task failed: {e}");
            json!({"error": {"problem": "internal-error", "message": e.to_string()}})
        }
    }
}

/// Split a full document into the messages of an initial listing.
///
/// Entries are sent `chunk` at a time; every message but the last carries
/// `"partial": true`, and the last one carries `targets`.
fn listing_messages(document: &Value, chunk: usize) -> Vec<Value> {
    let chunk = chunk.max(1);
    let Some(Value::Object(info)) = document.get("info") else {
        return vec![document.clone()];
    };
    let Some(Value::Object(entries)) = info.get("entries") else {
        return vec![document.clone()];
    };
    if entries.len() <= chunk {
        return vec![document.clone()];
    }

    let mut head = info.clone();
    head.remove("entries");
    let targets = head.remove("targets");

    let names: Vec<&String> = entries.keys().collect();
    let chunks: Vec<&[&String]> = names.chunks(chunk).collect();
    let last = chunks.len() - 1;

    let mut messages = Vec::with_capacity(chunks.len());
    for (index, names) in chunks.into_iter().enumerate() {
        let part: Map<String, Value> = names
            .iter()
            .filter_map(|name| entries.get(*name).map(|e| ((*name).clone(), e.clone())))
            .collect();

        let mut info = if index == 0 { head.clone() } else { Map::new() };
        info.insert("entries".to_string(), Value::Object(part));
        if index == last {
            if let Some(targets) = &targets {
                info.insert("targets".to_string(), targets.clone());
            }
            messages.push(json!({ "info": info }));
        } else {
            messages.push(json!({ "info": info, "partial": true }));
        }
    }
    messages
}

fn error_payload(path: &str, e: &std::io::Error) -> Value {
    let problem = match e.kind() {
        std::io::ErrorKind::NotFound => "not-found",
        std::io::ErrorKind::PermissionDenied => "access-denied",
        _ => "internal-error",
    };
    let mut payload = json!({
        "problem": problem,
        "message": format!("{path}: {}", describe(e)),
    });
    if let Some(errno) = errno_name(e) {
        payload["errno"] = Value::String(errno);
    }
    payload
}

#[cfg(unix)]
fn describe(e: &std::io::Error) -> String {
    match e.raw_os_error() {
        Some(raw) => nix::errno::Errno::from_raw(raw).desc().to_string(),
        None => e.to_string(),
    }
}

#[cfg(not(unix))]
fn describe(e: &std::io::Error) -> String {
    e.to_string()
}

#[cfg(unix)]
fn errno_name(e: &std::io::Error) -> Option<String> {
    e.raw_os_error()
        .map(|raw| format!("{:?}", nix::errno::Errno::from_raw(raw)))
}

#[cfg(not(unix))]
fn errno_name(_e: &std::io::Error) -> Option<String> {
    None
}

fn wants(attrs: &[String], attr: &str) -> bool {
    attrs.iter().any(|a| a == attr)
}

/// Read `path` (following a final symlink) and, when requested, its entries
/// and the targets of the symlinks among them.
fn read_info(path: &str, attrs: &[String], names: &Mutex<NameCache>) -> std::io::Result<Value> {
    let root = Path::new(path);
    let metadata = std::fs::metadata(root)?;
    let mut names = names
        .lock()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    let mut info = attributes(root, &metadata, attrs, &mut names);

    if metadata.is_dir() && wants(attrs, "entries") {
        let mut entries = Map::new();
        let mut links = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let entry_path = entry.path();
            // An entry removed mid-listing simply does not appear.
            let Ok(entry_meta) = std::fs::symlink_metadata(&entry_path) else {
                continue;
            };
            let value = attributes(&entry_path, &entry_meta, attrs, &mut names);
            if let Some(Value::String(target)) = value.get("target") {
                links.push((target.clone(), resolve(root, target)));
            }
            entries.insert(name, Value::Object(value));
        }
        info.insert("entries".to_string(), Value::Object(entries));

        if wants(attrs, "targets") {
            let targets = read_targets(links, attrs, &mut names);
            info.insert("targets".to_string(), Value::Object(targets));
        }
    }

    Ok(Value::Object(info))
}

/// Metadata of symlink targets keyed by the raw target string, following
/// chains for at most [`MAX_SYMLINK_HOPS`] rounds.
fn read_targets(
    mut pending: Vec<(String, PathBuf)>,
    attrs: &[String],
    names: &mut NameCache,
) -> Map<String, Value> {
    let mut targets = Map::new();
    let mut seen: HashSet<String> = HashSet::new();

    for _ in 0..MAX_SYMLINK_HOPS {
        if pending.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for (key, path) in pending.drain(..) {
            if !seen.insert(key.clone()) {
                continue;
            }
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            let value = attributes(&path, &meta, attrs, names);
            if let Some(Value::String(target)) = value.get("target") {
                let parent = path.parent().unwrap_or(Path::new("/"));
                next.push((target.clone(), resolve(parent, target)));
            }
            targets.insert(key, Value::Object(value));
        }
        pending = next;
    }
    targets
}

fn resolve(dir: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        dir.join(target)
    }
}

/// The requested per-object attributes. `entries` and `targets` are filled
/// in by the caller.
fn attributes(path: &Path, meta: &Metadata, attrs: &[String], names: &mut NameCache) -> Map<String, Value> {
    let mut info = Map::new();
    for attr in attrs {
        let value = match attr.as_str() {
            "type" => Some(json!(type_name(meta))),
            "tag" => Some(json!(tag_of(meta))),
            "size" => Some(json!(meta.len())),
            "mtime" => mtime(meta).map(|secs| json!(secs)),
            "target" if meta.file_type().is_symlink() => std::fs::read_link(path)
                .ok()
                .map(|target| json!(target.to_string_lossy())),
            other => unix_attribute(other, meta, names),
        };
        if let Some(value) = value {
            info.insert(attr.clone(), value);
        }
    }
    info
}

fn mtime(meta: &Metadata) -> Option<f64> {
    let modified = meta.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since.as_secs_f64())
}

#[cfg(unix)]
fn type_name(meta: &Metadata) -> &'static str {
    use std::os::unix::fs::FileTypeExt;

    let ft = meta.file_type();
    if ft.is_dir() {
        "dir"
    } else if ft.is_file() {
        "reg"
    } else if ft.is_symlink() {
        "lnk"
    } else if ft.is_block_device() {
        "blk"
    } else if ft.is_char_device() {
        "chr"
    } else if ft.is_fifo() {
        "fifo"
    } else if ft.is_socket() {
        "sock"
    } else {
        "unknown"
    }
}

#[cfg(not(unix))]
fn type_name(meta: &Metadata) -> &'static str {
    let ft = meta.file_type();
    if ft.is_dir() {
        "dir"
    } else if ft.is_file() {
        "reg"
    } else if ft.is_symlink() {
        "lnk"
    } else {
        "unknown"
    }
}

#[cfg(unix)]
fn unix_attribute(attr: &str, meta: &Metadata, names: &mut NameCache) -> Option<Value> {
    use std::os::unix::fs::MetadataExt;

    match attr {
        "mode" => Some(json!(meta.mode() & 0o7777)),
        "uid" => Some(json!(meta.uid())),
        "gid" => Some(json!(meta.gid())),
        "user" => Some(names.user(meta.uid())),
        "group" => Some(names.group(meta.gid())),
        _ => None,
    }
}

#[cfg(not(unix))]
fn unix_attribute(_attr: &str, _meta: &Metadata, _names: &mut NameCache) -> Option<Value> {
    None
}

/// uid/gid to name lookups, kept for the lifetime of a channel. An id
/// without a name is reported as the number.
#[derive(Default)]
struct NameCache {
    users: HashMap<u32, Value>,
    groups: HashMap<u32, Value>,
}

#[cfg(unix)]
impl NameCache {
    fn user(&mut self, uid: u32) -> Value {
        use nix::unistd::{Uid, User};

        self.users
            .entry(uid)
            .or_insert_with(|| match User::from_uid(Uid::from_raw(uid)) {
                Ok(Some(user)) => json!(user.name),
                _ => json!(uid),
            })
            .clone()
    }

    fn group(&mut self, gid: u32) -> Value {
        use nix::unistd::{Gid, Group};

        self.groups
            .entry(gid)
            .or_insert_with(|| match Group::from_gid(Gid::from_raw(gid)) {
                Ok(Some(group)) => json!(group.name),
                _ => json!(gid),
            })
            .clone()
    }
}
