//! Ownership heuristics for newly created items.

use super::mode::SETGID;
use super::FileInfo;

/// The account the session runs as (the non-elevated identity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    pub group: String,
}

impl UserIdentity {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

/// Candidate `user:group` owners for an item created inside `dir`, most
/// preferred first, without duplicates.
///
/// Only meaningful when elevated privileges are available; otherwise the
/// item is simply created as the session user.
///
/// - The parent's own ownership comes first, unless the parent is a
///   world-writable sticky directory (like `/tmp`) or its owner is unknown.
/// - `root` is always possible with elevated privileges.
/// - The session user is always possible.
///
/// A setgid parent forces its group onto every candidate, mirroring POSIX.
pub fn owner_candidates(dir: &FileInfo, user: &UserIdentity) -> Vec<String> {
    let mode = dir.mode.unwrap_or(0);
    let setgid_group = match &dir.group {
        Some(group) if mode & SETGID != 0 => Some(group.to_string()),
        _ => None,
    };

    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    if mode == 0 || mode & 0o1222 != 0o1222 {
        if let Some(owner) = dir.owner_spec() {
            push(owner);
        }
    }

    push(format!(
        "root:{}",
        setgid_group.as_deref().unwrap_or("root")
    ));
    push(format!(
        "{}:{}",
        user.name,
        setgid_group.as_deref().unwrap_or(&user.group)
    ));

    candidates
}

/// Render a `user:group` pair compactly: `alice` when both halves match.
pub fn display_owner(spec: &str) -> String {
    match spec.split_once(':') {
        Some((user, group)) if user == group => user.to_string(),
        _ => spec.to_string(),
    }
}
