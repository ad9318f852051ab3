//! String path helpers for remote paths.
//!
//! Paths name files on the managed host, not on the machine running this
//! code, so they are handled as `/`-separated strings rather than
//! `std::path::Path`.

/// Normalise a directory path to the `/foo/bar/` form: exactly one leading
/// and one trailing `/`. The empty string is the root.
pub fn normalize_dir_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(trimmed.len() + 2);
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(trimmed);
    normalized.push('/');
    normalized
}

/// Parent directory of `path`, without a trailing slash (`/` for top-level
/// entries and for the root itself).
pub fn dirname(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None if trimmed.is_empty() => "/".to_string(),
        None => ".".to_string(),
    }
}

/// Last component of `path`, ignoring trailing slashes. The root is `/`.
pub fn basename(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { String::new() } else { "/".to_string() };
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Join a normalised directory (`/foo/`) and an entry name.
pub fn join(dir: &str, name: &str) -> String {
    format!("{}{}", normalize_dir_path(dir), name)
}
