//! Name validation shared by every operation that introduces a new name.
//!
//! Checks run in a fixed order and the first failure wins:
//! emptiness, length, path separator, "same as original", then collision.

use std::collections::BTreeMap;

use crate::errors::ValidationError;

use super::{FileInfo, FileType};

/// Names of this many bytes or more are rejected.
pub const MAX_NAME_BYTES: usize = 256;

fn check_collision(
    candidate: &str,
    entries: &BTreeMap<String, FileInfo>,
) -> Result<(), ValidationError> {
    match entries.get(candidate) {
        Some(existing) if existing.is_type(FileType::Directory) => {
            Err(ValidationError::DirectoryExists)
        }
        Some(_) => Err(ValidationError::FileExists),
        None => Ok(()),
    }
}

/// Validate a name for a new or renamed entry of the directory whose
/// children are `entries`.
///
/// `original` is the current name when renaming. It is excluded from the
/// collision check so that an unchanged name reports
/// [`ValidationError::SameName`] rather than a collision with itself.
pub fn check_filename(
    candidate: &str,
    entries: &BTreeMap<String, FileInfo>,
    original: Option<&str>,
) -> Result<(), ValidationError> {
    if candidate.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if candidate.len() >= MAX_NAME_BYTES {
        return Err(ValidationError::NameTooLong);
    }
    if candidate.contains('/') {
        return Err(ValidationError::NameContainsSlash);
    }
    match original {
        Some(original) if original == candidate => Err(ValidationError::SameName),
        _ => check_collision(candidate, entries),
    }
}

/// Validate the name of a new symbolic link.
///
/// Link names may contain `/` (the link can be placed in a subdirectory),
/// so only emptiness and collision are checked.
pub fn check_link_name(
    candidate: &str,
    entries: &BTreeMap<String, FileInfo>,
) -> Result<(), ValidationError> {
    if candidate.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    check_collision(candidate, entries)
}

/// Whether renaming `source` to `candidate` may be offered as an explicit
/// overwrite: the target exists and is a regular file, the source is a
/// regular file too, and the name actually changes.
pub fn can_overwrite(
    candidate: &str,
    entries: &BTreeMap<String, FileInfo>,
    source_name: &str,
    source: &FileInfo,
) -> bool {
    match entries.get(candidate) {
        Some(existing) => {
            existing.is_type(FileType::Regular)
                && source.is_type(FileType::Regular)
                && candidate != source_name
        }
        None => false,
    }
}
