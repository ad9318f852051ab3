//! Folder view rows derived from a directory snapshot.

use std::cmp::Ordering;

use crate::config::Sort;
use crate::sync::{resolve_target, FileInfoState};

use super::filetype;
use super::{FileType, FolderEntry};

/// Maximum size of a file that may be opened in the text editor.
pub const MAX_EDITOR_FILE_SIZE: u64 = 1_000_000;

/// Build one row per entry of the directory, resolving symlink targets and
/// classifying regular files.
pub fn folder_entries(state: &FileInfoState) -> Vec<FolderEntry> {
    let Some(dir) = state.info.as_ref() else {
        return Vec::new();
    };
    let Some(entries) = dir.entries.as_ref() else {
        return Vec::new();
    };

    entries
        .iter()
        .map(|(name, info)| {
            let to = resolve_target(dir, name).and_then(|target| target.file_type);
            let category = (to == Some(FileType::Regular)).then(|| filetype::lookup(name));
            FolderEntry {
                name: name.clone(),
                info: info.clone(),
                to,
                category,
            }
        })
        .collect()
}

fn size_key(entry: &FolderEntry) -> u64 {
    if entry.info.is_type(FileType::Regular) {
        entry.info.size.unwrap_or(0)
    } else {
        0
    }
}

fn mtime_key(entry: &FolderEntry) -> f64 {
    entry.info.mtime.unwrap_or(0.0)
}

/// Comparator for `sort`. Entries resolving to directories come first; ties
/// on the sort key are broken by name.
pub fn compare(sort: Sort) -> impl Fn(&FolderEntry, &FolderEntry) -> Ordering {
    move |a, b| {
        let is_dir = |e: &FolderEntry| e.to == Some(FileType::Directory);
        let dirs = is_dir(b).cmp(&is_dir(a));
        let by_name = || a.name.cmp(&b.name);

        dirs.then_with(|| match sort {
            Sort::Az => by_name(),
            Sort::Za => b.name.cmp(&a.name),
            Sort::FirstModified => mtime_key(a)
                .total_cmp(&mtime_key(b))
                .then_with(by_name),
            Sort::LastModified => mtime_key(b)
                .total_cmp(&mtime_key(a))
                .then_with(by_name),
            Sort::LargestSize => size_key(b).cmp(&size_key(a)).then_with(by_name),
            Sort::SmallestSize => size_key(a).cmp(&size_key(b)).then_with(by_name),
        })
    }
}

/// Rows as the folder view shows them: hidden files dropped unless
/// requested, case-insensitive substring filter, then sorted.
pub fn visible_entries(
    entries: &[FolderEntry],
    sort: Sort,
    show_hidden: bool,
    filter: &str,
) -> Vec<FolderEntry> {
    let filter = filter.to_lowercase();
    let mut rows: Vec<FolderEntry> = entries
        .iter()
        .filter(|e| show_hidden || !e.is_hidden())
        .filter(|e| e.name.to_lowercase().contains(&filter))
        .cloned()
        .collect();
    rows.sort_by(compare(sort));
    rows
}

/// Whether "Open in editor" is offered for this entry: a regular file of an
/// editable category below [`MAX_EDITOR_FILE_SIZE`].
pub fn can_open_in_editor(entry: &FolderEntry) -> bool {
    entry.info.is_type(FileType::Regular)
        && entry.category.map(|c| c.is_editable()).unwrap_or(true)
        && entry.info.size.map(|s| s < MAX_EDITOR_FILE_SIZE).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::Category;
    use serde_json::json;

    fn state(value: serde_json::Value) -> FileInfoState {
        FileInfoState {
            info: Some(serde_json::from_value(value).unwrap()),
            error: None,
            loading: false,
        }
    }

    fn sample() -> Vec<FolderEntry> {
        folder_entries(&state(json!({
            "type": "dir",
            "entries": {
                "b.txt": {"type": "reg", "size": 10, "mtime": 3.0},
                "a.rs": {"type": "reg", "size": 300, "mtime": 1.0},
                "zdir": {"type": "dir", "mtime": 2.0},
                "link": {"type": "lnk", "target": "zdir"},
                ".hidden": {"type": "reg", "size": 1},
                "broken": {"type": "lnk", "target": "nope"},
            }
        })))
    }

    fn names(rows: &[FolderEntry]) -> Vec<&str> {
        rows.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn resolves_targets_and_categories() {
        let rows = sample();
        let link = rows.iter().find(|e| e.name == "link").unwrap();
        assert_eq!(link.to, Some(FileType::Directory));
        assert_eq!(link.category, None);

        let code = rows.iter().find(|e| e.name == "a.rs").unwrap();
        assert_eq!(code.category, Some(Category::Code));

        let broken = rows.iter().find(|e| e.name == "broken").unwrap();
        assert_eq!(broken.to, None);
    }

    #[test]
    fn directories_first_then_name() {
        let rows = visible_entries(&sample(), Sort::Az, false, "");
        assert_eq!(names(&rows), vec!["link", "zdir", "a.rs", "b.txt", "broken"]);

        let rows = visible_entries(&sample(), Sort::Za, false, "");
        assert_eq!(names(&rows), vec!["zdir", "link", "broken", "b.txt", "a.rs"]);
    }

    #[test]
    fn size_and_mtime_orders() {
        let rows = visible_entries(&sample(), Sort::LargestSize, false, "");
        assert_eq!(names(&rows), vec!["link", "zdir", "a.rs", "b.txt", "broken"]);

        let rows = visible_entries(&sample(), Sort::LastModified, false, "");
        assert_eq!(names(&rows), vec!["zdir", "link", "b.txt", "a.rs", "broken"]);
    }

    #[test]
    fn hidden_and_filter() {
        let rows = visible_entries(&sample(), Sort::Az, true, "");
        assert!(names(&rows).contains(&".hidden"));

        let rows = visible_entries(&sample(), Sort::Az, false, "TXT");
        assert_eq!(names(&rows), vec!["b.txt"]);
    }

    #[test]
    fn editor_eligibility() {
        let rows = sample();
        let get = |name: &str| rows.iter().find(|e| e.name == name).unwrap();
        assert!(can_open_in_editor(get("a.rs")));
        assert!(!can_open_in_editor(get("zdir")));

        let mut big = get("b.txt").clone();
        big.info.size = Some(MAX_EDITOR_FILE_SIZE);
        assert!(!can_open_in_editor(&big));

        let mut image = get("b.txt").clone();
        image.category = Some(Category::Image);
        assert!(!can_open_in_editor(&image));
    }

    #[test]
    fn empty_state_has_no_rows() {
        assert!(folder_entries(&FileInfoState::default()).is_empty());
    }
}
