//! Extension-based file classification.
//!
//! Only drives UI affordances (icons, "open in editor"); it is never used to
//! decide what a file actually contains.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Unknown,
    Archive,
    Audio,
    Code,
    Image,
    Text,
    Video,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown type",
            Self::Archive => "Archive file",
            Self::Audio => "Audio file",
            Self::Code => "Source code file",
            Self::Image => "Image file",
            Self::Text => "Text file",
            Self::Video => "Video file",
        }
    }

    /// CSS-style class used by the presentation layer.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Unknown => "file",
            Self::Archive => "archive-file",
            Self::Audio => "audio-file",
            Self::Code => "code-file",
            Self::Image => "image-file",
            Self::Text => "text-file",
            Self::Video => "video-file",
        }
    }

    /// Categories that may be opened in the text editor. Unknown is included
    /// so that extension-less files like `/etc/hostname` stay editable.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Unknown | Self::Code | Self::Text)
    }
}

const EXTENSIONS: &[(Category, &[&str])] = &[
    (
        Category::Archive,
        &[
            "7z", "ar", "arj", "bz2", "cab", "cpio", "deb", "gz", "iso", "jar", "lz", "lz4", "lzma",
            "rar", "rpm", "tar", "tar.bz2", "tar.gz", "tar.lz", "tar.xz", "tar.zst", "tbz2", "tgz",
            "txz", "xz", "z", "zip", "zst",
        ],
    ),
    (
        Category::Audio,
        &[
            "aac", "aiff", "amr", "flac", "m4a", "mid", "midi", "mka", "mp3", "oga", "ogg", "opus",
            "wav", "weba", "wma",
        ],
    ),
    (
        Category::Code,
        &[
            "bash", "c", "cc", "cjs", "cmake", "cpp", "cs", "css", "cxx", "d", "dart", "el", "erl",
            "ex", "exs", "go", "h", "hh", "hpp", "hs", "html", "ini", "java", "js", "json", "jsx",
            "kt", "lua", "m", "mjs", "mk", "ml", "nix", "php", "pl", "pm", "py", "r", "rb", "rs",
            "s", "scala", "scss", "sh", "sql", "swift", "toml", "ts", "tsx", "vim", "vue", "xml",
            "yaml", "yml", "zsh",
        ],
    ),
    (
        Category::Image,
        &[
            "avif", "bmp", "gif", "heic", "ico", "jpeg", "jpg", "png", "psd", "svg", "tif", "tiff",
            "webp", "xcf",
        ],
    ),
    (
        Category::Text,
        &[
            "asc", "cfg", "conf", "csv", "diff", "log", "markdown", "md", "patch", "rst", "text",
            "tsv", "txt",
        ],
    ),
    (
        Category::Video,
        &[
            "3gp", "avi", "flv", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ogv", "webm", "wmv",
        ],
    ),
];

struct FileTypeData {
    extensions: HashMap<&'static str, Category>,
    max_extension_length: usize,
}

fn data() -> &'static FileTypeData {
    static DATA: OnceLock<FileTypeData> = OnceLock::new();
    DATA.get_or_init(|| {
        let mut extensions = HashMap::new();
        let mut max_extension_length = 0;
        for (category, exts) in EXTENSIONS {
            for ext in *exts {
                max_extension_length = max_extension_length.max(ext.len());
                extensions.insert(*ext, *category);
            }
        }
        FileTypeData {
            extensions,
            max_extension_length,
        }
    })
}

/// Classify a file name by its extension.
///
/// The longest known extension wins (`archive.tar.gz` is matched as
/// `tar.gz`). A dot at offset 0 (hidden files) never starts an extension.
pub fn lookup(name: &str) -> Category {
    let data = data();
    let bytes = name.as_bytes();
    let start = 1.max(bytes.len().saturating_sub(data.max_extension_length + 1));

    for (idx, byte) in bytes.iter().enumerate().skip(start) {
        if *byte != b'.' {
            continue;
        }
        // '.' is ASCII, so idx + 1 is always a char boundary.
        if let Some(category) = data.extensions.get(&name[idx + 1..]) {
            return *category;
        }
    }

    Category::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_extensions() {
        assert_eq!(lookup("main.rs"), Category::Code);
        assert_eq!(lookup("notes.txt"), Category::Text);
        assert_eq!(lookup("photo.jpg"), Category::Image);
        assert_eq!(lookup("song.flac"), Category::Audio);
        assert_eq!(lookup("clip.mkv"), Category::Video);
    }

    #[test]
    fn longest_extension_first() {
        assert_eq!(lookup("backup.tar.gz"), Category::Archive);
        assert_eq!(lookup("release.tar.zst"), Category::Archive);
    }

    #[test]
    fn hidden_files_have_no_extension() {
        assert_eq!(lookup(".bashrc"), Category::Unknown);
        assert_eq!(lookup(".config.toml"), Category::Code);
    }

    #[test]
    fn unknown_and_extensionless() {
        assert_eq!(lookup("hostname"), Category::Unknown);
        assert_eq!(lookup("data.qqqq"), Category::Unknown);
        assert_eq!(lookup(""), Category::Unknown);
    }

    #[test]
    fn multibyte_names_do_not_panic() {
        assert_eq!(lookup("résumé.md"), Category::Text);
        assert_eq!(lookup("日本語のファイル名前.txt"), Category::Text);
        assert_eq!(lookup("日本語"), Category::Unknown);
    }

    #[test]
    fn editable_categories() {
        assert!(Category::Unknown.is_editable());
        assert!(Category::Text.is_editable());
        assert!(!Category::Image.is_editable());
    }
}
