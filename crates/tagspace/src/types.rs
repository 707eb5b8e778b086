//! Item types shared by the index, filter and sorter.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Kind of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }

    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }
}

impl From<fs::FileType> for ItemKind {
    fn from(file_type: fs::FileType) -> Self {
        if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_symlink() {
            Self::Symlink
        } else {
            Self::Other
        }
    }
}

/// Identity of an item, stable across in-place renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u64);

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

impl ItemId {
    pub fn next() -> Self {
        Self(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A file or directory presented by a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub path: PathBuf,
    pub kind: ItemKind,
    /// Size in bytes; `None` for directories.
    pub size: Option<u64>,
    /// Unix timestamps in seconds.
    pub modified_at: Option<u64>,
    pub created_at: Option<u64>,
    /// Lowercased extension without the dot.
    pub extension: Option<String>,
}

impl Item {
    /// Stats `path` without following symlinks and builds a fresh item.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    pub fn from_metadata(path: &Path, metadata: &fs::Metadata) -> Self {
        let kind = ItemKind::from(metadata.file_type());
        let name = path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let extension = if kind.is_dir() {
            None
        } else {
            extension_of(&name)
        };
        Self {
            id: ItemId::next(),
            name,
            path: path.to_path_buf(),
            kind,
            size: (!kind.is_dir()).then_some(metadata.len()),
            modified_at: unix_secs(metadata.modified()),
            created_at: unix_secs(metadata.created()),
            extension,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Dot-prefixed names are hidden on the platforms we target.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Replaces everything but the identity with a fresh stat of `other`.
    pub(crate) fn refresh_from(&mut self, other: Item) {
        let id = self.id;
        *self = other;
        self.id = id;
    }
}

/// Extension used for type grouping. A leading dot does not start an
/// extension, so `.bashrc` has none.
fn extension_of(name: &str) -> Option<String> {
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_lowercase())
}

fn unix_secs(time: std::io::Result<SystemTime>) -> Option<u64> {
    time.ok()
        .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
        .map(|value| value.as_secs())
}

// ---------------------------------------------------------------------------
// Type groups
// ---------------------------------------------------------------------------

/// Coarse content group derived from the extension, used by the type sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeGroup {
    Folder,
    Picture,
    Video,
    Audio,
    Document,
    Presentation,
    Spreadsheet,
    Archive,
    Code,
    Executable,
    Other,
}

const PICTURE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "ico", "svg", "heic", "heif", "raw",
    "arw", "cr2", "orf", "raf", "psd", "xcf", "kra",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "avi", "mkv", "wmv", "webm", "flv", "mpg", "mpeg", "3gp", "3g2", "mts",
    "m2ts",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "oga", "opus", "wma", "m4a", "alac", "aiff",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "doc", "docx", "rtf", "odt", "pdf", "epub",
];

const PRESENTATION_EXTENSIONS: &[&str] = &["ppt", "pptx", "key", "odp"];

const SPREADSHEET_EXTENSIONS: &[&str] = &["xls", "xlsx", "csv", "numbers", "ods"];

const ARCHIVE_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz", "zst", "iso",
];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "c", "cc", "cpp", "h", "hpp", "java", "cs", "py", "go", "rb",
    "swift", "kt", "php", "html", "css", "json", "yaml", "yml", "toml", "ini", "sh", "sql", "lua",
];

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "msi", "bat", "appimage", "flatpakref", "apk", "jar", "bin", "run", "deb", "rpm",
];

impl TypeGroup {
    pub fn of(item: &Item) -> Self {
        if item.is_dir() {
            return Self::Folder;
        }
        item.extension
            .as_deref()
            .map(Self::from_extension)
            .unwrap_or(Self::Other)
    }

    pub fn from_extension(extension: &str) -> Self {
        let groups: [(&[&str], Self); 9] = [
            (PICTURE_EXTENSIONS, Self::Picture),
            (VIDEO_EXTENSIONS, Self::Video),
            (AUDIO_EXTENSIONS, Self::Audio),
            (DOCUMENT_EXTENSIONS, Self::Document),
            (PRESENTATION_EXTENSIONS, Self::Presentation),
            (SPREADSHEET_EXTENSIONS, Self::Spreadsheet),
            (ARCHIVE_EXTENSIONS, Self::Archive),
            (CODE_EXTENSIONS, Self::Code),
            (EXECUTABLE_EXTENSIONS, Self::Executable),
        ];
        groups
            .iter()
            .find(|(extensions, _)| extensions.contains(&extension))
            .map(|(_, group)| *group)
            .unwrap_or(Self::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn extension_rules() {
        assert_eq!(extension_of("cat.PNG").as_deref(), Some("png"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn item_from_path_reads_metadata() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("cat.png");
        std::fs::write(&file_path, b"meow").unwrap();
        std::fs::create_dir(temp.path().join("Art")).unwrap();

        let file = Item::from_path(&file_path).unwrap();
        assert_eq!(file.name, "cat.png");
        assert_eq!(file.kind, ItemKind::File);
        assert_eq!(file.size, Some(4));
        assert_eq!(file.extension.as_deref(), Some("png"));
        assert!(file.modified_at.is_some());

        let dir = Item::from_path(&temp.path().join("Art")).unwrap();
        assert_eq!(dir.kind, ItemKind::Directory);
        assert_eq!(dir.size, None);
        assert_eq!(dir.extension, None);
        assert_ne!(dir.id, file.id);
    }

    #[test]
    fn refresh_keeps_identity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        File::create(&path).unwrap();
        let mut item = Item::from_path(&path).unwrap();
        let id = item.id;
        std::fs::write(&path, b"grown").unwrap();
        item.refresh_from(Item::from_path(&path).unwrap());
        assert_eq!(item.id, id);
        assert_eq!(item.size, Some(5));
    }

    #[test]
    fn type_groups() {
        assert_eq!(TypeGroup::from_extension("png"), TypeGroup::Picture);
        assert_eq!(TypeGroup::from_extension("mkv"), TypeGroup::Video);
        assert_eq!(TypeGroup::from_extension("weird"), TypeGroup::Other);
    }
}
