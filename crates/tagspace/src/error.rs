use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TagspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path is outside the managed root: {0}")]
    InvalidPath(PathBuf),

    #[error("Invalid category name {name:?}: {reason}")]
    InvalidCategoryName { name: String, reason: &'static str },

    #[error("Preferences file {path} is invalid: {reason}")]
    InvalidPreferences { path: PathBuf, reason: String },

    #[error("Category registry {path} is corrupt: {reason}")]
    RegistryCorrupt { path: PathBuf, reason: String },

    #[error("Unable to watch {path}: {reason}")]
    WatchUnavailable { path: PathBuf, reason: String },

    #[error(
        "Category rename updated the registry but {} director{} could not be renamed",
        failed.len(),
        if failed.len() == 1 { "y" } else { "ies" }
    )]
    PartialRenamePropagation {
        renamed: Vec<PathBuf>,
        failed: Vec<(PathBuf, String)>,
    },

    #[error("Managed root was removed: {0}")]
    RootLost(PathBuf),

    #[error("Category {name:?} is still used by {path}")]
    CategoryInUse { name: String, path: PathBuf },

    #[error("Category already exists: {0}")]
    CategoryExists(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown view: {0}")]
    ViewNotFound(u64),

    #[error("Destination already exists: {0}")]
    LocationOccupied(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TagspaceError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

pub(crate) fn dispatcher_gone() -> TagspaceError {
    TagspaceError::Internal("dispatcher loop is not running".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_rename_message_counts_failures() {
        let error = TagspaceError::PartialRenamePropagation {
            renamed: vec![PathBuf::from("/root/Artwork")],
            failed: vec![(PathBuf::from("/root/Videos/Art"), "exists".into())],
        };
        assert_eq!(
            error.to_string(),
            "Category rename updated the registry but 1 directory could not be renamed"
        );
    }
}
