//! Engine configuration and persisted view preferences.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagspaceError};
use crate::sorter::SortKey;

/// Environment variable that overrides the managed root.
pub const ROOT_ENV_VAR: &str = "TAGSPACE_HOME";

/// Directory name used below the platform data directory.
pub const DEFAULT_ROOT_DIR_NAME: &str = "tagspace";

/// File name of the preferences document, looked up next to the root.
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

/// Window over which filesystem events are buffered before dispatch.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(50);

/// Which mechanism delivers filesystem events to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// OS notifications, with per-directory polling fallback.
    #[default]
    Native,
    /// Polling for every directory.
    Polling,
    /// No OS watching; events come from `Tagspace::inject_event`.
    Manual,
}

/// View defaults read from the host application's preferences file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub sort_key: SortKey,
    pub reversed: bool,
    pub folders_first: bool,
    pub show_hidden: bool,
    /// Absolute paths whose subtrees are hidden unless `show_hidden` is on.
    pub hidden_locations: Vec<PathBuf>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sort_key: SortKey::Name,
            reversed: false,
            folders_first: true,
            show_hidden: false,
            hidden_locations: Vec::new(),
        }
    }
}

impl Preferences {
    /// Loads preferences from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => return Err(error.into()),
        };
        serde_json::from_str(&raw).map_err(|error| TagspaceError::InvalidPreferences {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })
    }
}

/// Everything `Tagspace::start` needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub preferences: Preferences,
    pub watch_backend: WatchBackend,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preferences: Preferences::default(),
            watch_backend: WatchBackend::default(),
        }
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_watch_backend(mut self, watch_backend: WatchBackend) -> Self {
        self.watch_backend = watch_backend;
        self
    }

    /// Resolves the root from `TAGSPACE_HOME`, falling back to the platform
    /// data directory, and reads preferences stored beside it.
    pub fn from_env() -> Result<Self> {
        let root = match env::var_os(ROOT_ENV_VAR) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => default_root()?,
        };
        let preferences_path = root
            .parent()
            .map(|parent| parent.join(PREFERENCES_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(PREFERENCES_FILE_NAME));
        let preferences = Preferences::load(&preferences_path)?;
        Ok(Self::new(root).with_preferences(preferences))
    }
}

fn default_root() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().ok_or_else(|| {
        TagspaceError::Internal("unable to determine the user data directory".to_string())
    })?;
    Ok(dirs.data_dir().join(DEFAULT_ROOT_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn preferences_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let prefs = Preferences::load(&temp.path().join("nope.json")).unwrap();
        assert_eq!(prefs, Preferences::default());
        assert!(prefs.folders_first);
    }

    #[test]
    fn preferences_parse_partial_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PREFERENCES_FILE_NAME);
        fs::write(&path, r#"{"sortKey":"modified","showHidden":true}"#).unwrap();
        let prefs = Preferences::load(&path).unwrap();
        assert_eq!(prefs.sort_key, SortKey::Modified);
        assert!(prefs.show_hidden);
        assert!(prefs.folders_first);
        assert!(!prefs.reversed);
    }

    #[test]
    fn malformed_preferences_are_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PREFERENCES_FILE_NAME);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Preferences::load(&path),
            Err(TagspaceError::InvalidPreferences { .. })
        ));
    }

    #[test]
    fn unknown_sort_key_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PREFERENCES_FILE_NAME);
        fs::write(&path, r#"{"sortKey":"color"}"#).unwrap();
        let error = Preferences::load(&path).unwrap_err();
        assert!(matches!(error, TagspaceError::InvalidPreferences { .. }));
        assert!(error.to_string().contains("color"));
    }

    #[test]
    fn builder_overrides_backend() {
        let config = EngineConfig::new("/tmp/tags").with_watch_backend(WatchBackend::Manual);
        assert_eq!(config.watch_backend, WatchBackend::Manual);
        assert_eq!(config.root, PathBuf::from("/tmp/tags"));
    }
}
