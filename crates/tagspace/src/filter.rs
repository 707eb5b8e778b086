//! View-local item predicates.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::Item;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    /// Case-insensitive substring of the display name; empty matches all.
    pub search: String,
    pub show_hidden: bool,
}

impl FilterOptions {
    pub fn new(search: impl Into<String>, show_hidden: bool) -> Self {
        Self {
            search: search.into(),
            show_hidden,
        }
    }
}

/// Returns true if `path` is at or below one of `hidden_locations`.
pub fn path_is_hidden_location(hidden_locations: &[PathBuf], path: &Path) -> bool {
    hidden_locations
        .iter()
        .any(|hidden| path == hidden || path.starts_with(hidden))
}

/// Keeps the items that pass `options`.
pub fn filter_items<'a, I>(items: I, options: &FilterOptions, hidden_locations: &[PathBuf]) -> Vec<Item>
where
    I: IntoIterator<Item = &'a Item>,
{
    let needle = options.search.trim().to_lowercase();
    items
        .into_iter()
        .filter(|item| {
            options.show_hidden
                || (!item.is_hidden() && !path_is_hidden_location(hidden_locations, &item.path))
        })
        .filter(|item| needle.is_empty() || item.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, ItemKind};

    fn item(path: &str) -> Item {
        let path = PathBuf::from(path);
        Item {
            id: ItemId::next(),
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
            kind: ItemKind::File,
            size: Some(0),
            modified_at: None,
            created_at: None,
            extension: None,
        }
    }

    fn names(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.name.as_str()).collect()
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let items = [item("/r/Art/Sunset.png"), item("/r/Art/dog.png")];
        let kept = filter_items(&items, &FilterOptions::new("SUN", false), &[]);
        assert_eq!(names(&kept), vec!["Sunset.png"]);
    }

    #[test]
    fn empty_search_keeps_everything_visible() {
        let items = [item("/r/a"), item("/r/b")];
        assert_eq!(filter_items(&items, &FilterOptions::default(), &[]).len(), 2);
    }

    #[test]
    fn dot_names_hidden_unless_requested() {
        let items = [item("/r/.secret"), item("/r/plain")];
        let hidden = filter_items(&items, &FilterOptions::default(), &[]);
        assert_eq!(names(&hidden), vec!["plain"]);
        let shown = filter_items(&items, &FilterOptions::new("", true), &[]);
        assert_eq!(shown.len(), 2);
    }

    #[test]
    fn hidden_locations_apply_to_subtrees() {
        let items = [item("/r/Private/a"), item("/r/Private"), item("/r/Public/b")];
        let hidden = vec![PathBuf::from("/r/Private")];
        let kept = filter_items(&items, &FilterOptions::default(), &hidden);
        assert_eq!(names(&kept), vec!["b"]);
        let shown = filter_items(&items, &FilterOptions::new("", true), &hidden);
        assert_eq!(shown.len(), 3);
    }
}
