//! Resolving a category filter to locations and items.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::category::{Category, CategorySet, REGISTRY_FILE_NAME};
use crate::codec::{candidate_paths_for, categories_for_path, is_category_directory};
use crate::types::Item;
use crate::walk::{walk_tree, WalkData};

/// Upper bound on candidate permutations probed when reusing a cached
/// resolution.
pub const MAX_CANDIDATE_PROBES: usize = 720;

/// What a resolution found below its start directory.
#[derive(Debug, Default, Clone)]
pub struct WalkOutcome {
    /// Directories whose set equals the filter.
    pub locations: BTreeSet<PathBuf>,
    /// Every directory visited; each must be watched by the view.
    pub watched: BTreeSet<PathBuf>,
    /// Direct children of the locations.
    pub items: Vec<Item>,
    /// Valid category names seen on directories.
    pub discovered: BTreeSet<Category>,
    pub skipped: usize,
}

/// Runs the pruned walk for `filter` from the root.
pub fn resolve_filter(root: &Path, filter: &CategorySet, cancel: &CancellationToken) -> Option<WalkOutcome> {
    resolve_subtree(root, root, filter, cancel)
}

/// Runs the pruned walk for `filter` from `start`, whose set must be a
/// subset of `filter`.
pub fn resolve_subtree(
    root: &Path,
    start: &Path,
    filter: &CategorySet,
    cancel: &CancellationToken,
) -> Option<WalkOutcome> {
    let data = WalkData::new(cancel);
    let descend = |name: &str| filter.contains_name(name);
    let list = |dir: &Path| categories_for_path(root, dir).is_ok_and(|set| &set == filter);
    let tree = walk_tree(&data, start, &descend, &list)?;

    let mut outcome = WalkOutcome {
        skipped: data.skipped(),
        ..WalkOutcome::default()
    };
    for node in tree.iter() {
        outcome.watched.insert(node.path.clone());
        if let Some(category) = directory_category(root, &node.path) {
            outcome.discovered.insert(category);
        }
        if list(&node.path) {
            outcome.locations.insert(node.path.clone());
            collect_items(root, &node.entries, &mut outcome);
        }
    }

    if outcome.skipped > 0 {
        log::debug!(
            "filter walk skipped entries filter={filter} start={} skipped={}",
            start.display(),
            outcome.skipped
        );
    }
    Some(outcome)
}

/// Lists the known locations of a cached resolution, probing candidate
/// permutations that the cache does not know yet.
pub fn list_cached(
    root: &Path,
    filter: &CategorySet,
    order: &[Category],
    locations: &BTreeSet<PathBuf>,
    watched: &BTreeSet<PathBuf>,
    cancel: &CancellationToken,
) -> Option<WalkOutcome> {
    let mut outcome = WalkOutcome {
        locations: locations.clone(),
        watched: watched.clone(),
        ..WalkOutcome::default()
    };

    for candidate in candidate_paths_for(root, filter, order).take(MAX_CANDIDATE_PROBES) {
        if outcome.locations.contains(&candidate) || !candidate.is_dir() {
            continue;
        }
        for ancestor in candidate.ancestors().take_while(|path| path.starts_with(root)) {
            outcome.watched.insert(ancestor.to_path_buf());
        }
        outcome.locations.insert(candidate);
    }

    let locations: Vec<PathBuf> = outcome.locations.iter().cloned().collect();
    for (counter, location) in locations.iter().enumerate() {
        cancel.is_cancelled_sparse(counter)?;
        match list_directory(location) {
            Some((entries, skipped)) => {
                outcome.skipped += skipped;
                collect_items(root, &entries, &mut outcome);
            }
            None => {
                outcome.skipped += 1;
                outcome.locations.remove(location);
                outcome.watched.remove(location);
            }
        }
    }
    cancel.is_cancelled()?;
    Some(outcome)
}

/// Stats every entry of `dir`, returning the items and the skipped count.
/// `None` if the directory itself cannot be read.
fn list_directory(dir: &Path) -> Option<(Vec<Item>, usize)> {
    let read_dir = fs::read_dir(dir).ok()?;
    let mut skipped = 0;
    let mut items = Vec::new();
    for entry in read_dir {
        let Ok(entry) = entry else {
            skipped += 1;
            continue;
        };
        match Item::from_path(&entry.path()) {
            Ok(item) => items.push(item),
            Err(_) => skipped += 1,
        }
    }
    Some((items, skipped))
}

fn collect_items(root: &Path, entries: &[Item], outcome: &mut WalkOutcome) {
    for item in entries {
        if is_registry_file(root, &item.path) {
            continue;
        }
        if item.is_dir() && is_category_directory(&item.name) {
            if let Ok(category) = Category::new(item.name.as_str()) {
                outcome.discovered.insert(category);
            }
        }
        outcome.items.push(item.clone());
    }
}

fn directory_category(root: &Path, dir: &Path) -> Option<Category> {
    if dir == root {
        return None;
    }
    let name = dir.file_name()?.to_str()?;
    Category::new(name).ok()
}

pub(crate) fn is_registry_file(root: &Path, path: &Path) -> bool {
    path.parent() == Some(root)
        && path.file_name().and_then(|name| name.to_str()) == Some(REGISTRY_FILE_NAME)
}
