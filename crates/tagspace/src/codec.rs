//! Conversions between category sets and the directory paths that encode them.
//!
//! Reading is permutation tolerant: `Pictures/Art` and `Art/Pictures` both
//! denote `{Art, Pictures}`. Writing is not: new directories are always created
//! at the canonical path, which orders categories by their registry position
//! and appends unregistered ones lexicographically.

use std::path::{Component, Path, PathBuf};

use crate::category::{invalid_name_reason, Category, CategorySet, REGISTRY_FILE_NAME};
use crate::error::{Result, TagspaceError};

/// Returns true if a directory entry called `name` can be a category directory.
pub fn is_category_directory(name: &str) -> bool {
    name != REGISTRY_FILE_NAME && invalid_name_reason(name).is_none()
}

/// Derives the category set encoded by `path` relative to `root`.
///
/// Every component between `root` and `path` (inclusive) is a category.
/// Repeated components collapse. Fails with `InvalidPath` when `path` is not
/// below `root` or passes through an entry that cannot be a category.
pub fn categories_for_path(root: &Path, path: &Path) -> Result<CategorySet> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| TagspaceError::InvalidPath(path.to_path_buf()))?;

    let mut set = CategorySet::new();
    for component in relative.components() {
        let Component::Normal(raw) = component else {
            return Err(TagspaceError::InvalidPath(path.to_path_buf()));
        };
        let name = raw
            .to_str()
            .filter(|name| is_category_directory(name))
            .ok_or_else(|| TagspaceError::InvalidPath(path.to_path_buf()))?;
        set.insert(Category::new(name)?);
    }
    Ok(set)
}

/// Category set of the directory holding `item`, or `None` if the item is not
/// inside a category location.
pub fn containing_set(root: &Path, item: &Path) -> Option<CategorySet> {
    if item == root {
        return None;
    }
    let parent = item.parent()?;
    categories_for_path(root, parent).ok()
}

/// Orders the categories of `set` for writing.
pub fn canonical_order<'a>(set: &'a CategorySet, order: &[Category]) -> Vec<&'a Category> {
    let mut ordered: Vec<&Category> = order
        .iter()
        .filter_map(|known| set.iter().find(|candidate| *candidate == known))
        .collect();
    // Set iteration is lexicographic, so the leftovers already are too.
    ordered.extend(set.iter().filter(|category| !order.contains(*category)));
    ordered
}

/// The single path the engine writes to for `set`.
pub fn canonical_path_for(root: &Path, set: &CategorySet, order: &[Category]) -> PathBuf {
    let mut path = root.to_path_buf();
    for category in canonical_order(set, order) {
        path.push(category.as_str());
    }
    path
}

/// Lazily yields every directory path that encodes `set` with each category
/// appearing once, canonical path first.
pub fn candidate_paths_for(root: &Path, set: &CategorySet, order: &[Category]) -> CandidatePaths {
    let names = canonical_order(set, order)
        .into_iter()
        .map(|category| category.as_str().to_string())
        .collect::<Vec<_>>();
    CandidatePaths {
        root: root.to_path_buf(),
        indices: (0..names.len()).collect(),
        names,
        exhausted: false,
    }
}

/// Iterator over the permutations of a category set, as paths.
///
/// Permutations are produced in lexicographic order of canonical positions,
/// starting from the identity, so the first item is the canonical path.
#[derive(Debug, Clone)]
pub struct CandidatePaths {
    root: PathBuf,
    names: Vec<String>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl Iterator for CandidatePaths {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        if self.exhausted {
            return None;
        }
        let mut path = self.root.clone();
        for index in &self.indices {
            path.push(&self.names[*index]);
        }
        self.exhausted = !next_permutation(&mut self.indices);
        Some(path)
    }
}

/// Advances `values` to the next lexicographic permutation.
/// Returns false once the last permutation has been passed.
fn next_permutation(values: &mut [usize]) -> bool {
    if values.len() < 2 {
        return false;
    }
    let Some(pivot) = (0..values.len() - 1).rev().find(|&i| values[i] < values[i + 1]) else {
        return false;
    };
    let Some(successor) = (pivot + 1..values.len())
        .rev()
        .find(|&j| values[j] > values[pivot])
    else {
        return false;
    };
    values.swap(pivot, successor);
    values[pivot + 1..].reverse();
    true
}
