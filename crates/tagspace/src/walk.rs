//! Parallel, pruned directory walking.
//!
//! The walk builds a `DirNode` tree instead of a flat list. Only directories
//! accepted by the `descend` predicate are entered, so a walk for a category
//! filter never leaves the part of the tree that can encode a subset of it.
//! Children are sorted by name so preorder traversal is deterministic.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::types::Item;

/// Hard limit on walk depth below the start directory.
pub const MAX_WALK_DEPTH: usize = 64;

/// A directory visited by the walk.
#[derive(Debug)]
pub struct DirNode {
    pub path: PathBuf,
    /// Subdirectories that were descended into, sorted by name.
    pub children: Vec<DirNode>,
    /// Direct entries, only collected for directories accepted by `list`.
    pub entries: Vec<Item>,
}

impl DirNode {
    /// Preorder iterator over this node and every descendant.
    pub fn iter(&self) -> impl Iterator<Item = &DirNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

/// Data shared by every branch of a walk.
#[derive(Debug)]
pub struct WalkData<'a> {
    /// Number of directories read.
    pub num_dirs: AtomicUsize,
    /// Entries that vanished or could not be read mid-walk.
    pub skipped: AtomicUsize,
    pub cancel: &'a CancellationToken,
    pub max_depth: usize,
}

impl<'a> WalkData<'a> {
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            num_dirs: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            cancel,
            max_depth: MAX_WALK_DEPTH,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn num_dirs(&self) -> usize {
        self.num_dirs.load(Ordering::Relaxed)
    }

    fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Walks from `start`, entering subdirectories whose name passes `descend`
/// and stat-ing the entries of directories that pass `list`.
///
/// Returns `None` if the walk was cancelled. A start directory that cannot be
/// read yields an empty node and a skipped count.
pub fn walk_tree<D, L>(data: &WalkData, start: &Path, descend: &D, list: &L) -> Option<DirNode>
where
    D: Fn(&str) -> bool + Sync,
    L: Fn(&Path) -> bool + Sync,
{
    walk(data, start.to_path_buf(), 0, descend, list)
}

fn walk<D, L>(data: &WalkData, path: PathBuf, depth: usize, descend: &D, list: &L) -> Option<DirNode>
where
    D: Fn(&str) -> bool + Sync,
    L: Fn(&Path) -> bool + Sync,
{
    data.cancel.is_cancelled()?;
    data.num_dirs.fetch_add(1, Ordering::Relaxed);

    let read_dir = match fs::read_dir(&path) {
        Ok(iter) => iter,
        Err(error) => {
            log::debug!("walk skipped unreadable directory {}: {error}", path.display());
            data.skip();
            return Some(DirNode {
                path,
                children: Vec::new(),
                entries: Vec::new(),
            });
        }
    };

    let listed = list(&path);
    let mut entries = Vec::new();
    let mut subdirs = Vec::new();

    for (counter, entry) in read_dir.enumerate() {
        data.cancel.is_cancelled_sparse(counter)?;
        let Ok(entry) = entry else {
            data.skip();
            continue;
        };
        let child_path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            data.skip();
            continue;
        };

        if listed {
            // A vanished entry is dropped; the walk continues with the rest.
            match fs::symlink_metadata(&child_path) {
                Ok(metadata) => entries.push(Item::from_metadata(&child_path, &metadata)),
                Err(_) => {
                    data.skip();
                    continue;
                }
            }
        }

        if file_type.is_dir() && depth < data.max_depth {
            let name = entry.file_name();
            if name.to_str().is_some_and(descend) {
                subdirs.push(child_path);
            }
        }
    }

    let mut children: Vec<DirNode> = subdirs
        .into_par_iter()
        .filter_map(|child| walk(data, child, depth + 1, descend, list))
        .collect();

    data.cancel.is_cancelled()?;

    children.sort_unstable_by(|a, b| a.path.cmp(&b.path));
    entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));

    Some(DirNode {
        path,
        children,
        entries,
    })
}
