//! The category registry file and category-wide directory operations.
//!
//! The registry is a newline-terminated list of category names stored in
//! `.tagspace` at the managed root. It is always written in full through a
//! temp file in the root followed by an atomic replace.

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::cancel::CancellationToken;
use crate::category::{Category, REGISTRY_FILE_NAME};
use crate::codec::is_category_directory;
use crate::error::{Result, TagspaceError};
use crate::walk::{walk_tree, WalkData};

#[derive(Debug)]
pub struct CategoryRegistry {
    root: PathBuf,
    file: PathBuf,
    categories: Vec<Category>,
    subscribers: Vec<Sender<Vec<Category>>>,
}

impl CategoryRegistry {
    /// Reads the registry of `root`. A missing file is an empty registry.
    pub fn load(root: &Path) -> Result<Self> {
        let file = root.join(REGISTRY_FILE_NAME);
        let categories = match fs::read(&file) {
            Ok(bytes) => parse_registry(&file, bytes)?,
            Err(error) if error.kind() == ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };
        Ok(Self {
            root: root.to_path_buf(),
            file,
            categories,
            subscribers: Vec::new(),
        })
    }

    /// Like `load`, but recovers from a corrupt file by starting empty.
    ///
    /// The returned flag is true when the registry must be rebuilt from the
    /// directory tree.
    pub fn open(root: &Path) -> Result<(Self, bool)> {
        match Self::load(root) {
            Ok(registry) => Ok((registry, false)),
            Err(TagspaceError::RegistryCorrupt { path, reason }) => {
                log::warn!(
                    "category registry corrupt path={} reason={reason}; rebuilding from tree",
                    path.display()
                );
                let registry = Self {
                    root: root.to_path_buf(),
                    file: path,
                    categories: Vec::new(),
                    subscribers: Vec::new(),
                };
                registry.persist()?;
                Ok((registry, true))
            }
            Err(error) => Err(error),
        }
    }

    /// Writes the registry file if it does not exist yet.
    pub fn ensure_file(&self) -> Result<()> {
        if self.file.exists() {
            return Ok(());
        }
        self.persist()
    }

    /// Categories in registry order.
    pub fn all(&self) -> &[Category] {
        &self.categories
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.categories
            .iter()
            .position(|category| category.as_str() == name)
    }

    /// Registers `name`. Returns false if it was already registered.
    pub fn add(&mut self, name: &str) -> Result<bool> {
        let category = Category::new(name)?;
        if self.contains(name) {
            return Ok(false);
        }
        self.categories.push(category);
        self.commit()?;
        log::info!("category added name={name}");
        Ok(true)
    }

    /// Fails unless `name` is a registered category.
    pub fn require(&self, name: &str) -> Result<()> {
        Category::new(name)?;
        if self.contains(name) {
            Ok(())
        } else {
            Err(TagspaceError::UnknownCategory(name.to_string()))
        }
    }

    /// Unregisters `name`. Whether a directory still uses it is checked by
    /// the caller with `find_category_dirs`, off the dispatcher thread.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.require(name)?;
        self.categories.retain(|category| category.as_str() != name);
        self.commit()?;
        log::info!("category removed name={name}");
        Ok(())
    }

    /// Renames `old` to `new` in the registry, keeping its position.
    ///
    /// Directories are not touched; see [`propagate_rename`].
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let renamed = Category::new(new)?;
        let index = self
            .position(old)
            .ok_or_else(|| TagspaceError::UnknownCategory(old.to_string()))?;
        if old == new {
            return Ok(());
        }
        if self.contains(new) {
            return Err(TagspaceError::CategoryExists(new.to_string()));
        }
        self.categories[index] = renamed;
        self.commit()?;
        log::info!("category renamed old={old} new={new}");
        Ok(())
    }

    /// Swaps `name` with its neighbour. Returns false at either end.
    pub fn move_category(&mut self, name: &str, up: bool) -> Result<bool> {
        let index = self
            .position(name)
            .ok_or_else(|| TagspaceError::UnknownCategory(name.to_string()))?;
        let neighbour = if up {
            index.checked_sub(1)
        } else {
            Some(index + 1).filter(|next| *next < self.categories.len())
        };
        let Some(neighbour) = neighbour else {
            return Ok(false);
        };
        self.categories.swap(index, neighbour);
        self.commit()?;
        Ok(true)
    }

    /// Registers every name not yet known, in lexicographic order, with a
    /// single write. Returns the newly registered categories.
    pub fn merge_discovered<I>(&mut self, names: I) -> Result<Vec<Category>>
    where
        I: IntoIterator<Item = Category>,
    {
        let batch: BTreeSet<Category> = names
            .into_iter()
            .filter(|category| !self.contains(category.as_str()))
            .collect();
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let added: Vec<Category> = batch.into_iter().collect();
        self.categories.extend(added.iter().cloned());
        self.commit()?;
        log::debug!("registered discovered categories count={}", added.len());
        Ok(added)
    }

    /// Returns a channel that receives the ordered list after each mutation.
    pub fn subscribe(&mut self) -> Receiver<Vec<Category>> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn commit(&mut self) -> Result<()> {
        self.persist()?;
        let snapshot = self.categories.clone();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let mut contents = String::new();
        for category in &self.categories {
            contents.push_str(category.as_str());
            contents.push('\n');
        }

        let mut temp = tempfile::NamedTempFile::new_in(&self.root).map_err(|error| {
            TagspaceError::Internal(format!(
                "failed to create temp registry in {}: {error}",
                self.root.display()
            ))
        })?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.file).map_err(|error| {
            TagspaceError::Internal(format!(
                "failed to replace registry {}: {}",
                self.file.display(),
                error.error
            ))
        })?;
        log::debug!(
            "persisted category registry path={} count={}",
            self.file.display(),
            self.categories.len()
        );
        Ok(())
    }
}

fn parse_registry(path: &Path, bytes: Vec<u8>) -> Result<Vec<Category>> {
    let corrupt = |reason: String| TagspaceError::RegistryCorrupt {
        path: path.to_path_buf(),
        reason,
    };
    let text = String::from_utf8(bytes).map_err(|error| corrupt(error.to_string()))?;

    let mut seen = BTreeSet::new();
    let mut categories = Vec::new();
    for (line_number, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let category = Category::new(line)
            .map_err(|error| corrupt(format!("line {}: {error}", line_number + 1)))?;
        if seen.insert(category.clone()) {
            categories.push(category);
        }
    }
    Ok(categories)
}

/// Every distinct category name used by a directory below `root`.
///
/// Returns `None` if cancelled.
pub fn scan_category_names(root: &Path, cancel: &CancellationToken) -> Option<BTreeSet<Category>> {
    let data = WalkData::new(cancel);
    let tree = walk_tree(&data, root, &is_category_directory, &|_: &Path| false)?;
    let names = tree
        .iter()
        .filter(|node| node.path != root)
        .filter_map(|node| node.path.file_name()?.to_str())
        .filter_map(|name| Category::new(name).ok())
        .collect();
    if data.skipped() > 0 {
        log::debug!("category scan skipped entries count={}", data.skipped());
    }
    Some(names)
}

/// Every directory below `root` named `name`, in walk order.
pub fn find_category_dirs(root: &Path, name: &str, cancel: &CancellationToken) -> Option<Vec<PathBuf>> {
    let data = WalkData::new(cancel);
    let tree = walk_tree(&data, root, &is_category_directory, &|_: &Path| false)?;
    Some(
        tree.iter()
            .filter(|node| node.path != root)
            .filter(|node| node.path.file_name().and_then(|value| value.to_str()) == Some(name))
            .map(|node| node.path.clone())
            .collect(),
    )
}

/// Renames every directory called `old` to `new`, deepest first.
///
/// Collisions and I/O failures are collected, never rolled back. Returns the
/// renamed directories (new paths) or `PartialRenamePropagation`.
pub fn propagate_rename(root: &Path, old: &str, new: &str) -> Result<Vec<PathBuf>> {
    let cancel = CancellationToken::noop();
    let mut dirs = find_category_dirs(root, old, &cancel).unwrap_or_default();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

    let mut renamed = Vec::new();
    let mut failed = Vec::new();
    for dir in dirs {
        let target = dir.with_file_name(new);
        if fs::symlink_metadata(&target).is_ok() {
            log::warn!(
                "category rename collision path={} target={}",
                dir.display(),
                target.display()
            );
            failed.push((dir, format!("{} already exists", target.display())));
            continue;
        }
        match fs::rename(&dir, &target) {
            Ok(()) => renamed.push(target),
            Err(error) => {
                log::warn!("category rename failed path={}: {error}", dir.display());
                failed.push((dir, error.to_string()));
            }
        }
    }

    log::info!(
        "category rename pass old={old} new={new} renamed={} failed={}",
        renamed.len(),
        failed.len()
    );
    if failed.is_empty() {
        Ok(renamed)
    } else {
        Err(TagspaceError::PartialRenamePropagation { renamed, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(registry: &CategoryRegistry) -> Vec<&str> {
        registry.all().iter().map(Category::as_str).collect()
    }

    #[test]
    fn missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let registry = CategoryRegistry::load(temp.path()).unwrap();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn add_persists_in_insertion_order() {
        let temp = TempDir::new().unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        assert!(registry.add("Pictures").unwrap());
        assert!(registry.add("Art").unwrap());
        assert!(!registry.add("Pictures").unwrap());

        let raw = fs::read_to_string(temp.path().join(REGISTRY_FILE_NAME)).unwrap();
        assert_eq!(raw, "Pictures\nArt\n");
        let reloaded = CategoryRegistry::load(temp.path()).unwrap();
        assert_eq!(names(&reloaded), vec!["Pictures", "Art"]);
    }

    #[test]
    fn add_rejects_invalid_names() {
        let temp = TempDir::new().unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        assert!(matches!(
            registry.add("a/b"),
            Err(TagspaceError::InvalidCategoryName { .. })
        ));
    }

    #[test]
    fn corrupt_file_fails_load_and_recovers_on_open() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(REGISTRY_FILE_NAME), b"Art\n\xff\xfe\n").unwrap();
        assert!(matches!(
            CategoryRegistry::load(temp.path()),
            Err(TagspaceError::RegistryCorrupt { .. })
        ));

        let (registry, needs_rebuild) = CategoryRegistry::open(temp.path()).unwrap();
        assert!(needs_rebuild);
        assert!(registry.all().is_empty());
        assert!(CategoryRegistry::load(temp.path()).is_ok());
    }

    #[test]
    fn invalid_line_is_corrupt() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(REGISTRY_FILE_NAME), "Art\n.hidden\n").unwrap();
        assert!(matches!(
            CategoryRegistry::load(temp.path()),
            Err(TagspaceError::RegistryCorrupt { .. })
        ));
    }

    #[test]
    fn remove_checks_registration_and_usage() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Pictures/Art")).unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        registry.add("Art").unwrap();
        registry.add("Old").unwrap();

        let cancel = CancellationToken::noop();
        let in_use = find_category_dirs(temp.path(), "Art", &cancel).unwrap();
        assert_eq!(in_use, vec![temp.path().join("Pictures/Art")]);
        assert!(find_category_dirs(temp.path(), "Old", &cancel).unwrap().is_empty());

        registry.remove("Old").unwrap();
        assert_eq!(names(&registry), vec!["Art"]);
        assert!(matches!(
            registry.remove("Missing"),
            Err(TagspaceError::UnknownCategory(_))
        ));
        assert!(matches!(
            registry.require("Old"),
            Err(TagspaceError::UnknownCategory(_))
        ));
    }

    #[test]
    fn rename_keeps_position_and_rejects_existing() {
        let temp = TempDir::new().unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        registry.add("Pictures").unwrap();
        registry.add("Art").unwrap();
        registry.add("Videos").unwrap();

        registry.rename("Art", "Artwork").unwrap();
        assert_eq!(names(&registry), vec!["Pictures", "Artwork", "Videos"]);
        assert!(matches!(
            registry.rename("Artwork", "Videos"),
            Err(TagspaceError::CategoryExists(_))
        ));
        assert!(matches!(
            registry.rename("Nope", "Other"),
            Err(TagspaceError::UnknownCategory(_))
        ));
    }

    #[test]
    fn move_category_swaps_neighbours() {
        let temp = TempDir::new().unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        for name in ["A", "B", "C"] {
            registry.add(name).unwrap();
        }
        assert!(registry.move_category("C", true).unwrap());
        assert_eq!(names(&registry), vec!["A", "C", "B"]);
        assert!(!registry.move_category("A", true).unwrap());
        assert!(!registry.move_category("B", false).unwrap());
    }

    #[test]
    fn subscribers_see_every_mutation() {
        let temp = TempDir::new().unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        let changes = registry.subscribe();
        registry.add("Art").unwrap();
        registry.add("Art").unwrap();
        registry.add("Zoo").unwrap();
        let first = changes.try_recv().unwrap();
        let second = changes.try_recv().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn merge_discovered_appends_sorted_batch_once() {
        let temp = TempDir::new().unwrap();
        let mut registry = CategoryRegistry::load(temp.path()).unwrap();
        registry.add("Zoo").unwrap();
        let changes = registry.subscribe();
        let discovered = ["Videos", "Art", "Zoo"].map(|name| Category::new(name).unwrap());
        let added = registry.merge_discovered(discovered).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(names(&registry), vec!["Zoo", "Art", "Videos"]);
        assert!(changes.try_recv().is_ok());
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn scan_finds_nested_names_and_skips_dot_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Pictures/Art")).unwrap();
        fs::create_dir_all(temp.path().join("Videos/Art")).unwrap();
        fs::create_dir_all(temp.path().join(".trash/Junk")).unwrap();
        fs::write(temp.path().join("Pictures/file.txt"), b"").unwrap();

        let found = scan_category_names(temp.path(), &CancellationToken::noop()).unwrap();
        let found: Vec<_> = found.iter().map(Category::as_str).collect();
        assert_eq!(found, vec!["Art", "Pictures", "Videos"]);
    }

    #[test]
    fn propagate_rename_reports_collisions() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Pictures/Art/Art")).unwrap();
        fs::create_dir_all(temp.path().join("Videos/Art")).unwrap();
        fs::create_dir_all(temp.path().join("Videos/Artwork")).unwrap();

        let error = propagate_rename(temp.path(), "Art", "Artwork").unwrap_err();
        let TagspaceError::PartialRenamePropagation { renamed, failed } = error else {
            panic!("unexpected error");
        };
        assert_eq!(renamed.len(), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, temp.path().join("Videos/Art"));
        assert!(temp.path().join("Pictures/Artwork/Artwork").is_dir());
        assert!(temp.path().join("Videos/Art").is_dir());
    }

    #[test]
    fn propagate_rename_without_collisions() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        let renamed = propagate_rename(temp.path(), "Art", "Artwork").unwrap();
        assert_eq!(renamed, vec![temp.path().join("Artwork")]);
    }
}
