//! Per-view index state.
//!
//! A `TagView` owns the resolved items of one filter and knows which
//! directories it needs watched. Applying an event never touches the watcher
//! directly: it returns a `ViewDelta` and the dispatcher acts on it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use super::locations::CachedResolution;
use super::resolve::{is_registry_file, WalkOutcome};
use crate::category::{Category, CategorySet};
use crate::codec::{categories_for_path, containing_set};
use crate::filter::FilterOptions;
use crate::sorter::SortOptions;
use crate::types::Item;
use crate::watcher::{RawEvent, RawEventKind, WatchMode};

/// Handle of an open view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub(crate) u64);

impl ViewId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewState {
    Resolving,
    Live,
    Closed,
    /// The managed root disappeared.
    Lost,
}

impl ViewState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Live => "live",
            Self::Closed => "closed",
            Self::Lost => "lost",
        }
    }
}

/// Sent to a view's subscriber at most once per processed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewChange {
    pub view: ViewId,
    pub revision: u64,
    pub state: ViewState,
}

/// Snapshot of a view's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    pub id: ViewId,
    pub filter: CategorySet,
    pub state: ViewState,
    pub watch_mode: WatchMode,
    pub revision: u64,
    pub item_count: usize,
    pub location_count: usize,
    pub watched_count: usize,
    /// Entries skipped by the last walk.
    pub skipped: usize,
    pub filter_options: FilterOptions,
    pub sort: SortOptions,
}

/// Side effects the dispatcher must carry out after a view changed.
#[derive(Debug, Default)]
pub struct ViewDelta {
    /// Items changed; the revision must be bumped.
    pub changed: bool,
    pub watch: BTreeSet<PathBuf>,
    pub unwatch: BTreeSet<PathBuf>,
    /// Directories to walk and merge into the view.
    pub walk: Vec<PathBuf>,
    pub discovered: BTreeSet<Category>,
}

impl ViewDelta {
    pub fn merge(&mut self, other: ViewDelta) {
        self.changed |= other.changed;
        self.watch.extend(other.watch);
        self.unwatch.extend(other.unwatch);
        self.walk.extend(other.walk);
        self.discovered.extend(other.discovered);
    }
}

#[derive(Debug)]
pub struct TagView {
    id: ViewId,
    filter: CategorySet,
    pub(crate) filter_options: FilterOptions,
    pub(crate) sort: SortOptions,
    state: ViewState,
    watch_mode: WatchMode,
    revision: u64,
    skipped: usize,
    items: FnvHashMap<PathBuf, Item>,
    locations: BTreeSet<PathBuf>,
    watched: BTreeSet<PathBuf>,
    /// Events received while resolving, replayed after install.
    pending: Vec<RawEvent>,
}

impl TagView {
    pub fn new(
        id: ViewId,
        filter: CategorySet,
        filter_options: FilterOptions,
        sort: SortOptions,
        watch_mode: WatchMode,
    ) -> Self {
        Self {
            id,
            filter,
            filter_options,
            sort,
            state: ViewState::Resolving,
            watch_mode,
            revision: 0,
            skipped: 0,
            items: FnvHashMap::default(),
            locations: BTreeSet::new(),
            watched: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn filter(&self) -> &CategorySet {
        &self.filter
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn watch_mode(&self) -> WatchMode {
        self.watch_mode
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn item(&self, path: &Path) -> Option<&Item> {
        self.items.get(path)
    }

    pub fn locations(&self) -> &BTreeSet<PathBuf> {
        &self.locations
    }

    pub fn watched(&self) -> &BTreeSet<PathBuf> {
        &self.watched
    }

    pub fn info(&self) -> ViewInfo {
        ViewInfo {
            id: self.id,
            filter: self.filter.clone(),
            state: self.state,
            watch_mode: self.watch_mode,
            revision: self.revision,
            item_count: self.items.len(),
            location_count: self.locations.len(),
            watched_count: self.watched.len(),
            skipped: self.skipped,
            filter_options: self.filter_options.clone(),
            sort: self.sort,
        }
    }

    pub fn change(&self) -> ViewChange {
        ViewChange {
            view: self.id,
            revision: self.revision,
            state: self.state,
        }
    }

    pub fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Downgrades the reported watch mode once a directory fell back to polling.
    pub fn note_watch_mode(&mut self, mode: WatchMode) {
        if mode == WatchMode::Polling && self.watch_mode == WatchMode::Native {
            log::info!("view watch degraded to polling view={}", self.id);
            self.watch_mode = WatchMode::Polling;
        }
    }

    /// Drops a directory the dispatcher could not watch.
    pub fn forget_watch(&mut self, path: &Path) {
        self.watched.remove(path);
    }

    pub fn cached_resolution(&self) -> CachedResolution {
        CachedResolution {
            locations: self.locations.clone(),
            watched: self.watched.clone(),
        }
    }

    pub fn queue(&mut self, event: RawEvent) {
        self.pending.push(event);
    }

    pub fn take_pending(&mut self) -> Vec<RawEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Moves the view back to resolving for a reload.
    pub fn begin_refresh(&mut self) {
        if self.state == ViewState::Live {
            self.state = ViewState::Resolving;
        }
    }

    /// Replaces the view's contents with a walk result. Items whose path is
    /// unchanged keep their identity.
    pub fn install(&mut self, outcome: WalkOutcome) -> ViewDelta {
        let mut items = FnvHashMap::default();
        for mut item in outcome.items {
            if let Some(previous) = self.items.get(&item.path) {
                item.id = previous.id;
            }
            items.insert(item.path.clone(), item);
        }
        self.items = items;

        let delta = ViewDelta {
            changed: true,
            watch: outcome.watched.difference(&self.watched).cloned().collect(),
            unwatch: self.watched.difference(&outcome.watched).cloned().collect(),
            walk: Vec::new(),
            discovered: outcome.discovered,
        };
        self.watched = outcome.watched;
        self.locations = outcome.locations;
        self.skipped = outcome.skipped;
        self.state = ViewState::Live;
        delta
    }

    /// Replaces everything the view holds below `start` with a fresh walk of
    /// that subtree, then replays the events applied while the walk ran.
    /// Items whose path is unchanged keep their identity.
    pub fn reconcile_subtree(
        &mut self,
        root: &Path,
        start: &Path,
        outcome: WalkOutcome,
        replay: &[RawEvent],
    ) -> ViewDelta {
        let below = |path: &Path| path.parent().is_some_and(|parent| parent.starts_with(start));
        let previous: FnvHashMap<PathBuf, Item> = self
            .items
            .iter()
            .filter(|(path, _)| below(path.as_path()))
            .map(|(path, item)| (path.clone(), item.clone()))
            .collect();
        self.items.retain(|path, _| !below(path.as_path()));
        for item in outcome.items {
            let item = match previous.get(&item.path) {
                Some(existing) => {
                    let mut kept = existing.clone();
                    kept.refresh_from(item);
                    kept
                }
                None => item,
            };
            self.items.insert(item.path.clone(), item);
        }

        self.locations.retain(|location| !location.starts_with(start));
        self.locations.extend(outcome.locations);

        let mut delta = ViewDelta {
            discovered: outcome.discovered,
            ..ViewDelta::default()
        };
        let gone: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|dir| dir.starts_with(start) && !outcome.watched.contains(*dir))
            .cloned()
            .collect();
        for dir in gone {
            self.watched.remove(&dir);
            delta.unwatch.insert(dir);
        }
        for dir in outcome.watched {
            if self.watched.insert(dir.clone()) {
                delta.watch.insert(dir);
            }
        }
        self.skipped += outcome.skipped;

        for event in replay {
            delta.merge(self.apply(root, event));
        }

        let current = self.items.keys().filter(|path| below(path.as_path())).count();
        delta.changed |= current != previous.len()
            || previous
                .iter()
                .any(|(path, item)| self.items.get(path) != Some(item));
        delta
    }

    /// Marks a directory as watched ahead of its walk. Returns false if the
    /// view already held it.
    pub fn track_watch(&mut self, dir: &Path) -> bool {
        self.watched.insert(dir.to_path_buf())
    }

    /// Applies one coalesced event to a live view.
    pub fn apply(&mut self, root: &Path, event: &RawEvent) -> ViewDelta {
        let mut delta = ViewDelta::default();
        match (event.kind, event.new_path.as_deref()) {
            (RawEventKind::Deleted, _) => self.apply_delete(&event.path, &mut delta),
            (RawEventKind::Renamed, Some(new_path)) => {
                self.apply_rename(root, &event.path, new_path, &mut delta)
            }
            _ => self.apply_upsert(root, &event.path, &mut delta),
        }
        delta
    }

    /// Clears the view and returns every watch it held for release.
    pub fn shut(&mut self, state: ViewState) -> ViewDelta {
        self.state = state;
        self.items.clear();
        self.locations.clear();
        self.pending.clear();
        ViewDelta {
            changed: true,
            unwatch: std::mem::take(&mut self.watched),
            ..ViewDelta::default()
        }
    }

    fn matches_filter(&self, root: &Path, item_path: &Path) -> bool {
        containing_set(root, item_path).is_some_and(|set| set == self.filter)
    }

    fn wants_walk(&self, root: &Path, dir: &Path) -> bool {
        !self.watched.contains(dir)
            && categories_for_path(root, dir).is_ok_and(|set| set.is_subset(&self.filter))
    }

    fn apply_upsert(&mut self, root: &Path, path: &Path, delta: &mut ViewDelta) {
        if path == root || is_registry_file(root, path) {
            return;
        }
        let Ok(item) = Item::from_path(path) else {
            // Gone again before we got to it.
            self.apply_delete(path, delta);
            return;
        };

        if item.is_dir() {
            note_discovered(&item, delta);
            if self.wants_walk(root, path) {
                delta.walk.push(path.to_path_buf());
            }
        }

        if self.matches_filter(root, path) {
            if let Some(parent) = path.parent() {
                self.locations.insert(parent.to_path_buf());
            }
            delta.changed |= self.upsert_item(item);
        } else if self.items.remove(path).is_some() {
            delta.changed = true;
        }
    }

    fn apply_delete(&mut self, path: &Path, delta: &mut ViewDelta) {
        let before = self.items.len();
        self.items.retain(|item_path, _| !item_path.starts_with(path));
        delta.changed |= self.items.len() != before;
        self.drop_structure(path, delta);
    }

    fn apply_rename(&mut self, root: &Path, old: &Path, new: &Path, delta: &mut ViewDelta) {
        let in_place = self.items.contains_key(old)
            && self.matches_filter(root, old)
            && self.matches_filter(root, new);
        if !in_place {
            self.apply_delete(old, delta);
            self.apply_upsert(root, new, delta);
            return;
        }

        let Some(mut item) = self.items.remove(old) else {
            return;
        };
        // Contents below a renamed directory no longer have their old sets.
        self.items.retain(|item_path, _| !item_path.starts_with(old));
        self.drop_structure(old, delta);
        delta.changed = true;

        let Ok(fresh) = Item::from_path(new) else {
            return;
        };
        item.refresh_from(fresh);
        if item.is_dir() {
            note_discovered(&item, delta);
            if self.wants_walk(root, new) {
                delta.walk.push(new.to_path_buf());
            }
        }
        if let Some(parent) = new.parent() {
            self.locations.insert(parent.to_path_buf());
        }
        self.items.insert(new.to_path_buf(), item);
    }

    /// Forgets locations and watches at or below `path`.
    fn drop_structure(&mut self, path: &Path, delta: &mut ViewDelta) {
        self.locations.retain(|location| !location.starts_with(path));
        let gone: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|dir| dir.starts_with(path))
            .cloned()
            .collect();
        for dir in gone {
            self.watched.remove(&dir);
            delta.unwatch.insert(dir);
        }
    }

    /// Inserts or refreshes an item, keeping its identity. Returns true if
    /// anything visible changed.
    fn upsert_item(&mut self, item: Item) -> bool {
        match self.items.get_mut(&item.path) {
            Some(existing) => {
                let before = existing.clone();
                existing.refresh_from(item);
                *existing != before
            }
            None => {
                self.items.insert(item.path.clone(), item);
                true
            }
        }
    }
}

fn note_discovered(item: &Item, delta: &mut ViewDelta) {
    if let Ok(category) = Category::new(item.name.as_str()) {
        delta.discovered.insert(category);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::index::resolve::{resolve_filter, resolve_subtree};
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn set(names: &[&str]) -> CategorySet {
        CategorySet::parse(names.iter().copied()).unwrap()
    }

    fn live_view(root: &Path, filter: CategorySet) -> TagView {
        let mut view = TagView::new(
            ViewId(1),
            filter.clone(),
            FilterOptions::default(),
            SortOptions::default(),
            WatchMode::Manual,
        );
        let outcome = resolve_filter(root, &filter, &CancellationToken::noop()).unwrap();
        view.install(outcome);
        view
    }

    fn names(view: &TagView) -> Vec<String> {
        let mut names: Vec<String> = view.items().map(|item| item.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn created_event_is_idempotent() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));

        let path = temp.path().join("Art/cat.png");
        File::create(&path).unwrap();
        let first = view.apply(temp.path(), &RawEvent::created(&path));
        assert!(first.changed);
        let id = view.item(&path).unwrap().id;

        let second = view.apply(temp.path(), &RawEvent::created(&path));
        assert!(!second.changed);
        assert_eq!(view.item(&path).unwrap().id, id);
        assert_eq!(names(&view), vec!["cat.png"]);
    }

    #[test]
    fn created_outside_filter_is_ignored() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        fs::create_dir_all(temp.path().join("Videos")).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));

        let path = temp.path().join("Videos/clip.mp4");
        File::create(&path).unwrap();
        let delta = view.apply(temp.path(), &RawEvent::created(&path));
        assert!(!delta.changed);
        assert!(view.items().next().is_none());
    }

    #[test]
    fn created_subset_directory_requests_walk() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Pictures")).unwrap();
        let mut view = live_view(temp.path(), set(&["Pictures", "Art"]));

        let dir = temp.path().join("Pictures/Art");
        fs::create_dir(&dir).unwrap();
        let delta = view.apply(temp.path(), &RawEvent::created(&dir));
        assert_eq!(delta.walk, vec![dir]);
        assert!(delta.discovered.iter().any(|category| category.as_str() == "Art"));
    }

    #[test]
    fn delete_removes_subtree_and_watches() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Pictures/Art")).unwrap();
        File::create(temp.path().join("Pictures/Art/cat.png")).unwrap();
        let mut view = live_view(temp.path(), set(&["Pictures", "Art"]));
        assert_eq!(names(&view), vec!["cat.png"]);

        let dir = temp.path().join("Pictures");
        fs::remove_dir_all(&dir).unwrap();
        let delta = view.apply(temp.path(), &RawEvent::deleted(&dir));
        assert!(delta.changed);
        assert!(delta.unwatch.contains(&temp.path().join("Pictures/Art")));
        assert!(view.items().next().is_none());
        assert!(view.locations().is_empty());

        let again = view.apply(temp.path(), &RawEvent::deleted(&dir));
        assert!(!again.changed);
    }

    #[test]
    fn rename_within_location_keeps_identity() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        let old = temp.path().join("Art/draft.txt");
        File::create(&old).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));
        let id = view.item(&old).unwrap().id;

        let new = temp.path().join("Art/final.txt");
        fs::rename(&old, &new).unwrap();
        let delta = view.apply(temp.path(), &RawEvent::renamed(&old, &new));
        assert!(delta.changed);
        assert_eq!(view.item(&new).unwrap().id, id);
        assert_eq!(view.item(&new).unwrap().name, "final.txt");
        assert!(view.item(&old).is_none());
    }

    #[test]
    fn rename_across_sets_is_delete_plus_create() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        fs::create_dir_all(temp.path().join("Videos")).unwrap();
        let old = temp.path().join("Art/clip.mp4");
        File::create(&old).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));

        let new = temp.path().join("Videos/clip.mp4");
        fs::rename(&old, &new).unwrap();
        let delta = view.apply(temp.path(), &RawEvent::renamed(&old, &new));
        assert!(delta.changed);
        assert!(view.items().next().is_none());
    }

    #[test]
    fn install_keeps_identity_for_unchanged_paths() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        let path = temp.path().join("Art/a.txt");
        File::create(&path).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));
        let id = view.item(&path).unwrap().id;

        let outcome = resolve_filter(temp.path(), &set(&["Art"]), &CancellationToken::noop()).unwrap();
        let delta = view.install(outcome);
        assert!(delta.watch.is_empty());
        assert!(delta.unwatch.is_empty());
        assert_eq!(view.item(&path).unwrap().id, id);
    }

    #[test]
    fn reconcile_picks_up_entries_missed_before_the_watch() {
        let temp = TempDir::new().unwrap();
        let art = temp.path().join("Art");
        fs::create_dir_all(&art).unwrap();
        let kept = art.join("a.txt");
        File::create(&kept).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));
        let id = view.item(&kept).unwrap().id;

        // Created without any event reaching the view.
        File::create(art.join("b.txt")).unwrap();
        fs::create_dir(art.join("Art")).unwrap();
        File::create(art.join("Art/c.txt")).unwrap();

        let outcome = resolve_subtree(temp.path(), &art, &set(&["Art"]), &CancellationToken::noop()).unwrap();
        let delta = view.reconcile_subtree(temp.path(), &art, outcome, &[]);
        assert!(delta.changed);
        assert!(delta.watch.contains(&art.join("Art")));
        assert_eq!(names(&view), vec!["Art", "a.txt", "b.txt", "c.txt"]);
        assert_eq!(view.item(&kept).unwrap().id, id);
        assert!(view.locations().contains(&art.join("Art")));

        let outcome = resolve_subtree(temp.path(), &art, &set(&["Art"]), &CancellationToken::noop()).unwrap();
        let again = view.reconcile_subtree(temp.path(), &art, outcome, &[]);
        assert!(!again.changed);
        assert!(again.watch.is_empty());
    }

    #[test]
    fn reconcile_drops_vanished_entries_and_replays_events() {
        let temp = TempDir::new().unwrap();
        let art = temp.path().join("Art");
        fs::create_dir_all(art.join("Art")).unwrap();
        File::create(art.join("old.txt")).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));

        let outcome = {
            fs::remove_file(art.join("old.txt")).unwrap();
            fs::remove_dir(art.join("Art")).unwrap();
            resolve_subtree(temp.path(), &art, &set(&["Art"]), &CancellationToken::noop()).unwrap()
        };
        // Applied while the walk was running, then handed back for replay.
        let late = art.join("late.txt");
        File::create(&late).unwrap();

        let delta = view.reconcile_subtree(temp.path(), &art, outcome, &[RawEvent::created(&late)]);
        assert!(delta.changed);
        assert!(delta.unwatch.contains(&art.join("Art")));
        assert_eq!(names(&view), vec!["late.txt"]);
        assert!(!view.locations().contains(&art.join("Art")));
    }

    #[test]
    fn tracked_watch_is_not_requested_again() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Pictures")).unwrap();
        let mut view = live_view(temp.path(), set(&["Pictures", "Art"]));

        let dir = temp.path().join("Pictures/Art");
        fs::create_dir(&dir).unwrap();
        assert!(view.track_watch(&dir));
        assert!(!view.track_watch(&dir));

        let outcome =
            resolve_subtree(temp.path(), &dir, &set(&["Pictures", "Art"]), &CancellationToken::noop()).unwrap();
        let delta = view.reconcile_subtree(temp.path(), &dir, outcome, &[]);
        assert!(delta.watch.is_empty());
        assert!(view.locations().contains(&dir));
    }

    #[test]
    fn shut_releases_every_watch() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Art")).unwrap();
        let mut view = live_view(temp.path(), set(&["Art"]));
        let held = view.watched().len();
        let delta = view.shut(ViewState::Closed);
        assert_eq!(delta.unwatch.len(), held);
        assert_eq!(view.state(), ViewState::Closed);
        assert!(view.watched().is_empty());
    }
}
