//! The single event-processing loop.
//!
//! The dispatcher thread is the only writer of the registry file, the views
//! table and the watch table. Everything reaches it through one crossbeam
//! queue: watcher events, facade commands and results of jobs it posted to
//! the rayon pool.
//!
//! Watcher events are buffered in a `Coalescer` and dispatched as one batch
//! when the window closes or a command arrives, whichever comes first. Each
//! view gets at most one change notification per batch.

mod commands;
mod walks;
mod watches;

pub(crate) use commands::{Command, Reply};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::cancel::CancellationToken;
use crate::category::{Category, CategorySet};
use crate::codec::{candidate_paths_for, canonical_path_for, categories_for_path, containing_set};
use crate::config::{Preferences, WatchBackend, COALESCE_WINDOW};
use crate::error::{dispatcher_gone, Result, TagspaceError};
use crate::filter::FilterOptions;
use crate::index::{
    is_registry_file, LocationCache, TagView, ViewChange, ViewDelta, ViewId, ViewState, WalkOutcome,
    MAX_CANDIDATE_PROBES,
};
use crate::registry::{find_category_dirs, propagate_rename, scan_category_names, CategoryRegistry};
use crate::sorter::SortOptions;
use crate::watcher::{
    minimal_cover, Coalescer, FilesystemWatcher, RawEvent, RawEventKind, WatchMode, WatcherEvent,
};
use walks::WalkScheduler;
use watches::WatchRegistry;

pub(crate) enum Message {
    Watcher(WatcherEvent),
    Command(Command),
    WalkFinished {
        filter: CategorySet,
        version: u64,
        outcome: Option<WalkOutcome>,
    },
    /// A subtree walk posted for a live view finished.
    SubtreeFinished {
        job: u64,
        outcome: Option<WalkOutcome>,
    },
    RegistryScanFinished {
        names: Option<BTreeSet<Category>>,
    },
    /// The in-use scan of a category removal finished.
    RemoveScanFinished {
        name: String,
        in_use: Option<PathBuf>,
        reply: Reply<()>,
    },
    /// A category rename pass finished; views naming either side reload.
    RenameFinished {
        old: String,
        new: String,
    },
    Shutdown,
}

impl From<WatcherEvent> for Message {
    fn from(event: WatcherEvent) -> Self {
        Self::Watcher(event)
    }
}

/// State read by the facade. Only the dispatcher writes to it.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub root: PathBuf,
    pub hidden_locations: Vec<PathBuf>,
    pub views: RwLock<FnvHashMap<ViewId, TagView>>,
    pub categories: RwLock<Vec<Category>>,
}

pub(crate) struct Dispatcher {
    shared: Arc<SharedState>,
    root: PathBuf,
    preferences: Preferences,
    backend: WatchBackend,
    registry: CategoryRegistry,
    watches: WatchRegistry,
    coalescer: Coalescer,
    walks: WalkScheduler,
    cache: LocationCache,
    subscribers: FnvHashMap<ViewId, Sender<ViewChange>>,
    next_view_id: u64,
    scan_in_flight: bool,
    flush_waiters: Vec<Reply<()>>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<SharedState>,
        preferences: Preferences,
        backend: WatchBackend,
        registry: CategoryRegistry,
        tx: Sender<Message>,
        rx: Receiver<Message>,
    ) -> Self {
        let watcher = FilesystemWatcher::new(backend, tx.clone());
        Self {
            root: shared.root.clone(),
            shared,
            preferences,
            backend,
            registry,
            watches: WatchRegistry::new(watcher),
            coalescer: Coalescer::new(COALESCE_WINDOW),
            walks: WalkScheduler::new(),
            cache: LocationCache::new(),
            subscribers: FnvHashMap::default(),
            next_view_id: 1,
            scan_in_flight: false,
            flush_waiters: Vec::new(),
            tx,
            rx,
        }
    }

    pub fn run(mut self) {
        log::info!(
            "dispatcher started root={} backend={:?}",
            self.root.display(),
            self.backend
        );
        self.start_registry_scan();

        loop {
            let message = match self.coalescer.deadline() {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(message) => Some(message),
                    Err(_) => break,
                },
            };
            match message {
                Some(Message::Shutdown) => break,
                Some(message) => self.handle(message),
                None => {}
            }
            if self.coalescer.is_due(Instant::now()) {
                self.flush_batch();
            }
            self.answer_flush_waiters();
        }

        self.stop();
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Watcher(WatcherEvent::Raw(event)) => {
                self.coalescer.push(event, Instant::now());
            }
            Message::Watcher(WatcherEvent::Error(error)) => {
                log::warn!("filesystem watcher error root={}: {error}", self.root.display());
            }
            Message::Command(command) => {
                // Commands observe every event received before them.
                self.flush_batch();
                self.handle_command(command);
            }
            Message::WalkFinished {
                filter,
                version,
                outcome,
            } => self.finish_walk(filter, version, outcome),
            Message::SubtreeFinished { job, outcome } => self.finish_subtree(job, outcome),
            Message::RegistryScanFinished { names } => {
                self.scan_in_flight = false;
                if let Some(names) = names {
                    self.register_discovered(names);
                }
            }
            Message::RemoveScanFinished {
                name,
                in_use,
                reply,
            } => {
                let result = match in_use {
                    Some(path) => Err(TagspaceError::CategoryInUse { name, path }),
                    None => self.registry.remove(&name),
                };
                self.publish_categories();
                let _ = reply.send(result);
            }
            Message::RenameFinished { old, new } => self.refresh_naming(&old, &new),
            Message::Shutdown => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        log::debug!("dispatcher command name={}", command.name());
        match command {
            Command::OpenView { filter, reply } => {
                let _ = reply.send(self.open_view(filter));
            }
            Command::CloseView { view, reply } => {
                let _ = reply.send(self.close_view(view));
            }
            Command::SetFilter {
                view,
                options,
                reply,
            } => {
                let _ = reply.send(self.update_view(view, |view| view.filter_options = options));
            }
            Command::SetSort {
                view,
                options,
                reply,
            } => {
                let _ = reply.send(self.update_view(view, |view| view.sort = options));
            }
            Command::RefreshView { view, reply } => {
                let _ = reply.send(self.refresh_view(view));
            }
            Command::AddCategory { name, reply } => {
                let result = self.registry.add(&name);
                self.publish_categories();
                let _ = reply.send(result);
            }
            Command::RemoveCategory { name, reply } => self.remove_category(name, reply),
            Command::RenameCategory { old, new, reply } => self.rename_category(old, new, reply),
            Command::MoveCategory { name, up, reply } => {
                let result = self.registry.move_category(&name, up);
                self.publish_categories();
                let _ = reply.send(result);
            }
            Command::SubscribeCategories { reply } => {
                let _ = reply.send(Ok(self.registry.subscribe()));
            }
            Command::EnsureLocation { set, reply } => {
                let _ = reply.send(self.ensure_location(&set));
            }
            Command::MoveItem { path, set, reply } => {
                let _ = reply.send(self.move_item(&path, &set));
            }
            Command::Flush { reply } => self.flush_waiters.push(reply),
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    fn open_view(&mut self, filter: CategorySet) -> Result<(ViewId, Receiver<ViewChange>)> {
        self.require_root()?;
        let id = ViewId(self.next_view_id);
        self.next_view_id += 1;

        let watch_mode = match self.backend {
            WatchBackend::Native => WatchMode::Native,
            WatchBackend::Polling => WatchMode::Polling,
            WatchBackend::Manual => WatchMode::Manual,
        };
        let sort = SortOptions {
            key: self.preferences.sort_key,
            reversed: self.preferences.reversed,
            folders_first: self.preferences.folders_first,
        };
        let filter_options = FilterOptions::new("", self.preferences.show_hidden);
        let view = TagView::new(id, filter.clone(), filter_options, sort, watch_mode);
        self.shared.views.write().insert(id, view);

        let (changes_tx, changes_rx) = unbounded();
        self.subscribers.insert(id, changes_tx);
        log::info!("view opened view={id} filter={filter}");
        self.start_walk(filter, true);
        Ok((id, changes_rx))
    }

    fn close_view(&mut self, id: ViewId) -> Result<()> {
        let mut view = self
            .shared
            .views
            .write()
            .remove(&id)
            .ok_or(TagspaceError::ViewNotFound(id.get()))?;
        self.walks.cancel_view(id);
        let delta = view.shut(ViewState::Closed);
        for dir in &delta.unwatch {
            self.watches.release(dir);
        }
        if let Some(subscriber) = self.subscribers.remove(&id) {
            let _ = subscriber.send(view.change());
        }

        let filter_in_use = self
            .shared
            .views
            .read()
            .values()
            .any(|other| other.filter() == view.filter());
        if !filter_in_use {
            self.cache.evict(view.filter());
            self.walks.forget(view.filter());
        }
        log::info!(
            "view closed view={id} watches={} cached_sets={}",
            self.watches.len(),
            self.cache.len()
        );
        Ok(())
    }

    fn update_view(&mut self, id: ViewId, update: impl FnOnce(&mut TagView)) -> Result<()> {
        let change = {
            let mut views = self.shared.views.write();
            let view = views
                .get_mut(&id)
                .ok_or(TagspaceError::ViewNotFound(id.get()))?;
            update(view);
            view.bump_revision();
            view.change()
        };
        self.notify(vec![change]);
        Ok(())
    }

    fn refresh_view(&mut self, id: ViewId) -> Result<()> {
        let filter = {
            let mut views = self.shared.views.write();
            let view = views
                .get_mut(&id)
                .ok_or(TagspaceError::ViewNotFound(id.get()))?;
            if view.state() == ViewState::Lost {
                return Err(TagspaceError::RootLost(self.root.clone()));
            }
            view.begin_refresh();
            view.filter().clone()
        };
        self.walks.cancel_view(id);
        self.require_root()?;
        log::debug!("view refresh view={id} filter={filter}");
        self.start_walk(filter, false);
        Ok(())
    }

    /// Reloads every live view whose filter names `old` or `new`.
    fn refresh_naming(&mut self, old: &str, new: &str) {
        let mut filters = BTreeSet::new();
        {
            let mut views = self.shared.views.write();
            let naming = views
                .values_mut()
                .filter(|view| view.filter().contains_name(old) || view.filter().contains_name(new))
                .filter(|view| view.state() == ViewState::Live);
            for view in naming {
                view.begin_refresh();
                self.walks.cancel_view(view.id());
                filters.insert(view.filter().clone());
            }
        }
        for filter in filters {
            self.cache.evict(&filter);
            self.start_walk(filter, false);
        }
    }

    fn start_walk(&mut self, filter: CategorySet, allow_cache: bool) {
        let cached = if allow_cache {
            self.cache
                .get(&filter)
                .cloned()
                .map(|resolution| (resolution, self.registry.all().to_vec()))
        } else {
            None
        };
        if cached.is_some() {
            log::debug!("reusing cached locations filter={filter}");
        }
        self.walks
            .start(self.root.clone(), filter, cached, self.tx.clone());
    }

    fn finish_walk(&mut self, filter: CategorySet, version: u64, outcome: Option<WalkOutcome>) {
        if !self.walks.finish(&filter, version) {
            log::debug!("discarded stale walk filter={filter} version={version}");
            return;
        }
        let Some(outcome) = outcome else {
            return;
        };

        let mut discovered = BTreeSet::new();
        let mut changes = Vec::new();
        {
            let mut views = self.shared.views.write();
            let waiting = views
                .values_mut()
                .filter(|view| view.filter() == &filter && view.state() == ViewState::Resolving);
            for view in waiting {
                // Directories whose watch is new are listed once more, so
                // entries created between the walk and the watch show up.
                let mut walks = Vec::new();
                let delta = view.install(outcome.clone());
                settle(&mut self.watches, view, delta, &mut discovered, &mut walks);

                let mut replay = ViewDelta::default();
                for event in view.take_pending() {
                    replay.merge(view.apply(&self.root, &event));
                }
                settle(&mut self.watches, view, replay, &mut discovered, &mut walks);
                post_subtree_walks(&mut self.walks, &self.root, &self.tx, view, walks);

                view.bump_revision();
                let info = view.info();
                log::info!(
                    "view resolved view={} filter={filter} items={} locations={} watched={} skipped={} mode={}",
                    info.id,
                    info.item_count,
                    info.location_count,
                    info.watched_count,
                    info.skipped,
                    info.watch_mode.as_str()
                );
                self.cache.store(&filter, view.cached_resolution());
                changes.push(view.change());
            }
        }
        self.register_discovered(discovered);
        self.notify(changes);
    }

    fn finish_subtree(&mut self, job: u64, outcome: Option<WalkOutcome>) {
        let Some(finished) = self.walks.finish_subtree(job) else {
            log::debug!("discarded cancelled subtree walk job={job}");
            return;
        };
        let Some(outcome) = outcome else {
            return;
        };

        let mut discovered = BTreeSet::new();
        let change = {
            let mut views = self.shared.views.write();
            match views.get_mut(&finished.view) {
                Some(view) if view.state() == ViewState::Live => {
                    let delta =
                        view.reconcile_subtree(&self.root, &finished.start, outcome, &finished.replay);
                    let mut walks = Vec::new();
                    let changed = settle(&mut self.watches, view, delta, &mut discovered, &mut walks);
                    post_subtree_walks(&mut self.walks, &self.root, &self.tx, view, walks);
                    if changed {
                        view.bump_revision();
                        self.cache.store(view.filter(), view.cached_resolution());
                        Some(view.change())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        self.register_discovered(discovered);
        self.notify(change.into_iter().collect());
    }

    // -----------------------------------------------------------------------
    // Event batches
    // -----------------------------------------------------------------------

    fn flush_batch(&mut self) {
        let events = self.coalescer.drain();
        if events.is_empty() {
            return;
        }
        log::debug!("dispatching batch events={}", events.len());

        let root_removed = events.iter().any(|event| {
            matches!(event.kind, RawEventKind::Deleted | RawEventKind::Renamed)
                && event.path == self.root
        });
        if root_removed || !self.root.is_dir() {
            self.lose_root();
            return;
        }

        let mut discovered = discovered_in(&self.root, &events);
        let mut changes = Vec::new();
        {
            let mut views = self.shared.views.write();
            for view in views.values_mut() {
                match view.state() {
                    ViewState::Resolving => {
                        for event in &events {
                            view.queue(event.clone());
                        }
                    }
                    ViewState::Live => {
                        let mut delta = ViewDelta::default();
                        for event in &events {
                            delta.merge(view.apply(&self.root, event));
                        }
                        self.walks.record(view.id(), &events);

                        let mut walks = Vec::new();
                        let changed =
                            settle(&mut self.watches, view, delta, &mut discovered, &mut walks);
                        post_subtree_walks(&mut self.walks, &self.root, &self.tx, view, walks);
                        if changed {
                            view.bump_revision();
                            self.cache.store(view.filter(), view.cached_resolution());
                            changes.push(view.change());
                        }
                    }
                    ViewState::Closed | ViewState::Lost => {}
                }
            }
        }
        self.register_discovered(discovered);
        self.notify(changes);
    }

    fn lose_root(&mut self) {
        log::warn!("managed root lost root={}", self.root.display());
        self.walks.cancel_all();
        self.cache.clear();

        let mut changes = Vec::new();
        {
            let mut views = self.shared.views.write();
            for view in views.values_mut() {
                if matches!(view.state(), ViewState::Lost | ViewState::Closed) {
                    continue;
                }
                let delta = view.shut(ViewState::Lost);
                for dir in &delta.unwatch {
                    self.watches.release(dir);
                }
                view.bump_revision();
                changes.push(view.change());
            }
        }
        self.watches.clear();
        self.notify(changes);
    }

    fn notify(&mut self, changes: Vec<ViewChange>) {
        for change in changes {
            let view = change.view;
            let Some(subscriber) = self.subscribers.get(&view) else {
                continue;
            };
            if subscriber.send(change).is_err() {
                log::debug!("view subscriber dropped view={view}");
                self.subscribers.remove(&view);
            }
        }
    }

    fn answer_flush_waiters(&mut self) {
        if self.flush_waiters.is_empty()
            || !self.coalescer.is_empty()
            || !self.walks.is_idle()
            || self.scan_in_flight
        {
            return;
        }
        for reply in self.flush_waiters.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    fn start_registry_scan(&mut self) {
        self.scan_in_flight = true;
        let root = self.root.clone();
        let tx = self.tx.clone();
        rayon::spawn(move || {
            let names = scan_category_names(&root, &CancellationToken::noop());
            let _ = tx.send(Message::RegistryScanFinished { names });
        });
    }

    fn register_discovered(&mut self, names: BTreeSet<Category>) {
        if names.is_empty() {
            return;
        }
        match self.registry.merge_discovered(names) {
            Ok(added) if !added.is_empty() => self.publish_categories(),
            Ok(_) => {}
            Err(error) => log::warn!("failed to register discovered categories: {error}"),
        }
    }

    fn publish_categories(&self) {
        *self.shared.categories.write() = self.registry.all().to_vec();
    }

    /// Scans for directories still using `name` on the rayon pool; the
    /// removal itself happens when the scan result comes back.
    fn remove_category(&mut self, name: String, reply: Reply<()>) {
        if let Err(error) = self.registry.require(&name) {
            let _ = reply.send(Err(error));
            return;
        }
        let root = self.root.clone();
        let tx = self.tx.clone();
        rayon::spawn(move || {
            let in_use = find_category_dirs(&root, &name, &CancellationToken::noop())
                .and_then(|dirs| dirs.into_iter().next());
            let _ = tx.send(Message::RemoveScanFinished {
                name,
                in_use,
                reply,
            });
        });
    }

    fn rename_category(&mut self, old: String, new: String, reply: Reply<Vec<PathBuf>>) {
        if let Err(error) = self.registry.rename(&old, &new) {
            let _ = reply.send(Err(error));
            return;
        }
        self.publish_categories();
        if old == new {
            let _ = reply.send(Ok(Vec::new()));
            return;
        }

        let root = self.root.clone();
        let tx = self.tx.clone();
        rayon::spawn(move || {
            let result = propagate_rename(&root, &old, &new);
            let _ = tx.send(Message::RenameFinished { old, new });
            let _ = reply.send(result);
        });
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    fn require_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(TagspaceError::RootLost(self.root.clone()))
        }
    }

    /// Returns an existing directory for `set`, creating the canonical one if
    /// no permutation exists yet.
    fn ensure_location(&mut self, set: &CategorySet) -> Result<PathBuf> {
        self.require_root()?;
        let order = self.registry.all();
        if let Some(existing) = candidate_paths_for(&self.root, set, order)
            .take(MAX_CANDIDATE_PROBES)
            .find(|candidate| candidate.is_dir())
        {
            return Ok(existing);
        }

        let canonical = canonical_path_for(&self.root, set, order);
        let mut missing: Vec<PathBuf> = canonical
            .ancestors()
            .take_while(|dir| *dir != self.root.as_path() && !dir.exists())
            .map(Path::to_path_buf)
            .collect();
        missing.reverse();
        fs::create_dir_all(&canonical)?;
        log::info!("location created filter={set} path={}", canonical.display());

        self.register_discovered(set.iter().cloned().collect());
        let now = Instant::now();
        for dir in missing {
            self.coalescer.push(RawEvent::created(dir), now);
        }
        Ok(canonical)
    }

    /// Retags an item by moving it into the location for `set`.
    fn move_item(&mut self, path: &Path, set: &CategorySet) -> Result<PathBuf> {
        self.require_root()?;
        if path == self.root
            || is_registry_file(&self.root, path)
            || containing_set(&self.root, path).is_none()
        {
            return Err(TagspaceError::InvalidPath(path.to_path_buf()));
        }
        fs::symlink_metadata(path)?;
        let name = path
            .file_name()
            .ok_or_else(|| TagspaceError::InvalidPath(path.to_path_buf()))?;

        let dir = self.ensure_location(set)?;
        // A directory cannot move into its own subtree.
        if dir.starts_with(path) {
            return Err(TagspaceError::InvalidPath(path.to_path_buf()));
        }
        let destination = dir.join(name);
        if destination == path {
            return Ok(destination);
        }
        if fs::symlink_metadata(&destination).is_ok() {
            return Err(TagspaceError::LocationOccupied(destination));
        }
        fs::rename(path, &destination)?;
        log::info!(
            "item moved from={} to={}",
            path.display(),
            destination.display()
        );
        self.coalescer
            .push(RawEvent::renamed(path, &destination), Instant::now());
        Ok(destination)
    }

    fn stop(&mut self) {
        self.walks.cancel_all();
        {
            let mut views = self.shared.views.write();
            for view in views.values_mut() {
                if view.state() != ViewState::Closed {
                    view.shut(ViewState::Closed);
                }
            }
        }
        self.watches.clear();
        for reply in self.flush_waiters.drain(..) {
            let _ = reply.send(Err(dispatcher_gone()));
        }
        log::info!("dispatcher stopped root={}", self.root.display());
    }
}

/// Carries out a view delta on the watch table. Directories that must be
/// listed again are added to `walks`: directories created under the view, and
/// directories whose watch did not exist before. Returns true if the view's
/// items changed.
fn settle(
    watches: &mut WatchRegistry,
    view: &mut TagView,
    delta: ViewDelta,
    discovered: &mut BTreeSet<Category>,
    walks: &mut Vec<PathBuf>,
) -> bool {
    let ViewDelta {
        changed,
        watch,
        unwatch,
        walk,
        discovered: found,
    } = delta;
    discovered.extend(found);

    for dir in &unwatch {
        watches.release(dir);
    }
    for dir in watch {
        if acquire_watch(watches, view, &dir) {
            walks.push(dir);
        }
    }
    // Created directories are watched before their walk is posted.
    for dir in walk {
        if view.track_watch(&dir) {
            acquire_watch(watches, view, &dir);
        }
        walks.push(dir);
    }
    changed
}

/// Takes a watch reference for `view`. Returns true if the directory was not
/// watched before and events actually get delivered for it.
fn acquire_watch(watches: &mut WatchRegistry, view: &mut TagView, dir: &Path) -> bool {
    match watches.acquire(dir) {
        Ok(mode) => {
            view.note_watch_mode(mode);
            mode != WatchMode::Manual && watches.refcount(dir) == 1
        }
        Err(error) => {
            log::debug!(
                "watch skipped view={} path={}: {error}",
                view.id(),
                dir.display()
            );
            view.forget_watch(dir);
            false
        }
    }
}

fn post_subtree_walks(
    scheduler: &mut WalkScheduler,
    root: &Path,
    tx: &Sender<Message>,
    view: &TagView,
    walks: Vec<PathBuf>,
) {
    for start in minimal_cover(walks) {
        scheduler.start_subtree(
            root.to_path_buf(),
            view.id(),
            view.filter().clone(),
            start,
            tx.clone(),
        );
    }
}

/// Category names of directories created or moved in by `events`.
fn discovered_in(root: &Path, events: &[RawEvent]) -> BTreeSet<Category> {
    events
        .iter()
        .filter_map(|event| match event.kind {
            RawEventKind::Created => Some(event.path.as_path()),
            RawEventKind::Renamed => event.new_path.as_deref(),
            RawEventKind::Deleted | RawEventKind::Modified => None,
        })
        .filter(|path| path.is_dir() && categories_for_path(root, path).is_ok())
        .filter_map(|path| path.file_name()?.to_str())
        .filter_map(|name| Category::new(name).ok())
        .collect()
}
