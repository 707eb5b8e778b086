//! Tagspace - main API of the tag-space engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::category::{Category, CategorySet};
use crate::config::EngineConfig;
use crate::dispatcher::{Command, Dispatcher, Message, Reply, SharedState};
use crate::error::{canonicalize_existing_path, dispatcher_gone, Result, TagspaceError};
use crate::filter::{filter_items, FilterOptions};
use crate::index::{ViewChange, ViewId, ViewInfo, ViewState};
use crate::registry::CategoryRegistry;
use crate::sorter::{sort_items, SortKey, SortOptions};
use crate::types::Item;
use crate::watcher::{RawEvent, WatcherEvent};

/// A freshly opened view: its handle and the stream of its change
/// notifications. The first notification arrives once the view is live.
#[derive(Debug)]
pub struct OpenedView {
    pub handle: ViewId,
    pub changes: Receiver<ViewChange>,
}

/// Handle to a running engine. Dropping it stops the dispatcher thread.
pub struct Tagspace {
    shared: Arc<SharedState>,
    tx: Sender<Message>,
    dispatcher: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Tagspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tagspace")
            .field("root", &self.shared.root)
            .field("running", &self.dispatcher.is_some())
            .finish()
    }
}

impl Tagspace {
    /// Creates the managed root if needed, loads the category registry and
    /// starts the dispatcher thread.
    pub fn start(config: EngineConfig) -> Result<Self> {
        let started = Instant::now();
        fs::create_dir_all(&config.root)?;
        let root = fs::canonicalize(&config.root)?;

        let (registry, needs_rebuild) = CategoryRegistry::open(&root)?;
        registry.ensure_file()?;

        let hidden_locations = config
            .preferences
            .hidden_locations
            .iter()
            .map(|location| {
                if location.is_absolute() {
                    canonicalize_existing_path(location.clone())
                } else {
                    root.join(location)
                }
            })
            .collect();
        let categories = registry.all().to_vec();
        let category_count = categories.len();

        let shared = Arc::new(SharedState {
            root: root.clone(),
            hidden_locations,
            views: RwLock::new(FnvHashMap::default()),
            categories: RwLock::new(categories),
        });

        let (tx, rx) = unbounded();
        let dispatcher = Dispatcher::new(
            shared.clone(),
            config.preferences,
            config.watch_backend,
            registry,
            tx.clone(),
            rx,
        );
        let handle = thread::Builder::new()
            .name("tagspace-dispatcher".to_string())
            .spawn(move || dispatcher.run())?;

        log::info!(
            "tagspace started root={} categories={category_count} rebuild={needs_rebuild} elapsed_ms={}",
            root.display(),
            started.elapsed().as_millis()
        );
        Ok(Self {
            shared,
            tx,
            dispatcher: Some(handle),
        })
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn open_view(&self, filter: CategorySet) -> Result<OpenedView> {
        let (handle, changes) = self.request(|reply| Command::OpenView { filter, reply })?;
        Ok(OpenedView { handle, changes })
    }

    pub fn close_view(&self, view: ViewId) -> Result<()> {
        self.request(|reply| Command::CloseView { view, reply })
    }

    pub fn set_filter(&self, view: ViewId, search: &str, show_hidden: bool) -> Result<()> {
        let options = FilterOptions::new(search, show_hidden);
        self.request(|reply| Command::SetFilter {
            view,
            options,
            reply,
        })
    }

    pub fn set_sort(
        &self,
        view: ViewId,
        key: SortKey,
        reversed: bool,
        folders_first: bool,
    ) -> Result<()> {
        let options = SortOptions {
            key,
            reversed,
            folders_first,
        };
        self.request(|reply| Command::SetSort {
            view,
            options,
            reply,
        })
    }

    /// Re-runs the walk of a view, replacing its items once it completes.
    pub fn refresh_view(&self, view: ViewId) -> Result<()> {
        self.request(|reply| Command::RefreshView { view, reply })
    }

    /// The visible items of a view, filtered and sorted.
    pub fn current_items(&self, view: ViewId) -> Result<Vec<Item>> {
        let (visible, sort) = {
            let views = self.shared.views.read();
            let state = views
                .get(&view)
                .ok_or(TagspaceError::ViewNotFound(view.get()))?;
            if state.state() == ViewState::Lost {
                return Err(TagspaceError::RootLost(self.shared.root.clone()));
            }
            let visible = filter_items(
                state.items(),
                &state.filter_options,
                &self.shared.hidden_locations,
            );
            (visible, state.sort)
        };
        Ok(sort_items(visible, sort))
    }

    pub fn view_info(&self, view: ViewId) -> Result<ViewInfo> {
        self.shared
            .views
            .read()
            .get(&view)
            .map(|state| state.info())
            .ok_or(TagspaceError::ViewNotFound(view.get()))
    }

    // -----------------------------------------------------------------------
    // Categories
    // -----------------------------------------------------------------------

    /// Registered categories in registry order.
    pub fn categories(&self) -> Vec<Category> {
        self.shared.categories.read().clone()
    }

    /// Receives the full ordered list after every registry mutation.
    pub fn subscribe_categories(&self) -> Result<Receiver<Vec<Category>>> {
        self.request(|reply| Command::SubscribeCategories { reply })
    }

    /// Returns false if the category was already registered.
    pub fn add_category(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.request(|reply| Command::AddCategory { name, reply })
    }

    pub fn remove_category(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| Command::RemoveCategory { name, reply })
    }

    /// Renames a category in the registry and in every directory using it.
    /// Returns the renamed directories.
    pub fn rename_category(&self, old: &str, new: &str) -> Result<Vec<PathBuf>> {
        let old = old.to_string();
        let new = new.to_string();
        self.request(|reply| Command::RenameCategory { old, new, reply })
    }

    pub fn move_category(&self, name: &str, up: bool) -> Result<bool> {
        let name = name.to_string();
        self.request(|reply| Command::MoveCategory { name, up, reply })
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    /// Directory to write items tagged with `set` into, created if missing.
    pub fn ensure_location(&self, set: &CategorySet) -> Result<PathBuf> {
        let set = set.clone();
        self.request(|reply| Command::EnsureLocation { set, reply })
    }

    /// Retags an item by moving it into the location for `set`.
    pub fn move_item(&self, path: &Path, set: &CategorySet) -> Result<PathBuf> {
        let path = path.to_path_buf();
        let set = set.clone();
        self.request(|reply| Command::MoveItem { path, set, reply })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Feeds a filesystem event to the dispatcher as if a watcher reported it.
    pub fn inject_event(&self, event: RawEvent) -> Result<()> {
        self.tx
            .send(Message::Watcher(WatcherEvent::Raw(event)))
            .map_err(|_| dispatcher_gone())
    }

    /// Blocks until every event received so far is applied and no walk is
    /// in flight.
    pub fn flush(&self) -> Result<()> {
        self.request(|reply| Command::Flush { reply })
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.dispatcher.take() else {
            return Ok(());
        };
        let _ = self.tx.send(Message::Shutdown);
        handle
            .join()
            .map_err(|_| TagspaceError::Internal("dispatcher thread panicked".to_string()))
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = bounded(1);
        self.tx
            .send(Message::Command(build(reply)))
            .map_err(|_| dispatcher_gone())?;
        response.recv().map_err(|_| dispatcher_gone())?
    }
}

impl Drop for Tagspace {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            log::error!("failed to stop tagspace: {error}");
        }
    }
}
