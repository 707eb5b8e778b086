//! Reference-counted directory watches.

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::error::{Result, TagspaceError};
use crate::watcher::{FilesystemWatcher, WatchMode, WatchSubscription};

#[derive(Debug)]
struct WatchEntry {
    subscription: WatchSubscription,
    refcount: usize,
}

/// Table of watched directory -> (subscription, refcount). Every view holds
/// one reference per directory it needs.
#[derive(Debug)]
pub(crate) struct WatchRegistry {
    watcher: FilesystemWatcher,
    entries: FnvHashMap<PathBuf, WatchEntry>,
}

impl WatchRegistry {
    pub fn new(watcher: FilesystemWatcher) -> Self {
        Self {
            watcher,
            entries: FnvHashMap::default(),
        }
    }

    /// Takes a reference on `dir`, watching it on first use. Falls back to
    /// polling when the native backend cannot serve the directory.
    pub fn acquire(&mut self, dir: &Path) -> Result<WatchMode> {
        if let Some(entry) = self.entries.get_mut(dir) {
            entry.refcount += 1;
            return Ok(entry.subscription.mode);
        }

        let subscription = match self.watcher.watch(dir) {
            Ok(subscription) => subscription,
            Err(TagspaceError::WatchUnavailable { reason, .. }) => {
                log::warn!(
                    "native watch unavailable path={} reason={reason}; falling back to polling",
                    dir.display()
                );
                self.watcher.watch_polling(dir)?
            }
            Err(error) => return Err(error),
        };
        let mode = subscription.mode;
        self.entries.insert(
            dir.to_path_buf(),
            WatchEntry {
                subscription,
                refcount: 1,
            },
        );
        Ok(mode)
    }

    /// Drops a reference on `dir`, unwatching it when none remain.
    pub fn release(&mut self, dir: &Path) {
        let Some(entry) = self.entries.get_mut(dir) else {
            log::debug!("release of unwatched directory path={}", dir.display());
            return;
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            if let Some(entry) = self.entries.remove(dir) {
                self.watcher.unwatch(&entry.subscription);
            }
        }
    }

    /// Unwatches everything regardless of reference counts.
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            self.watcher.unwatch(&entry.subscription);
        }
    }

    pub fn refcount(&self, dir: &Path) -> usize {
        self.entries.get(dir).map_or(0, |entry| entry.refcount)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchBackend;
    use crate::watcher::WatcherEvent;
    use crossbeam_channel::unbounded;

    fn manual_registry() -> WatchRegistry {
        let (tx, _rx) = unbounded::<WatcherEvent>();
        WatchRegistry::new(FilesystemWatcher::new(WatchBackend::Manual, tx))
    }

    #[test]
    fn references_are_counted_per_directory() {
        let mut watches = manual_registry();
        let dir = Path::new("/r/Art");
        assert_eq!(watches.acquire(dir).unwrap(), WatchMode::Manual);
        watches.acquire(dir).unwrap();
        assert_eq!(watches.refcount(dir), 2);

        watches.release(dir);
        assert_eq!(watches.refcount(dir), 1);
        watches.release(dir);
        assert_eq!(watches.len(), 0);

        // Extra releases are ignored.
        watches.release(dir);
        assert_eq!(watches.refcount(dir), 0);
    }

    #[test]
    fn unavailable_native_watch_falls_back_to_polling() {
        let temp = tempfile::TempDir::new().unwrap();
        let (tx, _rx) = unbounded::<WatcherEvent>();
        let watcher =
            FilesystemWatcher::new(WatchBackend::Native, tx).without_native("no inotify");
        let mut watches = WatchRegistry::new(watcher);

        assert_eq!(watches.acquire(temp.path()).unwrap(), WatchMode::Polling);
        // Later references share the polling subscription.
        assert_eq!(watches.acquire(temp.path()).unwrap(), WatchMode::Polling);
        assert_eq!(watches.refcount(temp.path()), 2);
        watches.clear();
    }

    #[test]
    fn clear_drops_everything() {
        let mut watches = manual_registry();
        watches.acquire(Path::new("/r")).unwrap();
        watches.acquire(Path::new("/r/A")).unwrap();
        watches.clear();
        assert_eq!(watches.len(), 0);
    }
}
