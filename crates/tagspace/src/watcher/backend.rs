//! Native and polling watch backends.
//!
//! One shared `RecommendedWatcher` serves every directory so that the two
//! halves of a move between watched directories reach the same callback and
//! can be paired. The polling backend is created on first use.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};

use super::events::{translate_event, WatcherEvent};
use crate::config::WatchBackend;
use crate::error::{Result, TagspaceError};

/// Scan interval of the polling backend.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How a directory (and therefore a view) is being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    Native,
    Polling,
    Manual,
}

impl WatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Polling => "polling",
            Self::Manual => "manual",
        }
    }
}

/// A directory watch held by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSubscription {
    pub path: PathBuf,
    pub mode: WatchMode,
}

type EventSink = Arc<dyn Fn(WatcherEvent) + Send + Sync>;

pub struct FilesystemWatcher {
    backend: WatchBackend,
    sink: EventSink,
    native: Option<RecommendedWatcher>,
    /// Set once creating the native backend failed; no retry after that.
    native_unavailable: Option<String>,
    polling: Option<PollWatcher>,
}

impl std::fmt::Debug for FilesystemWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemWatcher")
            .field("backend", &self.backend)
            .field("native", &self.native.is_some())
            .field("polling", &self.polling.is_some())
            .finish()
    }
}

impl FilesystemWatcher {
    /// Creates a watcher that forwards events into `event_tx`.
    pub fn new<M>(backend: WatchBackend, event_tx: Sender<M>) -> Self
    where
        M: From<WatcherEvent> + Send + 'static,
    {
        let sink: EventSink = Arc::new(move |event| {
            let _ = event_tx.send(M::from(event));
        });
        Self {
            backend,
            sink,
            native: None,
            native_unavailable: None,
            polling: None,
        }
    }

    /// Behaves as if the native backend had failed to start.
    #[cfg(test)]
    pub(crate) fn without_native(mut self, reason: &str) -> Self {
        self.native_unavailable = Some(reason.to_string());
        self
    }

    /// Watches `path` non-recursively with the configured backend.
    ///
    /// Fails with `WatchUnavailable` when the native backend cannot be set up
    /// or the OS watch limit is reached. Callers fall back to `watch_polling`.
    pub fn watch(&mut self, path: &Path) -> Result<WatchSubscription> {
        match self.backend {
            WatchBackend::Manual => Ok(WatchSubscription {
                path: path.to_path_buf(),
                mode: WatchMode::Manual,
            }),
            WatchBackend::Polling => self.watch_polling(path),
            WatchBackend::Native => {
                let watcher = self.native_watcher(path)?;
                watcher
                    .watch(path, RecursiveMode::NonRecursive)
                    .map_err(|error| map_watch_error(path, error))?;
                Ok(WatchSubscription {
                    path: path.to_path_buf(),
                    mode: WatchMode::Native,
                })
            }
        }
    }

    /// Watches `path` with the polling backend.
    pub fn watch_polling(&mut self, path: &Path) -> Result<WatchSubscription> {
        if self.polling.is_none() {
            let sink = self.sink.clone();
            let config = notify::Config::default().with_poll_interval(POLL_INTERVAL);
            let watcher = PollWatcher::new(move |result| forward(&sink, result), config)
                .map_err(|error| TagspaceError::WatchUnavailable {
                    path: path.to_path_buf(),
                    reason: error.to_string(),
                })?;
            log::info!("polling watcher started interval_ms={}", POLL_INTERVAL.as_millis());
            self.polling = Some(watcher);
        }
        let Some(watcher) = self.polling.as_mut() else {
            return Err(TagspaceError::Internal("polling watcher missing".to_string()));
        };
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|error| map_watch_error(path, error))?;
        Ok(WatchSubscription {
            path: path.to_path_buf(),
            mode: WatchMode::Polling,
        })
    }

    /// Releases a subscription. Directories that already vanished are fine.
    pub fn unwatch(&mut self, subscription: &WatchSubscription) {
        let result = match subscription.mode {
            WatchMode::Manual => return,
            WatchMode::Native => self.native.as_mut().map(|w| w.unwatch(&subscription.path)),
            WatchMode::Polling => self.polling.as_mut().map(|w| w.unwatch(&subscription.path)),
        };
        if let Some(Err(error)) = result {
            log::debug!(
                "unwatch failed path={} mode={}: {error}",
                subscription.path.display(),
                subscription.mode.as_str()
            );
        }
    }

    fn native_watcher(&mut self, path: &Path) -> Result<&mut RecommendedWatcher> {
        if let Some(reason) = &self.native_unavailable {
            return Err(TagspaceError::WatchUnavailable {
                path: path.to_path_buf(),
                reason: reason.clone(),
            });
        }
        if self.native.is_none() {
            let sink = self.sink.clone();
            match notify::recommended_watcher(move |result| forward(&sink, result)) {
                Ok(watcher) => self.native = Some(watcher),
                Err(error) => {
                    log::warn!("native filesystem watcher unavailable: {error}");
                    self.native_unavailable = Some(error.to_string());
                    return Err(TagspaceError::WatchUnavailable {
                        path: path.to_path_buf(),
                        reason: error.to_string(),
                    });
                }
            }
        }
        self.native
            .as_mut()
            .ok_or_else(|| TagspaceError::Internal("native watcher missing".to_string()))
    }
}

fn forward(sink: &EventSink, result: notify::Result<notify::Event>) {
    match result {
        Ok(event) => {
            for raw in translate_event(event) {
                sink(WatcherEvent::Raw(raw));
            }
        }
        Err(error) => sink(WatcherEvent::Error(error.to_string())),
    }
}

/// A vanished directory is reported as not-found I/O so the caller can
/// ignore it; everything else means the backend cannot serve the path.
fn map_watch_error(path: &Path, error: notify::Error) -> TagspaceError {
    match error.kind {
        notify::ErrorKind::PathNotFound => TagspaceError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )),
        notify::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            TagspaceError::Io(io)
        }
        other => TagspaceError::WatchUnavailable {
            path: path.to_path_buf(),
            reason: format!("{other:?}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use tempfile::TempDir;

    #[test]
    fn manual_backend_never_touches_the_os() {
        let (tx, _rx) = unbounded::<WatcherEvent>();
        let mut watcher = FilesystemWatcher::new(WatchBackend::Manual, tx);
        let subscription = watcher.watch(Path::new("/does/not/exist")).unwrap();
        assert_eq!(subscription.mode, WatchMode::Manual);
        watcher.unwatch(&subscription);
    }

    #[test]
    fn polling_backend_reports_mode() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = unbounded::<WatcherEvent>();
        let mut watcher = FilesystemWatcher::new(WatchBackend::Polling, tx);
        let subscription = watcher.watch(temp.path()).unwrap();
        assert_eq!(subscription.mode, WatchMode::Polling);
        watcher.unwatch(&subscription);
    }

    #[test]
    fn unavailable_native_backend_is_reported() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = unbounded::<WatcherEvent>();
        let mut watcher =
            FilesystemWatcher::new(WatchBackend::Native, tx).without_native("inotify limit");
        let error = watcher.watch(temp.path()).unwrap_err();
        assert!(
            matches!(&error, TagspaceError::WatchUnavailable { reason, .. } if reason == "inotify limit"),
            "{error:?}"
        );
        let subscription = watcher.watch_polling(temp.path()).unwrap();
        assert_eq!(subscription.mode, WatchMode::Polling);
        watcher.unwatch(&subscription);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = unbounded::<WatcherEvent>();
        let mut watcher = FilesystemWatcher::new(WatchBackend::Native, tx);
        let error = watcher.watch(&temp.path().join("missing")).unwrap_err();
        assert!(
            matches!(error, TagspaceError::Io(_) | TagspaceError::WatchUnavailable { .. }),
            "{error:?}"
        );
    }
}
