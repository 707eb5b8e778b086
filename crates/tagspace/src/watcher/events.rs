//! Raw change events and their translation from `notify`.
//!
//! Watcher callbacks never touch view state. They translate each `notify`
//! event into `RawEvent`s and send them through a crossbeam channel; the
//! dispatcher thread is the sole consumer.

use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Created,
    Deleted,
    Renamed,
    Modified,
}

impl RawEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Modified => "modified",
        }
    }
}

/// A single filesystem change. `new_path` is set only for `Renamed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
    pub new_path: Option<PathBuf>,
}

impl RawEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::simple(RawEventKind::Created, path.into())
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::simple(RawEventKind::Deleted, path.into())
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::simple(RawEventKind::Modified, path.into())
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: RawEventKind::Renamed,
            path: from.into(),
            new_path: Some(to.into()),
        }
    }

    fn simple(kind: RawEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            new_path: None,
        }
    }

    /// Every path this event touches.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.new_path.as_deref())
    }
}

/// An event sent from a watcher backend to the dispatcher.
#[derive(Debug)]
pub enum WatcherEvent {
    Raw(RawEvent),
    /// The backend reported an error; the loop logs it and keeps going.
    Error(String),
}

/// Translates one `notify` event. Access events are dropped.
pub fn translate_event(event: Event) -> Vec<RawEvent> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => paths.into_iter().map(RawEvent::created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(RawEvent::deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(paths, mode),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            paths.into_iter().map(RawEvent::modified).collect()
        }
    }
}

fn translate_rename(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<RawEvent> {
    match mode {
        RenameMode::Both => {
            let mut paths = paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![RawEvent::renamed(from, to)],
                (Some(path), None) => vec![by_existence(path)],
                _ => Vec::new(),
            }
        }
        RenameMode::From => paths.into_iter().map(RawEvent::deleted).collect(),
        RenameMode::To => paths.into_iter().map(RawEvent::created).collect(),
        RenameMode::Any | RenameMode::Other => paths.into_iter().map(by_existence).collect(),
    }
}

/// Resolves an ambiguous rename half by checking whether the path exists.
fn by_existence(path: PathBuf) -> RawEvent {
    if fs::symlink_metadata(&path).is_ok() {
        RawEvent::created(path)
    } else {
        RawEvent::deleted(path)
    }
}
