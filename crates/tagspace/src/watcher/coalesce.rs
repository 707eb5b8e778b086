//! Event coalescing.
//!
//! Events are buffered for `COALESCE_WINDOW` measured from the first buffered
//! event. Bursts on the same path merge into one event:
//!
//! ```text
//! Modified + Modified -> Modified
//! Created  + Modified -> Created
//! any      + Deleted  -> Deleted
//! Deleted  + Created  -> Created
//! ```
//!
//! A `Renamed` event absorbs a pending `Deleted(old)` / `Created(new)` pair,
//! which is how inotify reports the halves before the paired event.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fnv::FnvHashMap;

use super::events::{RawEvent, RawEventKind};

#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    /// Slots keep arrival order; merged or absorbed events leave a `None`.
    slots: Vec<Option<RawEvent>>,
    /// Slot of the pending non-rename event for each path.
    by_path: FnvHashMap<PathBuf, usize>,
    first_at: Option<Instant>,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Vec::new(),
            by_path: FnvHashMap::default(),
            first_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty() && self.slots.iter().all(Option::is_none)
    }

    /// When the pending batch must be flushed.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_at.map(|first| first + self.window)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn push(&mut self, event: RawEvent, now: Instant) {
        if self.first_at.is_none() {
            self.first_at = Some(now);
        }

        if event.kind == RawEventKind::Renamed {
            self.absorb_halves(&event);
            self.slots.push(Some(event));
            return;
        }

        let kind = match self.take_pending(&event.path) {
            Some(previous) => merge_kinds(previous.kind, event.kind),
            None => event.kind,
        };
        self.by_path.insert(event.path.clone(), self.slots.len());
        self.slots.push(Some(RawEvent { kind, ..event }));
    }

    /// Returns the merged batch in arrival order and resets the window.
    pub fn drain(&mut self) -> Vec<RawEvent> {
        self.first_at = None;
        self.by_path.clear();
        self.slots.drain(..).flatten().collect()
    }

    fn take_pending(&mut self, path: &Path) -> Option<RawEvent> {
        let slot = self.by_path.remove(path)?;
        self.slots.get_mut(slot)?.take()
    }

    fn absorb_halves(&mut self, rename: &RawEvent) {
        let absorb = |coalescer: &mut Self, path: &Path, kind: RawEventKind| {
            let matches = coalescer
                .by_path
                .get(path)
                .and_then(|slot| coalescer.slots.get(*slot))
                .and_then(Option::as_ref)
                .is_some_and(|pending| pending.kind == kind);
            if matches {
                coalescer.take_pending(path);
            }
        };
        absorb(self, &rename.path, RawEventKind::Deleted);
        if let Some(new_path) = &rename.new_path {
            absorb(self, new_path, RawEventKind::Created);
        }
    }
}

fn merge_kinds(previous: RawEventKind, next: RawEventKind) -> RawEventKind {
    use RawEventKind::*;
    match (previous, next) {
        (_, Deleted) => Deleted,
        (Created, Modified) | (Deleted, Modified) => Created,
        (Modified | Renamed, Modified) => Modified,
        (_, Created) => Created,
        (_, Renamed) => Renamed,
    }
}

/// Drops every path that lies below another path of the input, and
/// duplicates. The result is in path order.
///
/// ```text
/// Input:  ["/a/b/c", "/a/b", "/a/b/d", "/x/y"]
/// Output: ["/a/b", "/x/y"]
/// ```
pub fn minimal_cover(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    // Component order puts a directory right before everything below it.
    let sorted: BTreeSet<PathBuf> = paths.into_iter().collect();
    let mut cover: Vec<PathBuf> = Vec::with_capacity(sorted.len());
    for path in sorted {
        match cover.last() {
            Some(top) if path.starts_with(top) => {}
            _ => cover.push(path),
        }
    }
    cover
}
