//! Versioned walk jobs on the rayon pool.
//!
//! Each filter has its own version tracker. Starting a walk for a filter
//! cancels the one in flight; only the result carrying the current version is
//! installed, and it serves every view waiting on that filter.
//!
//! Subtree jobs re-list one directory of a live view. Events the view applies
//! below that directory while the job runs are recorded and handed back with
//! the result, so the merge cannot lose them.

use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use fnv::FnvHashMap;

use super::Message;
use crate::cancel::WalkVersionTracker;
use crate::category::{Category, CategorySet};
use crate::index::{list_cached, resolve_filter, resolve_subtree, CachedResolution, ViewId};
use crate::watcher::RawEvent;

#[derive(Debug)]
struct SubtreeJob {
    view: ViewId,
    start: PathBuf,
    tracker: WalkVersionTracker,
    replay: Vec<RawEvent>,
}

/// A subtree job whose result came back.
#[derive(Debug)]
pub(crate) struct FinishedSubtree {
    pub view: ViewId,
    pub start: PathBuf,
    pub replay: Vec<RawEvent>,
}

#[derive(Debug, Default)]
pub(crate) struct WalkScheduler {
    trackers: FnvHashMap<CategorySet, WalkVersionTracker>,
    in_flight: FnvHashMap<CategorySet, u64>,
    subtrees: FnvHashMap<u64, SubtreeJob>,
    next_job: u64,
}

impl WalkScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a walk for `filter`. With `cached` set, only the cached
    /// locations (plus missing permutations) are listed.
    pub fn start(
        &mut self,
        root: PathBuf,
        filter: CategorySet,
        cached: Option<(CachedResolution, Vec<Category>)>,
        tx: Sender<Message>,
    ) {
        let token = self.trackers.entry(filter.clone()).or_default().next_token();
        let version = token.version();
        if self.in_flight.insert(filter.clone(), version).is_some() {
            log::debug!("superseded in-flight walk filter={filter}");
        }

        rayon::spawn(move || {
            let outcome = match cached {
                Some((resolution, order)) => list_cached(
                    &root,
                    &filter,
                    &order,
                    &resolution.locations,
                    &resolution.watched,
                    &token,
                ),
                None => resolve_filter(&root, &filter, &token),
            };
            let _ = tx.send(Message::WalkFinished {
                filter,
                version,
                outcome,
            });
        });
    }

    /// Returns true if `version` is the current walk for `filter`.
    pub fn finish(&mut self, filter: &CategorySet, version: u64) -> bool {
        if self.in_flight.get(filter) == Some(&version) {
            self.in_flight.remove(filter);
            true
        } else {
            false
        }
    }

    /// Posts a walk of `start` on behalf of a live view.
    pub fn start_subtree(
        &mut self,
        root: PathBuf,
        view: ViewId,
        filter: CategorySet,
        start: PathBuf,
        tx: Sender<Message>,
    ) {
        let tracker = WalkVersionTracker::new();
        let token = tracker.next_token();
        let job = self.next_job;
        self.next_job += 1;
        log::debug!("subtree walk posted view={view} job={job} start={}", start.display());
        self.subtrees.insert(
            job,
            SubtreeJob {
                view,
                start: start.clone(),
                tracker,
                replay: Vec::new(),
            },
        );

        rayon::spawn(move || {
            let outcome = resolve_subtree(&root, &start, &filter, &token);
            let _ = tx.send(Message::SubtreeFinished { job, outcome });
        });
    }

    /// Keeps the events a view just applied for its running subtree jobs.
    pub fn record(&mut self, view: ViewId, events: &[RawEvent]) {
        for job in self.subtrees.values_mut().filter(|job| job.view == view) {
            let start: &Path = &job.start;
            job.replay.extend(
                events
                    .iter()
                    .filter(|event| event.paths().any(|path| path.starts_with(start)))
                    .cloned(),
            );
        }
    }

    /// `None` if the job was cancelled in the meantime.
    pub fn finish_subtree(&mut self, job: u64) -> Option<FinishedSubtree> {
        let job = self.subtrees.remove(&job)?;
        Some(FinishedSubtree {
            view: job.view,
            start: job.start,
            replay: job.replay,
        })
    }

    /// Cancels the subtree jobs of a view that is closing or reloading.
    pub fn cancel_view(&mut self, view: ViewId) {
        self.subtrees.retain(|_, job| {
            if job.view != view {
                return true;
            }
            job.tracker.cancel_all();
            false
        });
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.subtrees.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for tracker in self.trackers.values() {
            tracker.cancel_all();
        }
        self.in_flight.clear();
        for job in self.subtrees.values() {
            job.tracker.cancel_all();
        }
        self.subtrees.clear();
    }

    /// Forgets the tracker of a filter no view uses anymore.
    pub fn forget(&mut self, filter: &CategorySet) {
        if !self.in_flight.contains_key(filter) {
            self.trackers.remove(filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn newer_walk_supersedes_older() {
        let temp = TempDir::new().unwrap();
        let filter = CategorySet::new();
        let (tx, rx) = unbounded();
        let mut walks = WalkScheduler::new();

        walks.start(temp.path().to_path_buf(), filter.clone(), None, tx.clone());
        walks.start(temp.path().to_path_buf(), filter.clone(), None, tx);

        let mut current = 0;
        for _ in 0..2 {
            let message = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            let Message::WalkFinished { filter, version, .. } = message else {
                panic!("unexpected message");
            };
            if walks.finish(&filter, version) {
                current += 1;
            }
        }
        assert_eq!(current, 1);
        assert!(walks.is_idle());
    }

    #[test]
    fn subtree_jobs_record_events_below_their_start() {
        let temp = TempDir::new().unwrap();
        let art = temp.path().join("Art");
        std::fs::create_dir(&art).unwrap();
        let (tx, rx) = unbounded();
        let mut walks = WalkScheduler::new();

        walks.start_subtree(
            temp.path().to_path_buf(),
            ViewId(1),
            CategorySet::parse(["Art"]).unwrap(),
            art.clone(),
            tx,
        );
        assert!(!walks.is_idle());
        walks.record(
            ViewId(1),
            &[
                RawEvent::created(art.join("a.png")),
                RawEvent::created(temp.path().join("Videos/b.mp4")),
            ],
        );
        walks.record(ViewId(2), &[RawEvent::created(art.join("c.png"))]);

        let Message::SubtreeFinished { job, outcome } = rx.recv_timeout(Duration::from_secs(10)).unwrap() else {
            panic!("unexpected message");
        };
        assert!(outcome.unwrap().locations.contains(&art));
        let finished = walks.finish_subtree(job).unwrap();
        assert_eq!(finished.view, ViewId(1));
        assert_eq!(finished.start, art);
        assert_eq!(finished.replay.len(), 1);
        assert_eq!(finished.replay[0].path, art.join("a.png"));
        assert!(walks.is_idle());
    }

    #[test]
    fn cancelled_subtree_results_are_dropped() {
        let temp = TempDir::new().unwrap();
        let (tx, rx) = unbounded();
        let mut walks = WalkScheduler::new();

        walks.start_subtree(
            temp.path().to_path_buf(),
            ViewId(3),
            CategorySet::new(),
            temp.path().to_path_buf(),
            tx,
        );
        walks.cancel_view(ViewId(3));
        assert!(walks.is_idle());

        let Message::SubtreeFinished { job, .. } = rx.recv_timeout(Duration::from_secs(10)).unwrap() else {
            panic!("unexpected message");
        };
        assert!(walks.finish_subtree(job).is_none());
    }
}
