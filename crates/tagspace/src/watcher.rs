//! Filesystem watching module.
//!
//! This module handles live change notification:
//! - `notify` backends with one non-recursive watch per directory
//! - translation of backend events into `RawEvent`s
//! - coalescing of event bursts before dispatch

mod backend;
mod coalesce;
mod events;

pub use backend::{FilesystemWatcher, WatchMode, WatchSubscription, POLL_INTERVAL};
pub use coalesce::{minimal_cover, Coalescer};
pub use events::{translate_event, RawEvent, RawEventKind, WatcherEvent};
