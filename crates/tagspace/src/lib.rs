//! Tag-space file management library.
//!
//! Files carry several categories (tags) realized as nested directories:
//! a file tagged `{Pictures, Art}` lives at `Pictures/Art/<file>`, and a view
//! over `{Art, Pictures}` also finds it under `Art/Pictures/<file>`. No
//! database is kept besides a plain-text category registry at the root.
//!
//! This crate provides:
//! - Path codec between category sets and directory paths
//! - Category registry with atomic persistence
//! - Live views kept current by per-directory watches
//! - View-local filtering and deterministic sorting

pub mod cancel;
pub mod category;
pub mod codec;
pub mod config;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod filter;
pub mod index;
pub mod registry;
pub mod sorter;
pub mod types;
pub mod walk;
pub mod watcher;

// Re-export main types
pub use category::{Category, CategorySet, REGISTRY_FILE_NAME};
pub use config::{EngineConfig, Preferences, WatchBackend};
pub use engine::{OpenedView, Tagspace};
pub use error::{Result, TagspaceError};
pub use filter::FilterOptions;
pub use index::{ViewChange, ViewId, ViewInfo, ViewState};
pub use sorter::{SortKey, SortOptions};
pub use types::{Item, ItemId, ItemKind, TypeGroup};
pub use watcher::{RawEvent, RawEventKind, WatchMode};
