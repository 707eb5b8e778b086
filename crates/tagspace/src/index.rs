//! Per-view tag indexing.
//!
//! A view's contents come from a pruned walk: starting at the root, only
//! directories named after a category of the filter are entered, so every
//! visited directory encodes a subset of the filter. Visited directories whose
//! set equals the filter are the view's *locations*; their direct children are
//! the view's items.
//!
//! ## Module Structure
//!
//! - `resolve` - Pruned walks and cached location listing
//! - `locations` - Per-set cache of resolved locations
//! - `view` - Per-view state machine and event application

mod locations;
mod resolve;
mod view;

pub use locations::{CachedResolution, LocationCache};
pub use resolve::{list_cached, resolve_filter, resolve_subtree, WalkOutcome, MAX_CANDIDATE_PROBES};
pub(crate) use resolve::is_registry_file;
pub use view::{TagView, ViewChange, ViewDelta, ViewId, ViewInfo, ViewState};
